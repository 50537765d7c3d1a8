//! Property tests for stream decoding and run-state invariants.
//!
//! Uses proptest to verify:
//! 1. Chunk independence — where the body is cut never changes the events
//! 2. Ordering — the timeline preserves arrival order across types
//! 3. Id monotonicity — live trade ids are exactly 1..N
//! 4. Reset idempotence — reset always yields an empty state

use proptest::prelude::*;
use serde_json::json;
use stratstream_core::{FrameDecoder, RunState, StreamEvent, StreamMessage};

// ── Strategies (proptest) ────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Kind {
    Trade(f64),
    Agent(usize),
    Progress(u32),
    Garbage,
}

const ACTIONS: [&str; 3] = ["analyzing", "adjusted", "no_change"];

fn arb_kind() -> impl Strategy<Value = Kind> {
    prop_oneof![
        4 => (1.0..500.0_f64).prop_map(|p| Kind::Trade((p * 100.0).round() / 100.0)),
        3 => (0..ACTIONS.len()).prop_map(Kind::Agent),
        2 => (1u32..=28).prop_map(Kind::Progress),
        1 => Just(Kind::Garbage),
    ]
}

fn frame(kind: &Kind) -> String {
    let payload = match kind {
        Kind::Trade(price) => json!({
            "type": "trade",
            "data": {"time": "2024-01-02", "signal": "BUY", "price": price, "reason": "均线金叉"}
        }),
        Kind::Agent(a) => json!({
            "type": "agent",
            "data": {"action": ACTIONS[*a], "message": "参数检查"}
        }),
        Kind::Progress(day) => json!({
            "type": "progress",
            "data": {"current_date": format!("2024-01-{day:02}")}
        }),
        Kind::Garbage => return "data: {not json\n\n".to_string(),
    };
    format!("data: {payload}\n\n")
}

fn body(kinds: &[Kind]) -> Vec<u8> {
    kinds.iter().map(frame).collect::<String>().into_bytes()
}

fn split_at(bytes: &[u8], cuts: &[prop::sample::Index]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c.index(bytes.len() + 1)).collect();
    points.sort_unstable();
    points.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for p in points {
        chunks.push(bytes[start..p].to_vec());
        start = p;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

fn decode_all(chunks: &[Vec<u8>]) -> Vec<StreamEvent> {
    let mut decoder = FrameDecoder::new();
    chunks.iter().flat_map(|c| decoder.push(c)).collect()
}

fn reduce(events: Vec<StreamEvent>) -> RunState {
    let mut state = RunState::new();
    state.begin_run();
    for e in events {
        state.apply(e);
    }
    state
}

// ── 1. Chunk independence ────────────────────────────────────────────

proptest! {
    /// Cutting the body anywhere, including inside multi-byte characters,
    /// yields the same events as decoding it in one piece.
    #[test]
    fn chunk_boundaries_do_not_change_events(
        kinds in prop::collection::vec(arb_kind(), 0..30),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..12),
    ) {
        let bytes = body(&kinds);
        let whole = decode_all(&[bytes.clone()]);
        let chunked = decode_all(&split_at(&bytes, &cuts));
        prop_assert_eq!(&whole, &chunked);

        let expected = kinds.iter().filter(|k| !matches!(k, Kind::Garbage)).count();
        prop_assert_eq!(whole.len(), expected);
    }

    /// Byte-at-a-time delivery is the worst case for the line buffer.
    #[test]
    fn single_byte_chunks(kinds in prop::collection::vec(arb_kind(), 0..10)) {
        let bytes = body(&kinds);
        let singles: Vec<Vec<u8>> = bytes.iter().map(|b| vec![*b]).collect();
        prop_assert_eq!(decode_all(&[bytes.clone()]), decode_all(&singles));
    }
}

// ── 2 & 3. Ordering and id monotonicity ──────────────────────────────

proptest! {
    /// The timeline interleaves trades and agent notes exactly as received.
    #[test]
    fn messages_preserve_arrival_order(kinds in prop::collection::vec(arb_kind(), 0..40)) {
        let state = reduce(decode_all(&[body(&kinds)]));

        let expected: Vec<&str> = kinds
            .iter()
            .filter_map(|k| match k {
                Kind::Trade(_) => Some("trade"),
                Kind::Agent(_) => Some("agent"),
                _ => None,
            })
            .collect();
        let actual: Vec<&str> = state.messages.iter().map(StreamMessage::kind).collect();
        prop_assert_eq!(actual, expected);
    }

    /// Live trade ids are 1..N in emission order; agent ids are 1..K on their own counter.
    #[test]
    fn ids_are_dense_and_increasing(kinds in prop::collection::vec(arb_kind(), 0..40)) {
        let state = reduce(decode_all(&[body(&kinds)]));

        let trade_ids: Vec<u64> = state.trades.iter().map(|t| t.id).collect();
        let expected: Vec<u64> = (1..=state.trades.len() as u64).collect();
        prop_assert_eq!(trade_ids, expected);

        let agent_ids: Vec<u64> = state.agent_messages.iter().map(|a| a.id).collect();
        let expected: Vec<u64> = (1..=state.agent_messages.len() as u64).collect();
        prop_assert_eq!(agent_ids, expected);
    }
}

// ── 4. Reset idempotence ─────────────────────────────────────────────

proptest! {
    #[test]
    fn reset_always_empties(kinds in prop::collection::vec(arb_kind(), 0..20), twice in any::<bool>()) {
        let mut state = reduce(decode_all(&[body(&kinds)]));
        state.apply(StreamEvent::Error { message: "x".into() });
        state.reset();
        if twice {
            state.reset();
        }
        prop_assert!(state.trades.is_empty());
        prop_assert!(state.messages.is_empty());
        prop_assert!(state.agent_messages.is_empty());
        prop_assert!(state.stats.is_none());
        prop_assert!(state.error.is_none());
        prop_assert!(state.current_date.is_none());
    }

    /// Starting a new run is a reset plus fresh counters.
    #[test]
    fn begin_run_restarts_counters(
        first in prop::collection::vec(arb_kind(), 0..15),
        second in prop::collection::vec(arb_kind(), 0..15),
    ) {
        let mut state = reduce(decode_all(&[body(&first)]));
        state.begin_run();
        for e in decode_all(&[body(&second)]) {
            state.apply(e);
        }
        let fresh = reduce(decode_all(&[body(&second)]));
        prop_assert_eq!(state, fresh);
    }
}

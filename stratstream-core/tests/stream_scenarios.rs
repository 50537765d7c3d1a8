//! Scenario tests: scripted stream bodies fed through the decoder and reducer.

use stratstream_core::{FrameDecoder, RunState, Signal, StreamMessage};

fn run(chunks: &[&[u8]]) -> RunState {
    let mut decoder = FrameDecoder::new();
    let mut state = RunState::new();
    state.begin_run();
    for chunk in chunks {
        for event in decoder.push(chunk) {
            state.apply(event);
        }
    }
    decoder.finish();
    state.close_stream();
    state
}

const PROGRESS: &str = r#"data: {"type":"progress","data":{"current_date":"2024-01-02"}}"#;
const TRADE_BUY: &str =
    r#"data: {"type":"trade","data":{"time":"2024-01-02","signal":"BUY","price":10,"reason":"fast MA crossed above slow MA"}}"#;
const AGENT: &str =
    r#"data: {"type":"agent","data":{"action":"analyzing","message":"reviewing last 30 days"}}"#;
const COMPLETE: &str = r#"data: {"type":"complete","data":{"stats":{"total_trades":1,"win_count":0,"loss_count":0,"total_profit":0,"win_rate":"0.00%","max_drawdown":0,"final_balance":200000},"trades":[{"time":"2024-01-02","signal":"BUY","price":10,"reason":"fast MA crossed above slow MA"}]}}"#;

fn lines(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("{f}\n\n")).collect()
}

#[test]
fn end_to_end_progress_trade_agent_complete() {
    let body = lines(&[PROGRESS, TRADE_BUY, AGENT, COMPLETE]);
    let state = run(&[body.as_bytes()]);

    assert_eq!(state.current_date.as_deref(), Some("2024-01-02"));
    assert_eq!(state.trades.len(), 1);
    assert_eq!(state.trades[0].id, 1);
    assert_eq!(state.trades[0].signal, Signal::Buy);
    assert_eq!(state.trades[0].price, 10.0);

    assert_eq!(state.messages.len(), 2);
    assert!(matches!(state.messages[0], StreamMessage::Trade(_)));
    assert!(matches!(state.messages[1], StreamMessage::Agent(_)));
    // the agent note had no date of its own
    assert_eq!(state.messages[1].time(), "2024-01-02");

    assert_eq!(state.stats.as_ref().map(|s| s.total_trades), Some(1));
    assert!(!state.is_running);
    assert!(state.error.is_none());
}

#[test]
fn frame_split_mid_json() {
    let body = lines(&[TRADE_BUY, TRADE_BUY]);
    let bytes = body.as_bytes();
    let mid = TRADE_BUY.len() / 2;

    let state = run(&[&bytes[..mid], &bytes[mid..mid + 7], &bytes[mid + 7..]]);
    assert_eq!(state.trades.len(), 2);
    assert_eq!(state.messages.len(), 2);
}

#[test]
fn malformed_frame_between_two_trades() {
    let body = lines(&[TRADE_BUY, r#"data: {"type":"trade","data":{"price":"#, TRADE_BUY]);
    let state = run(&[body.as_bytes()]);

    assert_eq!(state.trades.len(), 2);
    assert_eq!(state.trades[1].id, 2);
    assert!(state.error.is_none());
}

#[test]
fn interleaving_is_preserved() {
    let body = lines(&[AGENT, TRADE_BUY, AGENT, TRADE_BUY]);
    let state = run(&[body.as_bytes()]);

    let kinds: Vec<&str> = state.messages.iter().map(StreamMessage::kind).collect();
    assert_eq!(kinds, vec!["agent", "trade", "agent", "trade"]);
    assert_eq!(state.trades.len(), 2);
    assert_eq!(state.agent_messages.len(), 2);
}

#[test]
fn complete_renumbers_from_server_list() {
    let body = lines(&[TRADE_BUY, TRADE_BUY, TRADE_BUY, COMPLETE]);
    let state = run(&[body.as_bytes()]);

    // three streamed, one in the authoritative list
    assert_eq!(state.trades.len(), 1);
    assert_eq!(state.trades[0].id, 1);
    assert_eq!(state.messages.len(), 3);
}

#[test]
fn frames_after_complete_are_still_applied() {
    let body = lines(&[COMPLETE, AGENT]);
    let state = run(&[body.as_bytes()]);

    assert!(!state.is_running);
    assert_eq!(state.agent_messages.len(), 1);
    assert!(state.stats.is_some());
}

#[test]
fn error_event_ends_run() {
    let body = lines(&[
        TRADE_BUY,
        r#"data: {"type":"error","data":{"message":"symbol has no data in range"}}"#,
    ]);
    let state = run(&[body.as_bytes()]);

    assert_eq!(state.error.as_deref(), Some("symbol has no data in range"));
    assert!(!state.is_running);
    assert_eq!(state.trades.len(), 1);
    assert!(state.stats.is_none());
}

#[test]
fn cancelled_event_keeps_partial_results() {
    let body = lines(&[TRADE_BUY, AGENT, r#"data: {"type":"cancelled","data":{}}"#]);
    let state = run(&[body.as_bytes()]);

    assert!(!state.is_running);
    assert_eq!(state.messages.len(), 2);
    assert!(state.error.is_none());
}

#[test]
fn silent_close_is_implicit_completion() {
    let body = lines(&[PROGRESS, TRADE_BUY]);
    let state = run(&[body.as_bytes()]);

    assert!(!state.is_running);
    assert!(state.stats.is_none());
    assert!(state.error.is_none());
    assert_eq!(state.trades.len(), 1);
}

#[test]
fn unknown_types_and_comments_are_ignored() {
    let body = lines(&[
        ": keep-alive",
        r#"data: {"type":"heartbeat","data":{}}"#,
        TRADE_BUY,
    ]);
    let state = run(&[body.as_bytes()]);
    assert_eq!(state.messages.len(), 1);
}

#[test]
fn crlf_line_endings() {
    let body = format!("{PROGRESS}\r\n\r\n{TRADE_BUY}\r\n\r\n");
    let state = run(&[body.as_bytes()]);
    assert_eq!(state.current_date.as_deref(), Some("2024-01-02"));
    assert_eq!(state.trades.len(), 1);
}

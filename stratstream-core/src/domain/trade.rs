//! TradeMessage — one executed trade tick from a streaming run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    #[serde(alias = "buy")]
    Buy,
    #[serde(alias = "sell")]
    Sell,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single executed trade as reported by the backtest stream.
///
/// `id` is assigned client-side: sequential within a run during live
/// streaming, then renumbered from the server's final list on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeMessage {
    pub id: u64,
    pub time: String,
    pub signal: Signal,
    pub price: f64,
    pub reason: String,

    // ── Financial snapshot ──
    /// Account balance after the trade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    /// Realized P&L of this trade; only present on closing trades.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_pnl: Option<f64>,
    /// Cumulative realized P&L.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
    /// Unrealized P&L of the open position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_pnl: Option<f64>,
    /// Mark-to-market value of the open position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_value: Option<f64>,
}

impl TradeMessage {
    /// True when this trade closed a position (it carries a realized P&L).
    pub fn is_closing(&self) -> bool {
        self.trade_pnl.is_some()
    }

    /// True for a closing trade with a strictly positive realized P&L.
    pub fn is_win(&self) -> bool {
        self.trade_pnl.is_some_and(|pnl| pnl > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_accepts_upper_and_lower_case() {
        let upper: Signal = serde_json::from_str("\"BUY\"").unwrap();
        let lower: Signal = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(upper, Signal::Buy);
        assert_eq!(lower, Signal::Sell);
        assert_eq!(serde_json::to_string(&Signal::Sell).unwrap(), "\"SELL\"");
    }

    #[test]
    fn optional_snapshot_fields_are_skipped_when_absent() {
        let trade = TradeMessage {
            id: 1,
            time: "2024-01-02".into(),
            signal: Signal::Buy,
            price: 10.0,
            reason: "golden cross".into(),
            balance: Some(199_990.0),
            trade_pnl: None,
            realized_pnl: None,
            floating_pnl: None,
            market_value: None,
        };
        let json = serde_json::to_string(&trade).unwrap();
        assert!(json.contains("\"balance\""));
        assert!(!json.contains("trade_pnl"));
        assert!(!trade.is_closing());
    }

    #[test]
    fn closing_trade_win_detection() {
        let mut trade: TradeMessage = serde_json::from_str(
            r#"{"id":2,"time":"2024-02-01","signal":"SELL","price":12.5,"reason":"death cross","trade_pnl":250.0}"#,
        )
        .unwrap();
        assert!(trade.is_closing());
        assert!(trade.is_win());

        trade.trade_pnl = Some(-10.0);
        assert!(!trade.is_win());
    }
}

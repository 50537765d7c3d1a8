//! Terminal summary of a completed run.

use serde::{Deserialize, Deserializer, Serialize};

/// Summary statistics delivered with the `complete` event.
///
/// Missing fields default to zero / empty so an older server that omits a
/// field does not turn the whole completion frame into a malformed one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestStats {
    pub total_trades: u64,
    pub win_count: u64,
    pub loss_count: u64,
    pub total_profit: f64,
    /// Formatted percentage, e.g. `"62.50%"`.
    #[serde(deserialize_with = "de_win_rate")]
    pub win_rate: String,
    pub max_drawdown: f64,
    pub final_balance: f64,
}

/// Accepts the formatted string the server normally sends, or a bare number.
fn de_win_rate<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => format!("{n:.2}%"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_summary() {
        let stats: BacktestStats = serde_json::from_str(
            r#"{"total_trades":4,"win_count":3,"loss_count":1,"total_profit":1520.5,
                "win_rate":"75.00%","max_drawdown":0.031,"final_balance":201520.5}"#,
        )
        .unwrap();
        assert_eq!(stats.total_trades, 4);
        assert_eq!(stats.win_rate, "75.00%");
    }

    #[test]
    fn numeric_win_rate_is_formatted() {
        let stats: BacktestStats =
            serde_json::from_str(r#"{"total_trades":2,"win_rate":50}"#).unwrap();
        assert_eq!(stats.win_rate, "50.00%");
        assert_eq!(stats.final_balance, 0.0);
    }
}

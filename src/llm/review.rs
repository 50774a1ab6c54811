// =============================================================================
// Review generator (C10) — post-mortem summary for each newly closed position
// =============================================================================
//
// For each closed-position row lacking a `reviewSummary`, and only where the
// decision journal for its `posId` is non-empty, builds a compact markdown
// prompt (one-row trade table, abbreviated decision timeline, last 15
// confirmed 5m bars ending at or after the close) and calls the LLM
// non-streaming with a fixed 60s timeout (§4.10, §5 "reviews use a fixed
// 60s"). Persisting the result back onto the row makes the operation
// idempotent: a row with a summary is never revisited (§8 idempotence).
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::llm::client::LlmClient;
use crate::market_data::KlineStore;
use crate::store::DataStore;
use crate::types::{AIDecision, ClosedPosition};

const REVIEW_TIMEOUT: Duration = Duration::from_secs(60);
const REVIEW_KLINE_TIMEFRAME: &str = "5m";
const REVIEW_KLINE_COUNT: usize = 15;

fn abbreviate_reason(reason: &Option<String>) -> String {
    match reason {
        Some(text) if text.chars().count() > 80 => format!("{}…", text.chars().take(80).collect::<String>()),
        Some(text) => text.clone(),
        None => "(no reason recorded)".to_string(),
    }
}

fn render_timeline(decisions: &[AIDecision]) -> String {
    if decisions.is_empty() {
        return "(no decisions recorded)".to_string();
    }
    decisions
        .iter()
        .map(|d| format!("- {:?} conf={} {}", d.signal, d.confidence, abbreviate_reason(&d.reason)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_prompt(position: &ClosedPosition, decisions: &[AIDecision], klines: &[crate::market_data::kline_store::Candle]) -> String {
    let hold_minutes = (position.close_time_ms - position.open_time_ms) as f64 / 60_000.0;
    let pnl_pct = if position.avg_px * position.size > 0.0 {
        position.realized_pnl / (position.avg_px * position.size) * 100.0
    } else {
        0.0
    };

    let table = format!(
        "| side | size | entry | exit | pnl | pnl% | fee | hold (min) |\n\
         |---|---|---|---|---|---|---|---|\n\
         | {:?} | {:.4} | {:.4} | {:.4} | {:.4} | {:.2}% | {:.4} | {:.1} |",
        position.pos_side, position.size, position.avg_px, position.exit_px, position.realized_pnl, pnl_pct, position.fee_total, hold_minutes
    );

    let klines_csv = klines
        .iter()
        .map(|c| format!("{},{:.4},{:.4},{:.4},{:.4},{:.4}", c.open_time_ms, c.open, c.high, c.low, c.close, c.volume))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Write a short post-mortem for this closed position.\n\n{table}\n\nDecision timeline:\n{}\n\nRecent 5m candles (open_time,open,high,low,close,volume):\n{klines_csv}",
        render_timeline(decisions)
    )
}

const SYSTEM_PROMPT: &str = "You write concise, specific trade post-mortems. Two or three sentences, no headers, no JSON.";

/// Generate and persist a review for every closed row still missing one,
/// where the position's decision history is non-empty. Rows with no
/// decisions are left for a later pass once the decision row catches up.
pub async fn run_once(llm: &Arc<LlmClient>, store: &Arc<dyn DataStore>, klines: &Arc<KlineStore>) -> usize {
    let mut written = 0;
    for position in store.closed_positions_without_review() {
        let decisions = store.decisions_for_position(position.pos_id());
        if decisions.is_empty() {
            continue;
        }

        let candles = klines.confirmed_up_to(&position.symbol, REVIEW_KLINE_TIMEFRAME, position.close_time_ms, REVIEW_KLINE_COUNT);
        let prompt = render_prompt(&position, &decisions, &candles);
        let session_id = format!("review-{}-{}", position.symbol, position.open_time_ms);

        match llm.complete(SYSTEM_PROMPT, &prompt, &session_id, REVIEW_TIMEOUT).await {
            Ok(summary) => {
                store.save_review_summary(&position.symbol, position.open_time_ms, summary);
                written += 1;
                info!(symbol = %position.symbol, open_time_ms = position.open_time_ms, "review summary persisted");
            }
            Err(e) => {
                warn!(symbol = %position.symbol, open_time_ms = position.open_time_ms, error = %e, "review generation failed");
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PosSide;

    fn closed(pos_id: i64) -> ClosedPosition {
        ClosedPosition {
            symbol: "BTC-USDT-SWAP".to_string(),
            pos_side: PosSide::Long,
            size: 2.0,
            avg_px: 100.0,
            open_time_ms: pos_id,
            close_time_ms: pos_id + 60_000,
            exit_px: 105.0,
            realized_pnl: 10.0,
            fee_total: 0.2,
            review_summary: None,
        }
    }

    #[test]
    fn prompt_includes_trade_table_and_timeline() {
        let position = closed(1000);
        let decisions = vec![AIDecision {
            id: "d1".to_string(),
            timestamp_ms: 1000,
            symbol: "BTC-USDT-SWAP".to_string(),
            signal: crate::types::Signal::OpenLong,
            pos_id: Some(1000),
            confidence: 80,
            size: Some(2.0),
            adjust_data: None,
            holding_time: None,
            reason: Some("breakout continuation".to_string()),
        }];
        let prompt = render_prompt(&position, &decisions, &[]);
        assert!(prompt.contains("side"));
        assert!(prompt.contains("breakout continuation"));
    }

    #[test]
    fn abbreviate_reason_truncates_long_text() {
        let long = Some("x".repeat(200));
        let short = abbreviate_reason(&long);
        assert!(short.len() < 200);
        assert!(short.ends_with('…'));
    }

    #[test]
    fn abbreviate_reason_handles_missing_reason() {
        assert_eq!(abbreviate_reason(&None), "(no reason recorded)");
    }
}

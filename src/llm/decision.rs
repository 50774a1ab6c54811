// =============================================================================
// Streaming decision engine (C8) -- early-decision probe + full-response parse
// =============================================================================
//
// Accumulates stream chunks into a buffer and re-runs the early-decision
// probe on every append: look for `"reason"` as a key, take the prefix before
// it, trim a trailing comma, close the object and attempt a strict parse.
// Falls back to narrow regex extraction only after that strict parse fails.
// The early decision is handed to the orchestrator exactly once, through
// `early_tx`, before the stream finishes. The full response is parsed only
// for journaling and persistence (spec section 4.8, scenario S3).
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::journal::Journal;
use crate::llm::client::LlmClient;
use crate::store::DataStore;
use crate::types::{AIDecision, AdjustData, ConversationRecord, Signal};

const REASON_KEY: &str = "\"reason\"";

/// A partial decision, extracted before the `reason` prose has fully arrived.
#[derive(Debug, Clone)]
pub struct EarlyDecision {
    pub signal: Signal,
    pub confidence: u8,
    pub size: Option<f64>,
    pub adjust_data: Option<AdjustData>,
    pub holding_time: Option<String>,
}

fn value_to_early(value: &Value) -> Option<EarlyDecision> {
    let signal = Signal::parse(value.get("signal")?.as_str()?)?;
    let confidence = value.get("confidence")?.as_f64()? as u8;
    let size = value.get("size").and_then(Value::as_f64);
    let holding_time = value.get("holding_time").and_then(Value::as_str).map(str::to_string);
    let adjust_data = value
        .get("adjust_data")
        .cloned()
        .and_then(|v| serde_json::from_value::<AdjustData>(v).ok());
    Some(EarlyDecision { signal, confidence, size, adjust_data, holding_time })
}

/// Narrow scalar-field extraction, applied only once the strict parse of the
/// closed prefix has already failed (spec section 4.8 / 9, "streaming JSON").
fn regex_fallback(buffer: &str) -> Option<EarlyDecision> {
    let signal_re = Regex::new(r#""signal"\s*:\s*"([A-Z_]+)""#).unwrap();
    let confidence_re = Regex::new(r#""confidence"\s*:\s*([0-9]+(?:\.[0-9]+)?)"#).unwrap();
    let size_re = Regex::new(r#""size"\s*:\s*([0-9]+(?:\.[0-9]+)?)"#).unwrap();
    let holding_time_re = Regex::new(r#""holding_time"\s*:\s*"([^"]*)""#).unwrap();

    let signal = Signal::parse(signal_re.captures(buffer)?.get(1)?.as_str())?;
    let confidence: u8 = confidence_re.captures(buffer)?.get(1)?.as_str().parse().ok()?;
    let size = size_re.captures(buffer).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok());
    let holding_time = holding_time_re.captures(buffer).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());
    Some(EarlyDecision { signal, confidence, size, adjust_data: None, holding_time })
}

/// Scan `buffer` for a closed prefix ending just before the `reason` key and
/// attempt to parse it; fall back to regex extraction of known scalar fields
/// only once the strict parse of that prefix has failed.
pub fn probe_early_decision(buffer: &str) -> Option<EarlyDecision> {
    let idx = buffer.find(REASON_KEY)?;
    let prefix = buffer[..idx].trim_end();
    let prefix = prefix.strip_suffix(',').unwrap_or(prefix).trim_end();
    let candidate = format!("{prefix}}}");

    if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
        if let Some(early) = value_to_early(&value) {
            return Some(early);
        }
    }
    regex_fallback(buffer)
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn hold_decision(symbol: &str, now_ms: i64, reason: &str) -> AIDecision {
    AIDecision {
        id: format!("dec-{}", Uuid::new_v4()),
        timestamp_ms: now_ms,
        symbol: symbol.to_string(),
        signal: Signal::Hold,
        pos_id: None,
        confidence: 0,
        size: None,
        adjust_data: None,
        holding_time: None,
        reason: Some(reason.to_string()),
    }
}

fn decision_from_early(symbol: &str, now_ms: i64, early: EarlyDecision, reason: Option<String>) -> AIDecision {
    AIDecision {
        id: format!("dec-{}", Uuid::new_v4()),
        timestamp_ms: now_ms,
        symbol: symbol.to_string(),
        signal: early.signal,
        pos_id: None,
        confidence: early.confidence,
        size: early.size,
        adjust_data: early.adjust_data,
        holding_time: early.holding_time,
        reason,
    }
}

/// Journal a compacted copy of the decision: drop `reason` to conserve
/// prompt tokens in future contexts (spec section 4.8, "drop reason and
/// risk_warning").
fn journal_entry(journal: &Journal, decision: &AIDecision, now_ms: i64) {
    let compacted = serde_json::json!({
        "signal": decision.signal,
        "confidence": decision.confidence,
        "size": decision.size,
        "adjust_data": decision.adjust_data,
        "holding_time": decision.holding_time,
    });
    let timestamp_str = chrono::DateTime::from_timestamp_millis(now_ms)
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    journal.append(compacted.to_string(), timestamp_str);
}

/// One streaming decision cycle: drives the LLM call, fires the early
/// decision through `early_tx` exactly once, journals a compacted version of
/// the full response, and persists the conversation row. If the early probe
/// never fires, the final decision is sent on `early_tx` instead so the
/// orchestrator still sees exactly one decision per cycle.
#[allow(clippy::too_many_arguments)]
pub async fn run_decision_cycle(
    llm: &LlmClient,
    store: &dyn DataStore,
    journal: &Journal,
    symbol: &str,
    system_prompt: String,
    user_prompt: String,
    session_id: String,
    now_ms: i64,
    early_tx: mpsc::Sender<AIDecision>,
) -> AIDecision {
    let delivered = AtomicBool::new(false);
    let buffer = std::sync::Mutex::new(String::new());

    let response = llm
        .stream_complete(&system_prompt, &user_prompt, &session_id, |chunk| {
            let mut buf = buffer.lock().expect("decision buffer poisoned");
            buf.push_str(chunk);
            if delivered.load(Ordering::Acquire) {
                return;
            }
            if let Some(early) = probe_early_decision(&buf) {
                let decision = decision_from_early(symbol, now_ms, early, None);
                if early_tx.try_send(decision).is_ok() {
                    delivered.store(true, Ordering::Release);
                }
            }
        })
        .await;

    let raw_response = match response {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, %symbol, "LLM stream call failed");
            buffer.lock().expect("decision buffer poisoned").clone()
        }
    };

    let cleaned = strip_code_fences(&raw_response);
    let full: Option<Value> = serde_json::from_str(cleaned).ok();
    let already_delivered = delivered.load(Ordering::Acquire);

    let final_decision = match full.as_ref().and_then(value_to_early) {
        Some(early) => {
            let reason = full.as_ref().and_then(|v| v.get("reason")).and_then(Value::as_str).map(str::to_string);
            decision_from_early(symbol, now_ms, early, reason)
        }
        None if already_delivered => {
            // Full parse failed but the early probe already succeeded: proceed
            // with it, marking `reason` unavailable (section 4.8 parse-failure path).
            match probe_early_decision(&buffer.lock().expect("decision buffer poisoned")) {
                Some(early) => decision_from_early(symbol, now_ms, early, Some("reason unavailable: full response failed to parse".to_string())),
                None => hold_decision(symbol, now_ms, "reason unavailable: full response failed to parse"),
            }
        }
        None => hold_decision(symbol, now_ms, "parse failed"),
    };

    if !already_delivered {
        let _ = early_tx.try_send(final_decision.clone());
    }

    journal_entry(journal, &final_decision, now_ms);

    store.save_conversation(ConversationRecord {
        id: format!("conv-{}", Uuid::new_v4()),
        session_id,
        symbol: symbol.to_string(),
        prompt: user_prompt,
        response: raw_response,
        analysis: final_decision.reason.clone().unwrap_or_default(),
        executed: false,
    });

    final_decision
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_succeeds_on_closed_prefix_before_reason() {
        let buffer = r#"{"signal":"OPEN_LONG","confidence":72,"size":5,"reason":"long prose that keeps strea"#;
        let early = probe_early_decision(buffer).expect("expected early decision");
        assert_eq!(early.signal, Signal::OpenLong);
        assert_eq!(early.confidence, 72);
        assert_eq!(early.size, Some(5.0));
    }

    #[test]
    fn probe_returns_none_before_reason_key_seen() {
        let buffer = r#"{"signal":"OPEN_LONG","confiden"#;
        assert!(probe_early_decision(buffer).is_none());
    }

    #[test]
    fn regex_fallback_extracts_scalars_from_malformed_prefix() {
        // trailing extra comma makes the strict parse of the closed prefix fail
        let buffer = r#"{"signal":"ADJUST_STOP","confidence":55,,"reason":"..."#;
        let early = probe_early_decision(buffer).expect("expected fallback decision");
        assert_eq!(early.signal, Signal::AdjustStop);
        assert_eq!(early.confidence, 55);
    }

    #[test]
    fn strip_code_fences_removes_json_fence() {
        let raw = "```json\n{\"signal\":\"HOLD\"}\n```";
        assert_eq!(strip_code_fences(raw), "{\"signal\":\"HOLD\"}");
    }

    #[test]
    fn hold_decision_carries_zero_confidence() {
        let decision = hold_decision("BTC-USDT-SWAP", 1000, "parse failed");
        assert_eq!(decision.signal, Signal::Hold);
        assert_eq!(decision.confidence, 0);
        assert_eq!(decision.reason.as_deref(), Some("parse failed"));
    }

    #[test]
    fn adjust_data_with_layer_missing_size_still_parses() {
        // A TP layer with only `price` (no `size`) must not collapse the
        // whole `adjust_data` to None — that would open the position with
        // no TP/SL protection (spec section 4.9 / 9).
        let buffer = r#"{"signal":"OPEN_LONG","confidence":80,"size":5,"adjust_data":{"take_profit":[{"price":110.0}],"stop_loss":[{"size":5.0,"price":90.0}]},"reason":"..."#;
        let early = probe_early_decision(buffer).expect("expected early decision");
        let adjust_data = early.adjust_data.expect("adjust_data must survive a missing layer size");
        assert_eq!(adjust_data.take_profit[0].size, None);
        assert_eq!(adjust_data.stop_loss[0].size, Some(5.0));
    }
}

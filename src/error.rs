// =============================================================================
// Error taxonomy — classifies failures by how a caller should react to them
// =============================================================================
//
// Mirrors the error kinds named in the specification: transient network
// blips are retried, protocol/sequence breaks drop local state, freshness
// breaches abort a cycle, and so on. Call sites match on `AgentError::kind()`
// rather than message text so retry/abort/restart decisions stay structural.
//
// `anyhow::Error` still wraps this at task-spawn points and in `main` for
// `.context(...)`-chained diagnostics; this enum exists for the inner
// decision points that need to branch on severity.
// =============================================================================

use std::fmt;

/// Coarse-grained error classification used to decide retry/abort/restart
/// behavior at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// WebSocket drop, REST timeout, 5xx — retry with backoff.
    TransientNetwork,
    /// Order-book sequence gap or checksum mismatch — drop local state.
    Protocol,
    /// A monitored age exceeded its threshold.
    DataFreshness,
    /// Non-2xx, timeout, malformed JSON, or truncated stream from the LLM.
    Llm,
    /// Adjust-data sums mismatch, missing required field, size below minimum.
    Validation,
    /// Order placement/cancel REST call failed.
    OrderApi,
    /// Missing credentials or other startup precondition.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TransientNetwork => "transient_network",
            Self::Protocol => "protocol",
            Self::DataFreshness => "data_freshness",
            Self::Llm => "llm",
            Self::Validation => "validation",
            Self::OrderApi => "order_api",
            Self::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

/// A classified agent error. Carries a human-readable message plus the
/// [`ErrorKind`] a caller needs to decide how to react.
#[derive(Debug, thiserror::Error)]
#[error("[{kind}] {message}")]
pub struct AgentError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AgentError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn freshness(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataFreshness, message)
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Llm, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn order_api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OrderApi, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let e = AgentError::freshness("kline age 400s > 300s");
        let text = e.to_string();
        assert!(text.contains("data_freshness"));
        assert!(text.contains("400s"));
    }

    #[test]
    fn kind_accessor_roundtrips() {
        let e = AgentError::order_api("cancel failed");
        assert_eq!(e.kind(), ErrorKind::OrderApi);
    }
}

//! Engine Client Adapter: a thin façade over the analytic engine's native
//! connect / prepare / execute-prepared / complete / cancel protocol.
//!
//! The adapter owns the one place in the crate that pattern-matches the
//! engine's error strings for connection-fatality (spec.md §9's explicit
//! re-architecture note) — callers only ever see an [`ErrorClass`].

mod client;

pub use client::EngineClient;

use std::fmt;

/// Query identifier returned by `prepare`. Zero means "no query in flight",
/// mirroring spec.md §3's `query_id == 0` slot invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryId {
    pub coordinator_id: u64,
    pub query_id: u64,
}

impl QueryId {
    pub const NONE: QueryId = QueryId {
        coordinator_id: 0,
        query_id: 0,
    };

    pub fn is_none(&self) -> bool {
        self.query_id == 0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.query_id)
    }
}

/// Strings the engine is known to emit for connection-level failures.
/// Taken verbatim from the original gateway's `SCIDB_CONNECTION_ERR` table.
const CONNECTION_FATAL_MARKERS: &[&str] = &[
    "SCIDB_LE_CANT_SEND_RECEIVE",
    "SCIDB_LE_CONNECTION_ERROR",
    "SCIDB_LE_NO_QUORUM",
];

/// Whether an engine failure should destroy the session (connection-fatal)
/// or leave it intact for a retry (query-local). See spec.md §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ConnectionFatal,
    QueryLocal,
}

/// Classify a raw engine error string. Behind the adapter, never in handler
/// code, per spec.md §9.
pub fn classify(message: &str) -> ErrorClass {
    if CONNECTION_FATAL_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        ErrorClass::ConnectionFatal
    } else {
        ErrorClass::QueryLocal
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine authentication failed: {0}")]
    AuthFailed(String),
    #[error("engine connection failed: {0}")]
    ConnectFailed(String),
    #[error("engine connection error: {0}")]
    ConnectionFatal(String),
    #[error("engine query error: {0}")]
    QueryLocal(String),
}

impl EngineError {
    /// Build an execution-phase error, classifying the message.
    pub fn from_query_error(message: impl Into<String>) -> EngineError {
        let message = message.into();
        let class = classify(&message);
        crate::prometheus::record_engine_error(class);
        match class {
            ErrorClass::ConnectionFatal => EngineError::ConnectionFatal(message),
            ErrorClass::QueryLocal => EngineError::QueryLocal(message),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::AuthFailed(_) => 401,
            EngineError::ConnectFailed(_) | EngineError::ConnectionFatal(_) => 502,
            EngineError::QueryLocal(_) => 406,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_connection_fatal_markers() {
        assert_eq!(
            classify("Error: SCIDB_LE_CANT_SEND_RECEIVE: broken pipe"),
            ErrorClass::ConnectionFatal
        );
        assert_eq!(
            classify("SCIDB_LE_CONNECTION_ERROR"),
            ErrorClass::ConnectionFatal
        );
        assert_eq!(classify("SCIDB_LE_NO_QUORUM"), ErrorClass::ConnectionFatal);
    }

    #[test]
    fn classifies_everything_else_as_query_local() {
        assert_eq!(
            classify("syntax error near 'foo'"),
            ErrorClass::QueryLocal
        );
    }

    #[test]
    fn query_id_none_has_zero_query_id() {
        assert!(QueryId::NONE.is_none());
        assert!(QueryId::default().is_none());
    }
}

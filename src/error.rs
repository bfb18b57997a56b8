//! Error types for the planner.
//!
//! Provider errors never escape the distance layer: they only choose the
//! great-circle fallback. Store and planner errors reach the caller.

use thiserror::Error;

use crate::model::RouteId;

/// Failures talking to the routing backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// Network-level failure (connection refused, DNS, reset).
    #[error("routing provider unavailable: {0}")]
    Unavailable(String),
    /// The daily request budget is spent.
    #[error("routing provider daily budget of {limit} requests exhausted")]
    BudgetExhausted { limit: u32 },
    /// The provider answered with a non-success status or code.
    #[error("routing provider returned status {status}: {message}")]
    Status { status: String, message: String },
    /// The payload could not be decoded or had the wrong shape.
    #[error("malformed routing provider payload: {0}")]
    Malformed(String),
    /// The request exceeded the configured timeout.
    #[error("routing provider timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl ProviderError {
    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            return Self::Timeout { timeout_secs };
        }
        if let Some(status) = err.status() {
            return Self::Status {
                status: status.to_string(),
                message: err.to_string(),
            };
        }
        if err.is_decode() {
            return Self::Malformed(err.to_string());
        }
        Self::Unavailable(err.to_string())
    }
}

/// Failures raised by an assignment store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A write would break a storage invariant.
    #[error("assignment conflict: {0}")]
    Conflict(String),
    /// A referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),
    /// The storage backend failed.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Errors surfaced to callers of the planner.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Applying a reoptimization failed and was rolled back.
    #[error("reoptimization of routes {routes:?} rolled back")]
    PersistenceConflict {
        routes: Vec<RouteId>,
        #[source]
        source: StoreError,
    },
    /// The genetic search could not run.
    #[error("team optimization failed: {0}")]
    OptimizationFailure(String),
    /// The coordinator state machine was asked for an illegal edge.
    #[error("invalid coordinator transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    /// A store read failed outside a transaction.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The HTTP client could not be built.
    #[error("failed to build routing client: {0}")]
    ProviderBuild(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_conflict_keeps_source() {
        let err = PlannerError::PersistenceConflict {
            routes: vec![RouteId::new("r1")],
            source: StoreError::Conflict("staff s1 already active".into()),
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("assignment conflict: staff s1 already active"));
    }

    #[test]
    fn budget_message_names_limit() {
        let err = ProviderError::BudgetExhausted { limit: 10 };
        assert!(err.to_string().contains("10 requests"));
    }
}

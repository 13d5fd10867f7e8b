//! Error taxonomy for the benchmark.
//!
//! Every variant is fatal to the run: workers surface it to the
//! [`BenchmarkRunner`](crate::benchmark::BenchmarkRunner), which aborts the
//! remaining workers and returns without a report.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the broker clients, the workers and the coordinator.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Establishing a client connection failed at the transport level.
    #[error("failed to connect {client_id} to {address}: {source}")]
    Connection {
        client_id: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The broker answered CONNECT with an ERROR frame.
    #[error("broker rejected connection for {client_id}: {message}")]
    ConnectionRejected { client_id: String, message: String },

    /// A send failed mid-run.
    #[error("delivery to {destination} failed: {source}")]
    Delivery {
        destination: String,
        #[source]
        source: std::io::Error,
    },

    /// The subscription stream ended before a single message arrived.
    #[error("subscription for {client_id} closed before any message arrived")]
    SubscriptionClosed { client_id: String },

    /// The peer sent something that is not a valid frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server argument is not `host:port`.
    #[error("invalid server address '{0}': expected host:port")]
    InvalidAddress(String),

    /// The optional global run deadline elapsed with workers still pending.
    #[error("{pending} worker(s) still running when the run deadline of {deadline:?} elapsed")]
    Stalled { pending: usize, deadline: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_culprit() {
        let err = BenchError::ConnectionRejected {
            client_id: "bench-sub#0".to_string(),
            message: "bad credentials".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "broker rejected connection for bench-sub#0: bad credentials"
        );

        let err = BenchError::Stalled {
            pending: 2,
            deadline: Duration::from_secs(5),
        };
        assert_eq!(
            err.to_string(),
            "2 worker(s) still running when the run deadline of 5s elapsed"
        );

        let err = BenchError::InvalidAddress("localhost".to_string());
        assert!(err.to_string().contains("expected host:port"));
    }
}

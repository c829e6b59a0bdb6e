//! Crate-wide error taxonomy.
//!
//! Codec- and framer-level failures never cross a component boundary raw:
//! the connection lifts them into [`Error::Protocol`] or
//! [`Error::ConnectionLost`], attaching the endpoint and the Bolt state at
//! the time of failure.

use crate::bolt::state::BoltState;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed URL, unknown scheme, missing adapter, invalid option.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// DNS, TCP, or TLS failure while establishing a connection.
    #[error("connection to {endpoint} failed: {detail}")]
    Connection { endpoint: String, detail: String },

    /// EOF, timeout, or socket error on an established connection.
    #[error("connection to {endpoint} lost in state {state}: {detail}")]
    ConnectionLost {
        endpoint: String,
        state: BoltState,
        detail: String,
    },

    /// The server rejected the presented credentials.
    #[error("authentication rejected by {endpoint}: [{code}] {message}")]
    Authentication {
        endpoint: String,
        code: String,
        message: String,
    },

    /// Unknown signature, illegal state transition, oversized chunk, or a
    /// broken decoder invariant.
    #[error("protocol violation on {endpoint} in state {state}: {detail}")]
    Protocol {
        endpoint: String,
        state: BoltState,
        detail: String,
    },

    /// The server selected none of the proposed protocol versions.
    #[error("no common Bolt version with {endpoint}")]
    Unsupported { endpoint: String },

    /// A FAILURE summary returned by the server.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// COMMIT or ROLLBACK failed; fatal to the current transaction.
    #[error("transaction error on {endpoint}: {detail}")]
    Transaction { endpoint: String, detail: String },

    /// No connection became available before the acquisition deadline.
    #[error("pool acquire timed out after {waited:?}")]
    PoolTimeout { waited: Duration },

    #[error("pool is closed")]
    PoolClosed,

    /// Raised by query composition when the same alias is bound to
    /// differing non-empty label sets.
    #[error("alias `{alias}` bound to conflicting labels {left:?} vs {right:?}")]
    AliasConflict {
        alias: String,
        left: Vec<String>,
        right: Vec<String>,
    },

    /// Cooperative cancellation observed at an await point.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether a transaction function may retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Server(e) => e.is_retryable(),
            Error::ConnectionLost { .. } => true,
            _ => false,
        }
    }
}

/// Server-returned FAILURE, classified by the code's second segment.
///
/// Codes follow the `Neo.<Classification>.<Category>.<Title>` shape on both
/// supported vendors.
#[derive(Debug, Clone, Error)]
#[error("server failure on {endpoint} in state {state}: [{code}] {message}")]
pub struct ServerError {
    pub endpoint: String,
    pub state: BoltState,
    pub code: String,
    pub message: String,
}

/// Error classification derived from a failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retryable: the same work may succeed on a fresh attempt.
    Transient,
    /// Caller mistake; never retried.
    Client,
    /// Server-side database error; never retried.
    Database,
    /// Unrecognized classification segment.
    Unknown,
}

/// Client-error codes that are retryable despite their classification.
const RETRYABLE_CLIENT_CODES: &[&str] = &[
    "Neo.ClientError.Security.AuthorizationExpired",
    "Neo.ClientError.Cluster.NotALeader",
    "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase",
];

impl ServerError {
    pub fn classification(&self) -> FailureClass {
        match self.code.split('.').nth(1) {
            Some("TransientError") => FailureClass::Transient,
            Some("ClientError") => FailureClass::Client,
            Some("DatabaseError") => FailureClass::Database,
            _ => FailureClass::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.classification() == FailureClass::Transient
            || RETRYABLE_CLIENT_CODES.contains(&self.code.as_str())
    }

    /// Cypher syntax or semantic rejection.
    pub fn is_query_error(&self) -> bool {
        self.code.contains(".Statement.")
    }

    pub fn is_authentication_error(&self) -> bool {
        self.code.contains(".Security.Unauthorized")
    }
}

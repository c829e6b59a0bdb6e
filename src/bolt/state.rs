//! The per-connection protocol state machine.
//!
//! ```text
//! State transitions:
//!
//! Disconnected --handshake--> Connected
//! Connected   --HELLO/SUCCESS--> Authenticated   (≥5.1)
//!                            --> Ready           (≤5.0, combined auth)
//! Authenticated --LOGON/SUCCESS--> Ready
//! Ready       --RUN/SUCCESS--> Streaming
//! Streaming   --PULL|DISCARD/SUCCESS--> Ready (or Streaming if has_more)
//! Ready       --BEGIN/SUCCESS--> TxReady
//! TxReady     --RUN/SUCCESS--> TxStreaming
//! TxStreaming --PULL|DISCARD/SUCCESS--> TxReady (or TxStreaming)
//! TxReady     --COMMIT|ROLLBACK/SUCCESS--> Ready
//! any         --FAILURE--> Failed
//! Failed      --RESET/SUCCESS--> Ready     (other requests draw IGNORED)
//! any         --GOODBYE / io loss--> Defunct
//! ```
//!
//! Exactly one request may be outstanding at a time; the connection
//! enforces that, the tracker enforces which requests a state permits.

use super::handshake::Version;
use super::message::{Request, Response};
use crate::packstream::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoltState {
    Disconnected,
    Connected,
    Authenticated,
    Ready,
    Streaming,
    TxReady,
    TxStreaming,
    Failed,
    Interrupted,
    Defunct,
}

impl fmt::Display for BoltState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoltState::Disconnected => "DISCONNECTED",
            BoltState::Connected => "CONNECTED",
            BoltState::Authenticated => "AUTHENTICATED",
            BoltState::Ready => "READY",
            BoltState::Streaming => "STREAMING",
            BoltState::TxReady => "TX_READY",
            BoltState::TxStreaming => "TX_STREAMING",
            BoltState::Failed => "FAILED",
            BoltState::Interrupted => "INTERRUPTED",
            BoltState::Defunct => "DEFUNCT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{request} may not be sent in state {state}")]
    IllegalSend {
        request: &'static str,
        state: BoltState,
    },

    #[error("{response} is not legal in state {state}")]
    IllegalResponse {
        response: &'static str,
        state: BoltState,
    },

    #[error("second FAILURE received before RESET")]
    DoubleFailure,
}

/// Tracks the state across sent requests and received responses.
#[derive(Debug)]
pub struct StateTracker {
    state: BoltState,
    version: Version,
}

impl StateTracker {
    /// A tracker for a connection that has completed the handshake.
    pub fn new(version: Version) -> Self {
        Self {
            state: BoltState::Connected,
            version,
        }
    }

    pub fn state(&self) -> BoltState {
        self.state
    }

    pub fn mark_defunct(&mut self) {
        self.state = BoltState::Defunct;
    }

    /// RESET is in flight: discard everything until its SUCCESS.
    pub fn mark_interrupted(&mut self) {
        self.state = BoltState::Interrupted;
    }

    pub fn resume_ready(&mut self) {
        self.state = BoltState::Ready;
    }

    /// Whether `request` may be sent right now. Does not change state.
    pub fn check_send(&self, request: &Request) -> Result<(), StateError> {
        let legal = match self.state {
            BoltState::Disconnected | BoltState::Defunct => false,
            BoltState::Connected => matches!(request, Request::Hello { .. }),
            BoltState::Authenticated => {
                matches!(request, Request::Logon { .. } | Request::Goodbye)
            }
            BoltState::Ready => matches!(
                request,
                Request::Run { .. }
                    | Request::Begin { .. }
                    | Request::Route { .. }
                    | Request::Telemetry { .. }
                    | Request::Reset
                    | Request::Goodbye
                    | Request::Logoff
            ),
            BoltState::Streaming | BoltState::TxStreaming => matches!(
                request,
                Request::Pull { .. } | Request::Discard { .. } | Request::Reset | Request::Goodbye
            ),
            BoltState::TxReady => matches!(
                request,
                Request::Run { .. }
                    | Request::Commit
                    | Request::Rollback
                    | Request::Reset
                    | Request::Goodbye
            ),
            // The server answers IGNORED to anything but RESET here; those
            // sends are legal, just fruitless.
            BoltState::Failed => !matches!(
                request,
                Request::Hello { .. } | Request::Logon { .. } | Request::Logoff
            ),
            BoltState::Interrupted => matches!(request, Request::Reset | Request::Goodbye),
        };
        if legal {
            Ok(())
        } else {
            Err(StateError::IllegalSend {
                request: request.name(),
                state: self.state,
            })
        }
    }

    /// Apply the response answering the request with signature
    /// `pending`, transitioning the state.
    pub fn on_response(&mut self, pending: u8, response: &Response) -> Result<(), StateError> {
        use super::message as msg;

        match response {
            Response::Failure(_) => {
                if self.state == BoltState::Failed {
                    return Err(StateError::DoubleFailure);
                }
                self.state = BoltState::Failed;
                Ok(())
            }
            Response::Ignored => match self.state {
                BoltState::Failed | BoltState::Interrupted => Ok(()),
                state => Err(StateError::IllegalResponse {
                    response: "IGNORED",
                    state,
                }),
            },
            Response::Record(_) => match self.state {
                BoltState::Streaming | BoltState::TxStreaming | BoltState::Interrupted => Ok(()),
                state => Err(StateError::IllegalResponse {
                    response: "RECORD",
                    state,
                }),
            },
            Response::Success(meta) => {
                self.state = match (pending, self.state) {
                    (msg::SIG_HELLO, BoltState::Connected) => {
                        if self.version.separate_logon() {
                            BoltState::Authenticated
                        } else {
                            BoltState::Ready
                        }
                    }
                    (msg::SIG_LOGON, BoltState::Authenticated) => BoltState::Ready,
                    (msg::SIG_LOGOFF, BoltState::Ready) => BoltState::Authenticated,
                    (msg::SIG_RUN, BoltState::Ready) => BoltState::Streaming,
                    (msg::SIG_RUN, BoltState::TxReady) => BoltState::TxStreaming,
                    (msg::SIG_BEGIN, BoltState::Ready) => BoltState::TxReady,
                    (msg::SIG_COMMIT | msg::SIG_ROLLBACK, BoltState::TxReady) => BoltState::Ready,
                    (msg::SIG_PULL | msg::SIG_DISCARD, BoltState::Streaming) => {
                        if has_more(meta) {
                            BoltState::Streaming
                        } else {
                            BoltState::Ready
                        }
                    }
                    (msg::SIG_PULL | msg::SIG_DISCARD, BoltState::TxStreaming) => {
                        if has_more(meta) {
                            BoltState::TxStreaming
                        } else {
                            BoltState::TxReady
                        }
                    }
                    (msg::SIG_RESET, _) => BoltState::Ready,
                    (msg::SIG_ROUTE | msg::SIG_TELEMETRY, BoltState::Ready) => BoltState::Ready,
                    (_, state) => {
                        return Err(StateError::IllegalResponse {
                            response: "SUCCESS",
                            state,
                        })
                    }
                };
                Ok(())
            }
        }
    }
}

fn has_more(meta: &crate::packstream::ValueMap) -> bool {
    matches!(meta.get("has_more"), Some(Value::Bool(true)))
}

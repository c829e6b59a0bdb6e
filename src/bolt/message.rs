//! The closed Bolt message catalog.
//!
//! Signatures are fixed by the protocol and preserved bit-exactly. The
//! catalog owns the field layout of every message; the Packstream codec
//! stays signature-agnostic.

use crate::packstream::{self, PackstreamError, Structure, Value, ValueMap};
use thiserror::Error;

// Request signatures.
pub const SIG_HELLO: u8 = 0x01;
pub const SIG_GOODBYE: u8 = 0x02;
pub const SIG_RESET: u8 = 0x0F;
pub const SIG_RUN: u8 = 0x10;
pub const SIG_BEGIN: u8 = 0x11;
pub const SIG_COMMIT: u8 = 0x12;
pub const SIG_ROLLBACK: u8 = 0x13;
pub const SIG_DISCARD: u8 = 0x2F;
pub const SIG_PULL: u8 = 0x3F;
pub const SIG_TELEMETRY: u8 = 0x54;
pub const SIG_ROUTE: u8 = 0x66;
pub const SIG_LOGON: u8 = 0x6A;
pub const SIG_LOGOFF: u8 = 0x6B;

// Response signatures.
pub const SIG_SUCCESS: u8 = 0x70;
pub const SIG_RECORD: u8 = 0x71;
pub const SIG_IGNORED: u8 = 0x7E;
pub const SIG_FAILURE: u8 = 0x7F;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error(transparent)]
    Packstream(#[from] PackstreamError),

    #[error("unknown response signature 0x{0:02X}")]
    UnknownSignature(u8),

    #[error("message is not a structure")]
    NotAStructure,

    #[error("bad field layout for {0}")]
    BadLayout(&'static str),
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub enum Request {
    Hello { extra: ValueMap },
    Logon { auth: ValueMap },
    Logoff,
    Goodbye,
    Reset,
    Run {
        query: String,
        parameters: ValueMap,
        extra: ValueMap,
    },
    Begin { extra: ValueMap },
    Commit,
    Rollback,
    Discard { extra: ValueMap },
    Pull { extra: ValueMap },
    Route {
        routing: ValueMap,
        bookmarks: Vec<String>,
        extra: ValueMap,
    },
    Telemetry { api: i64 },
}

impl Request {
    pub fn signature(&self) -> u8 {
        match self {
            Request::Hello { .. } => SIG_HELLO,
            Request::Logon { .. } => SIG_LOGON,
            Request::Logoff => SIG_LOGOFF,
            Request::Goodbye => SIG_GOODBYE,
            Request::Reset => SIG_RESET,
            Request::Run { .. } => SIG_RUN,
            Request::Begin { .. } => SIG_BEGIN,
            Request::Commit => SIG_COMMIT,
            Request::Rollback => SIG_ROLLBACK,
            Request::Discard { .. } => SIG_DISCARD,
            Request::Pull { .. } => SIG_PULL,
            Request::Route { .. } => SIG_ROUTE,
            Request::Telemetry { .. } => SIG_TELEMETRY,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "HELLO",
            Request::Logon { .. } => "LOGON",
            Request::Logoff => "LOGOFF",
            Request::Goodbye => "GOODBYE",
            Request::Reset => "RESET",
            Request::Run { .. } => "RUN",
            Request::Begin { .. } => "BEGIN",
            Request::Commit => "COMMIT",
            Request::Rollback => "ROLLBACK",
            Request::Discard { .. } => "DISCARD",
            Request::Pull { .. } => "PULL",
            Request::Route { .. } => "ROUTE",
            Request::Telemetry { .. } => "TELEMETRY",
        }
    }

    /// GOODBYE is fire-and-forget; everything else is answered by exactly
    /// one summary (preceded by records for PULL/DISCARD).
    pub fn expects_response(&self) -> bool {
        !matches!(self, Request::Goodbye)
    }

    fn fields(&self) -> Vec<Value> {
        match self {
            Request::Hello { extra } => vec![Value::Map(extra.clone())],
            Request::Logon { auth } => vec![Value::Map(auth.clone())],
            Request::Logoff
            | Request::Goodbye
            | Request::Reset
            | Request::Commit
            | Request::Rollback => vec![],
            Request::Run {
                query,
                parameters,
                extra,
            } => vec![
                Value::String(query.clone()),
                Value::Map(parameters.clone()),
                Value::Map(extra.clone()),
            ],
            Request::Begin { extra } => vec![Value::Map(extra.clone())],
            Request::Discard { extra } | Request::Pull { extra } => {
                vec![Value::Map(extra.clone())]
            }
            Request::Route {
                routing,
                bookmarks,
                extra,
            } => vec![
                Value::Map(routing.clone()),
                Value::List(bookmarks.iter().cloned().map(Value::String).collect()),
                Value::Map(extra.clone()),
            ],
            Request::Telemetry { api } => vec![Value::Int(*api)],
        }
    }

    /// Serialize to message bytes, ready for the framer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PackstreamError> {
        let structure = Structure::new(self.signature(), self.fields());
        packstream::encode_to_vec(&Value::Structure(structure))
    }
}

/// An incoming response: a streamed record or one of the three summaries.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(ValueMap),
    Failure(ValueMap),
    Ignored,
    Record(Vec<Value>),
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Response::Success(_) => "SUCCESS",
            Response::Failure(_) => "FAILURE",
            Response::Ignored => "IGNORED",
            Response::Record(_) => "RECORD",
        }
    }

    /// True for SUCCESS/FAILURE/IGNORED; false for RECORD.
    pub fn is_summary(&self) -> bool {
        !matches!(self, Response::Record(_))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let value = packstream::decode_exact(bytes)?;
        let structure = match value {
            Value::Structure(s) => s,
            _ => return Err(MessageError::NotAStructure),
        };
        Self::from_structure(structure)
    }

    pub fn from_structure(structure: Structure) -> Result<Self, MessageError> {
        let Structure { signature, fields } = structure;
        match signature {
            SIG_SUCCESS => Ok(Response::Success(take_metadata(fields, "SUCCESS")?)),
            SIG_FAILURE => Ok(Response::Failure(take_metadata(fields, "FAILURE")?)),
            SIG_IGNORED => Ok(Response::Ignored),
            SIG_RECORD => {
                let mut fields = fields;
                match fields.pop() {
                    Some(Value::List(values)) if fields.is_empty() => {
                        Ok(Response::Record(values))
                    }
                    _ => Err(MessageError::BadLayout("RECORD")),
                }
            }
            other => Err(MessageError::UnknownSignature(other)),
        }
    }

    /// Failure code, when this is a FAILURE summary.
    pub fn failure_code(&self) -> Option<&str> {
        match self {
            Response::Failure(meta) => meta.get("code").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn failure_message(&self) -> Option<&str> {
        match self {
            Response::Failure(meta) => meta.get("message").and_then(Value::as_str),
            _ => None,
        }
    }
}

fn take_metadata(mut fields: Vec<Value>, name: &'static str) -> Result<ValueMap, MessageError> {
    match fields.pop() {
        None => Ok(ValueMap::new()),
        Some(Value::Map(meta)) if fields.is_empty() => Ok(meta),
        _ => Err(MessageError::BadLayout(name)),
    }
}

//! A single Bolt connection: socket, framer, and state machine under one
//! owner.
//!
//! One cooperative task owns the connection at any time (the pool enforces
//! this by handing out exclusive guards), so no lock sits around the
//! socket. Exactly one request may be outstanding; responses are matched to
//! requests in send order via the pending queue.

use super::chunk::{self, FrameError};
use super::handshake::{self, Negotiated};
use super::message::{Request, Response, SIG_RESET};
use super::state::{BoltState, StateTracker};
use super::stream::BoltStream;
use crate::config::{AuthToken, ConnectionConfig, DriverConfig, Endpoint};
use crate::errors::{Error, Result, ServerError};
use crate::packstream::{Value, ValueMap};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub use super::handshake::Version;

/// Server identity captured during connect.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub agent: String,
    pub connection_id: String,
    pub version: Version,
}

pub struct BoltConnection {
    endpoint: Endpoint,
    stream: BoltStream,
    tracker: StateTracker,
    version: Version,
    server_agent: String,
    connection_id: String,
    last_bookmark: Option<String>,
    read_timeout: Duration,
    last_used: Instant,
    /// Signatures of requests whose summary has not arrived yet.
    pending: VecDeque<u8>,
    /// Set when a consumer abandoned responses mid-stream; cleared by RESET.
    drain_required: bool,
}

impl BoltConnection {
    /// TCP/TLS setup, version handshake, HELLO, and LOGON (≥5.1). Returns
    /// a connection in `Ready`.
    pub async fn connect(config: &ConnectionConfig, driver: &DriverConfig) -> Result<Self> {
        let endpoint = config.endpoint.clone();
        let mut stream =
            BoltStream::connect(&endpoint, config.tls, driver.connect_timeout).await?;

        let version = negotiate(&mut stream, &endpoint, driver.connect_timeout).await?;
        info!(endpoint = %endpoint, version = %version, "bolt version negotiated");

        let mut conn = Self {
            endpoint,
            stream,
            tracker: StateTracker::new(version),
            version,
            server_agent: String::new(),
            connection_id: String::new(),
            last_bookmark: None,
            read_timeout: driver.read_timeout,
            last_used: Instant::now(),
            pending: VecDeque::new(),
            drain_required: false,
        };

        conn.authenticate(&config.auth, &driver.user_agent).await?;
        debug!(
            endpoint = %conn.endpoint,
            server = %conn.server_agent,
            connection_id = %conn.connection_id,
            "connection ready"
        );
        Ok(conn)
    }

    async fn authenticate(&mut self, auth: &AuthToken, user_agent: &str) -> Result<()> {
        let mut extra = ValueMap::new();
        extra.insert("user_agent".into(), Value::String(user_agent.to_owned()));
        if !self.version.separate_logon() {
            // Combined HELLO carries the auth fields directly.
            for (key, value) in auth.to_metadata() {
                extra.insert(key, value);
            }
        }

        let hello = self.request(&Request::Hello { extra }).await?;
        let meta = self.expect_success(hello)?;
        if let Some(agent) = meta.get("server").and_then(Value::as_str) {
            self.server_agent = agent.to_owned();
        }
        if let Some(id) = meta.get("connection_id").and_then(Value::as_str) {
            self.connection_id = id.to_owned();
        }

        if self.version.separate_logon() {
            let logon = self
                .request(&Request::Logon {
                    auth: auth.to_metadata(),
                })
                .await?;
            self.expect_success(logon)?;
        }
        Ok(())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> BoltState {
        self.tracker.state()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            agent: self.server_agent.clone(),
            connection_id: self.connection_id.clone(),
            version: self.version,
        }
    }

    /// Last bookmark surfaced by a COMMIT summary on this connection.
    pub fn last_bookmark(&self) -> Option<&str> {
        self.last_bookmark.as_deref()
    }

    pub fn note_bookmark(&mut self, bookmark: impl Into<String>) {
        self.last_bookmark = Some(bookmark.into());
    }

    /// Send one request. Rejected without touching the socket when the
    /// state machine does not permit it.
    pub async fn send(&mut self, request: &Request) -> Result<()> {
        self.tracker
            .check_send(request)
            .map_err(|e| self.protocol_error(e.to_string()))?;

        let bytes = request
            .to_bytes()
            .map_err(|e| self.protocol_error(format!("encoding {}: {e}", request.name())))?;
        debug!(endpoint = %self.endpoint, message = request.name(), "send");
        chunk::write_message(&mut self.stream, &bytes)
            .await
            .map_err(|e| self.lift_frame(e))?;

        if request.expects_response() {
            self.pending.push_back(request.signature());
        }
        self.last_used = Instant::now();
        Ok(())
    }

    /// Receive the next response for the oldest outstanding request.
    pub async fn recv(&mut self) -> Result<Response> {
        let pending_sig = *self
            .pending
            .front()
            .ok_or_else(|| self.protocol_error_ref("recv with no request outstanding"))?;

        let response = self.read_response().await?;
        self.tracker
            .on_response(pending_sig, &response)
            .map_err(|e| self.protocol_error(e.to_string()))?;

        if response.is_summary() {
            self.pending.pop_front();
        }
        debug!(endpoint = %self.endpoint, message = response.name(), "recv");
        self.last_used = Instant::now();
        Ok(response)
    }

    /// `send` + `recv`, for requests answered by a single summary.
    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        self.send(request).await?;
        self.recv().await
    }

    /// Convenience used by the session: RUN and return the SUCCESS
    /// metadata (field names, qid).
    pub async fn run(
        &mut self,
        query: &str,
        parameters: ValueMap,
        extra: ValueMap,
    ) -> Result<ValueMap> {
        let response = self
            .request(&Request::Run {
                query: query.to_owned(),
                parameters,
                extra,
            })
            .await?;
        self.expect_success(response)
    }

    /// Map a summary into `Ok(metadata)` or the matching error.
    pub fn expect_success(&mut self, response: Response) -> Result<ValueMap> {
        match response {
            Response::Success(meta) => Ok(meta),
            Response::Failure(meta) => Err(self.failure_error(&meta)),
            Response::Ignored => {
                Err(self.protocol_error_ref("request ignored; RESET required first"))
            }
            Response::Record(_) => {
                Err(self.protocol_error_ref("unexpected RECORD in place of a summary"))
            }
        }
    }

    /// Build the error for a FAILURE summary, classifying authentication
    /// rejections separately.
    pub fn failure_error(&self, meta: &ValueMap) -> Error {
        let code = meta
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("Neo.DatabaseError.General.UnknownError")
            .to_owned();
        let message = meta
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if code.contains(".Security.Unauthorized") {
            return Error::Authentication {
                endpoint: self.endpoint.to_string(),
                code,
                message,
            };
        }
        Error::Server(ServerError {
            endpoint: self.endpoint.to_string(),
            state: self.tracker.state(),
            code,
            message,
        })
    }

    /// Force-drain back to `Ready`. Idempotent; safe to call on a suspect
    /// connection before returning it to the pool.
    pub async fn reset(&mut self) -> Result<()> {
        match self.tracker.state() {
            BoltState::Defunct => {
                return Err(Error::ConnectionLost {
                    endpoint: self.endpoint.to_string(),
                    state: BoltState::Defunct,
                    detail: "cannot reset a defunct connection".into(),
                })
            }
            BoltState::Ready if self.pending.is_empty() && !self.drain_required => return Ok(()),
            _ => {}
        }

        let bytes = Request::Reset
            .to_bytes()
            .map_err(|e| self.protocol_error(format!("encoding RESET: {e}")))?;
        self.tracker.mark_interrupted();
        chunk::write_message(&mut self.stream, &bytes)
            .await
            .map_err(|e| self.lift_frame(e))?;
        self.pending.push_back(SIG_RESET);
        debug!(endpoint = %self.endpoint, "reset: draining to READY");

        // Everything up to RESET's own summary is stale output of
        // cancelled or failed work; records are discarded outright.
        loop {
            let response = self.read_response().await?;
            if !response.is_summary() {
                continue;
            }
            let answered = self.pending.pop_front();
            if answered != Some(SIG_RESET) {
                continue;
            }
            return match response {
                Response::Success(_) => {
                    self.tracker.resume_ready();
                    self.drain_required = false;
                    self.last_used = Instant::now();
                    Ok(())
                }
                other => {
                    self.tracker.mark_defunct();
                    Err(self.protocol_error(format!("RESET answered with {}", other.name())))
                }
            };
        }
    }

    /// Send GOODBYE best-effort, close the socket, and mark `Defunct`.
    pub async fn close(&mut self) {
        if self.tracker.state() != BoltState::Defunct {
            if let Ok(bytes) = Request::Goodbye.to_bytes() {
                if let Err(e) = chunk::write_message(&mut self.stream, &bytes).await {
                    debug!(endpoint = %self.endpoint, "GOODBYE not delivered: {e}");
                }
            }
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!(endpoint = %self.endpoint, "socket shutdown: {e}");
        }
        self.tracker.mark_defunct();
    }

    /// True iff the connection can serve a request as-is: `Ready`, nothing
    /// pending, and recently used.
    pub fn is_viable(&self, idle_ttl: Duration) -> bool {
        self.tracker.state() == BoltState::Ready
            && self.pending.is_empty()
            && !self.drain_required
            && self.last_used.elapsed() <= idle_ttl
    }

    /// Whether the pool must RESET before reuse. A non-empty pending queue
    /// means a consumer was cancelled mid-response.
    pub fn needs_reset(&self) -> bool {
        self.tracker.state() != BoltState::Defunct
            && (self.drain_required
                || !self.pending.is_empty()
                || self.tracker.state() != BoltState::Ready)
    }

    pub fn is_defunct(&self) -> bool {
        self.tracker.state() == BoltState::Defunct
    }

    /// Record that buffered responses were abandoned (dropped stream,
    /// cancelled transaction). The pool will RESET before reuse.
    pub fn mark_drain_required(&mut self) {
        self.drain_required = true;
    }

    /// Cheap server round-trip used to validate an idle connection.
    pub async fn probe(&mut self, statement: &str) -> Result<()> {
        let mut extra = ValueMap::new();
        extra.insert("mode".into(), Value::String("r".into()));
        self.run(statement, ValueMap::new(), extra).await?;

        let mut pull = ValueMap::new();
        pull.insert("n".into(), Value::Int(-1));
        self.send(&Request::Pull { extra: pull }).await?;
        loop {
            let response = self.recv().await?;
            if response.is_summary() {
                self.expect_success(response)?;
                return Ok(());
            }
        }
    }

    async fn read_response(&mut self) -> Result<Response> {
        let bytes = chunk::read_message(&mut self.stream, self.read_timeout)
            .await
            .map_err(|e| self.lift_frame(e))?;
        Response::from_bytes(&bytes).map_err(|e| self.protocol_error(e.to_string()))
    }

    fn lift_frame(&mut self, error: FrameError) -> Error {
        match error {
            FrameError::MessageTooLarge => self.protocol_error(error.to_string()),
            other => {
                let state = self.tracker.state();
                self.tracker.mark_defunct();
                warn!(endpoint = %self.endpoint, "connection lost: {other}");
                Error::ConnectionLost {
                    endpoint: self.endpoint.to_string(),
                    state,
                    detail: other.to_string(),
                }
            }
        }
    }

    fn protocol_error(&self, detail: String) -> Error {
        Error::Protocol {
            endpoint: self.endpoint.to_string(),
            state: self.tracker.state(),
            detail,
        }
    }

    fn protocol_error_ref(&self, detail: &str) -> Error {
        self.protocol_error(detail.to_owned())
    }
}

impl std::fmt::Debug for BoltConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltConnection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.tracker.state())
            .field("version", &self.version)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

async fn negotiate(
    stream: &mut BoltStream,
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<Version> {
    use tokio::io::AsyncReadExt;

    let opening = handshake::client_opening();
    stream
        .write_all(&opening)
        .await
        .map_err(|e| Error::Connection {
            endpoint: endpoint.to_string(),
            detail: format!("handshake write failed: {e}"),
        })?;
    stream.flush().await.map_err(|e| Error::Connection {
        endpoint: endpoint.to_string(),
        detail: format!("handshake write failed: {e}"),
    })?;

    let mut reply = [0u8; 4];
    tokio::time::timeout(timeout, stream.read_exact(&mut reply))
        .await
        .map_err(|_| Error::Connection {
            endpoint: endpoint.to_string(),
            detail: format!("handshake timed out after {timeout:?}"),
        })?
        .map_err(|e| Error::Connection {
            endpoint: endpoint.to_string(),
            detail: format!("handshake read failed: {e}"),
        })?;

    match handshake::parse_reply(reply) {
        Negotiated::Version(v) if v.supported() => Ok(v),
        Negotiated::Version(_) | Negotiated::Unsupported => Err(Error::Unsupported {
            endpoint: endpoint.to_string(),
        }),
        Negotiated::Malformed(raw) => Err(Error::Protocol {
            endpoint: endpoint.to_string(),
            state: BoltState::Disconnected,
            detail: format!("malformed handshake reply {}", hex::encode(raw)),
        }),
    }
}

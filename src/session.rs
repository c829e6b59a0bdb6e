//! Sessions: a transaction-scoped façade over one borrowed connection.
//!
//! A session owns its pooled connection for its whole lifetime; dropping
//! the session returns the connection. Explicit transactions borrow the
//! session mutably, so a second concurrent transaction (or an auto-commit
//! run inside one) is rejected at compile time.

use crate::bolt::connection::BoltConnection;
use crate::bolt::message::Request;
use crate::config::RetryPolicy;
use crate::errors::{Error, Result};
use crate::packstream::{Value, ValueMap};
use crate::pool::PooledConnection;
use crate::result::RecordStream;
use crate::vendor::VendorAdapter;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Routing hint carried in BEGIN/RUN metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

/// Per-session settings.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub database: Option<String>,
    pub default_access_mode: AccessMode,
    /// Server-side user to impersonate, where supported.
    pub impersonated_user: Option<String>,
    /// Starting bookmark for causal chaining within this session.
    pub bookmark: Option<String>,
}

/// Extra transaction settings for BEGIN.
#[derive(Debug, Clone, Default)]
pub struct TxConfig {
    pub metadata: Option<ValueMap>,
    pub timeout: Option<Duration>,
}

pub struct Session {
    conn: PooledConnection,
    config: SessionConfig,
    vendor: &'static dyn VendorAdapter,
    retry: RetryPolicy,
    bookmark: Option<String>,
}

impl Session {
    pub(crate) fn new(
        conn: PooledConnection,
        config: SessionConfig,
        vendor: &'static dyn VendorAdapter,
        retry: RetryPolicy,
    ) -> Self {
        let bookmark = config.bookmark.clone();
        Self {
            conn,
            config,
            vendor,
            retry,
            bookmark,
        }
    }

    /// Bookmark from the most recent completed work in this session.
    pub fn last_bookmark(&self) -> Option<&str> {
        self.conn.last_bookmark().or(self.bookmark.as_deref())
    }

    /// Auto-commit run with the session's default access mode.
    pub async fn run(
        &mut self,
        query: &str,
        parameters: ValueMap,
    ) -> Result<RecordStream<'_>> {
        self.run_with(query, parameters, self.config.default_access_mode)
            .await
    }

    /// Auto-commit run: RUN followed by PULL(all), returning the lazy
    /// record stream.
    pub async fn run_with(
        &mut self,
        query: &str,
        parameters: ValueMap,
        mode: AccessMode,
    ) -> Result<RecordStream<'_>> {
        // A previous statement may have been dropped mid-stream.
        cleanup(&mut self.conn).await;
        let extra = self.statement_extra(mode);
        match run_and_pull(&mut self.conn, query, parameters, extra).await {
            Ok(fields) => Ok(RecordStream::new(&mut self.conn, fields)),
            Err(e) => {
                cleanup(&mut self.conn).await;
                Err(e)
            }
        }
    }

    /// Open an explicit transaction with default settings.
    pub async fn begin_transaction(&mut self) -> Result<Transaction<'_>> {
        self.begin_transaction_with(TxConfig::default()).await
    }

    pub async fn begin_transaction_with(
        &mut self,
        tx_config: TxConfig,
    ) -> Result<Transaction<'_>> {
        let mode = self.config.default_access_mode;
        let mut tx = Transaction::new(self, mode, tx_config);
        tx.begin().await?;
        Ok(tx)
    }

    /// Run `work` inside a read transaction, retrying transient failures.
    ///
    /// The work function receives the [`Transaction`] by value and hands
    /// it back alongside its result; the wrapper owns BEGIN, COMMIT,
    /// ROLLBACK, and the retry schedule.
    pub async fn read_transaction<'s, T, W, Fut>(&'s mut self, work: W) -> Result<T>
    where
        W: FnMut(Transaction<'s>) -> Fut,
        Fut: Future<Output = (Transaction<'s>, Result<T>)>,
    {
        Session::transaction_with_retry(self, AccessMode::Read, work).await
    }

    /// Run `work` inside a write transaction, retrying transient failures.
    pub async fn write_transaction<'s, T, W, Fut>(&'s mut self, work: W) -> Result<T>
    where
        W: FnMut(Transaction<'s>) -> Fut,
        Fut: Future<Output = (Transaction<'s>, Result<T>)>,
    {
        Session::transaction_with_retry(self, AccessMode::Write, work).await
    }

    async fn transaction_with_retry<'s, T, W, Fut>(
        session: &'s mut Session,
        mode: AccessMode,
        mut work: W,
    ) -> Result<T>
    where
        W: FnMut(Transaction<'s>) -> Fut,
        Fut: Future<Output = (Transaction<'s>, Result<T>)>,
    {
        let policy = session.retry;
        let started = Instant::now();
        let mut delay = policy.initial_delay;
        let mut tx = Transaction::new(session, mode, TxConfig::default());

        loop {
            let error = match tx.begin().await {
                Err(e) => e,
                Ok(()) => {
                    let (returned, outcome) = work(tx).await;
                    tx = returned;
                    match outcome {
                        Ok(value) => match tx.commit().await {
                            Ok(()) => return Ok(value),
                            Err(e) => {
                                // The commit may have been applied
                                // server-side; replaying the work could
                                // double-apply. Terminal no matter the
                                // error kind.
                                tx.abandon().await;
                                return Err(e);
                            }
                        },
                        Err(e) => e,
                    }
                }
            };

            tx.abandon().await;
            if !error.is_retryable() {
                return Err(error);
            }
            let sleep_for = jittered(delay, policy.jitter);
            if started.elapsed() + sleep_for > policy.max_elapsed {
                warn!("transaction retry budget exhausted: {error}");
                return Err(error);
            }
            debug!("transient failure, retrying in {sleep_for:?}: {error}");
            tokio::time::sleep(sleep_for).await;
            delay = Duration::from_secs_f64(delay.as_secs_f64() * policy.multiplier);
        }
    }

    fn statement_extra(&self, mode: AccessMode) -> ValueMap {
        let mut extra = ValueMap::new();
        if self.vendor.supports_access_modes() && mode == AccessMode::Read {
            extra.insert("mode".into(), Value::String("r".into()));
        }
        if let Some(db) = self.database() {
            extra.insert("db".into(), Value::String(db));
        }
        if let Some(user) = &self.config.impersonated_user {
            extra.insert("imp_user".into(), Value::String(user.clone()));
        }
        if let Some(bookmark) = self.last_bookmark() {
            extra.insert(
                "bookmarks".into(),
                Value::List(vec![Value::String(bookmark.to_owned())]),
            );
        }
        extra
    }

    fn database(&self) -> Option<String> {
        self.config
            .database
            .clone()
            .or_else(|| self.vendor.default_database().map(str::to_owned))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.config.database)
            .field("mode", &self.config.default_access_mode)
            .finish_non_exhaustive()
    }
}

/// Send RUN then PULL(all); returns the projected field names.
async fn run_and_pull(
    conn: &mut BoltConnection,
    query: &str,
    parameters: ValueMap,
    extra: ValueMap,
) -> Result<Vec<String>> {
    let meta = conn.run(query, parameters, extra).await?;
    let fields = meta
        .get("fields")
        .and_then(Value::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default();

    let mut pull = ValueMap::new();
    pull.insert("n".into(), Value::Int(-1));
    conn.send(&Request::Pull { extra: pull }).await?;
    Ok(fields)
}

/// Best-effort recovery after a failed statement: RESET back to `Ready` so
/// the session (and later the pool) can keep using the connection.
async fn cleanup(conn: &mut BoltConnection) {
    if conn.is_defunct() || !conn.needs_reset() {
        return;
    }
    if let Err(e) = conn.reset().await {
        debug!("post-failure reset failed: {e}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    Active,
    Closed,
}

/// An explicit transaction. Created by [`Session::begin_transaction`] or
/// handed to a transaction function.
///
/// Dropping an active transaction marks the connection for RESET, which
/// rolls the server-side transaction back when the pool reclaims it.
pub struct Transaction<'s> {
    session: &'s mut Session,
    mode: AccessMode,
    config: TxConfig,
    state: TxState,
}

impl<'s> Transaction<'s> {
    fn new(session: &'s mut Session, mode: AccessMode, config: TxConfig) -> Self {
        Self {
            session,
            mode,
            config,
            state: TxState::Idle,
        }
    }

    async fn begin(&mut self) -> Result<()> {
        if self.state == TxState::Active {
            return Err(Error::Transaction {
                endpoint: self.session.conn.endpoint().to_string(),
                detail: "transaction already open".into(),
            });
        }
        // A prior attempt may have left the connection in FAILED.
        cleanup(&mut self.session.conn).await;

        let mut extra = self.session.statement_extra(self.mode);
        if let Some(timeout) = self.config.timeout {
            extra.insert("tx_timeout".into(), Value::Int(timeout.as_millis() as i64));
        }
        if let Some(metadata) = &self.config.metadata {
            extra.insert("tx_metadata".into(), Value::Map(metadata.clone()));
        }

        let response = self.session.conn.request(&Request::Begin { extra }).await?;
        self.session.conn.expect_success(response)?;
        self.state = TxState::Active;
        Ok(())
    }

    /// Execute a statement inside this transaction.
    pub async fn run(
        &mut self,
        query: &str,
        parameters: ValueMap,
    ) -> Result<RecordStream<'_>> {
        self.ensure_active()?;
        let fields =
            run_and_pull(&mut self.session.conn, query, parameters, ValueMap::new()).await?;
        Ok(RecordStream::new(&mut self.session.conn, fields))
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        let response = self
            .session
            .conn
            .request(&Request::Commit)
            .await
            .map_err(|e| self.commit_failure(e))?;
        let meta = self
            .session
            .conn
            .expect_success(response)
            .map_err(|e| self.commit_failure(e))?;
        if let Some(bookmark) = meta.get("bookmark").and_then(Value::as_str) {
            self.session.conn.note_bookmark(bookmark.to_owned());
            self.session.bookmark = Some(bookmark.to_owned());
        }
        self.state = TxState::Closed;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        let response = self.session.conn.request(&Request::Rollback).await?;
        self.session.conn.expect_success(response)?;
        self.state = TxState::Closed;
        Ok(())
    }

    /// Best-effort teardown between retry attempts: roll back if possible,
    /// otherwise reset.
    async fn abandon(&mut self) {
        if self.state == TxState::Active {
            if let Err(e) = self.rollback().await {
                debug!("rollback during retry failed: {e}");
            }
        }
        self.state = TxState::Idle;
        cleanup(&mut self.session.conn).await;
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state == TxState::Active {
            Ok(())
        } else {
            Err(Error::Transaction {
                endpoint: self.session.conn.endpoint().to_string(),
                detail: "no open transaction".into(),
            })
        }
    }

    fn commit_failure(&self, source: Error) -> Error {
        // A failed COMMIT is fatal for the transaction regardless of the
        // underlying error kind; the retry loop returns it without
        // consulting `is_retryable`. A lost connection is surfaced
        // unchanged so the caller sees the commit-ambiguous condition.
        match source {
            e @ Error::ConnectionLost { .. } => e,
            other => Error::Transaction {
                endpoint: self.session.conn.endpoint().to_string(),
                detail: other.to_string(),
            },
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            self.session.conn.mark_drain_required();
        }
    }
}

fn jittered(base: Duration, jitter: f64) -> Duration {
    let factor = 1.0 + jitter * (rand::thread_rng().gen::<f64>() * 2.0 - 1.0);
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
}

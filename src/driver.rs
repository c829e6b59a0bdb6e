//! The user-facing entry point: configuration, pool, and vendor dialect
//! under one handle.

use crate::bolt::connection::ServerInfo;
use crate::bolt::message::Request;
use crate::config::{ConnectionConfig, DriverConfig};
use crate::errors::{Error, Result};
use crate::packstream::{Value, ValueMap};
use crate::pool::{Pool, PoolStats};
use crate::result::{Record, Summary};
use crate::session::{Session, SessionConfig};
use crate::url::parse_url;
use crate::vendor::{Vendor, VendorAdapter};

/// A handle to one endpoint: cheap to clone, safe to share across tasks.
#[derive(Debug, Clone)]
pub struct Driver {
    conn_config: ConnectionConfig,
    config: DriverConfig,
    pool: Pool,
    adapter: &'static dyn VendorAdapter,
}

impl Driver {
    pub fn new(conn_config: ConnectionConfig, config: DriverConfig) -> Self {
        let adapter = conn_config.vendor.adapter();
        let pool = Pool::new(
            conn_config.clone(),
            config.clone(),
            adapter.liveness_probe(),
        );
        Self {
            conn_config,
            config,
            pool,
            adapter,
        }
    }

    /// Build a driver from a connection URL with default settings.
    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self::new(parse_url(url)?, DriverConfig::default()))
    }

    pub fn from_url_with(url: &str, config: DriverConfig) -> Result<Self> {
        Ok(Self::new(parse_url(url)?, config))
    }

    pub fn vendor(&self) -> Vendor {
        self.conn_config.vendor
    }

    pub fn adapter(&self) -> &'static dyn VendorAdapter {
        self.adapter
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Open a session with default settings.
    pub async fn session(&self) -> Result<Session> {
        self.session_with(SessionConfig::default()).await
    }

    /// Open a session, borrowing one pooled connection for its lifetime.
    pub async fn session_with(&self, mut config: SessionConfig) -> Result<Session> {
        if config.database.is_none() {
            config.database = self.conn_config.database.clone();
        }
        let conn = self.pool.acquire().await?;
        Ok(Session::new(conn, config, self.adapter, self.config.retry))
    }

    /// Acquire, run, and eagerly collect in one call.
    pub async fn execute_query(
        &self,
        query: &str,
        parameters: ValueMap,
    ) -> Result<(Vec<Record>, Summary)> {
        let mut session = self.session().await?;
        let stream = session.run(query, parameters).await?;
        stream.collect().await
    }

    /// Round-trip to the server and report its identity.
    pub async fn verify_connectivity(&self) -> Result<ServerInfo> {
        let conn = self.pool.acquire().await?;
        Ok(conn.server_info())
    }

    /// Fetch the raw routing table. Rejected client-side on dialects
    /// without routing support.
    pub async fn route(&self, database: Option<&str>) -> Result<ValueMap> {
        if !self.adapter.supports_routing() {
            return Err(Error::Configuration(format!(
                "{} does not support ROUTE",
                self.vendor()
            )));
        }
        let mut routing = ValueMap::new();
        routing.insert(
            "address".into(),
            Value::String(self.conn_config.endpoint.to_string()),
        );
        let mut extra = ValueMap::new();
        if let Some(db) = database.or(self.conn_config.database.as_deref()) {
            extra.insert("db".into(), Value::String(db.to_owned()));
        }

        let mut conn = self.pool.acquire().await?;
        let response = conn
            .request(&Request::Route {
                routing,
                bookmarks: Vec::new(),
                extra,
            })
            .await?;
        conn.expect_success(response)
    }

    /// Close the pool: refuse new work, drain, and say GOODBYE to every
    /// idle connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

//! ActiveCypher core: a Bolt protocol driver and Cypher query builder for
//! Neo4j- and Memgraph-family servers.
//!
//! The crate is layered bottom-up: the Packstream codec and chunked framer
//! marshal bytes, the message catalog and state machine drive a single
//! connection, sessions execute statements and transactions over one
//! borrowed connection, and the driver owns a bounded pool plus the vendor
//! dialect. The `cypher` module builds parameterized query text for all of
//! it.

pub mod bolt;
pub mod config;
pub mod cypher;
pub mod driver;
pub mod errors;
pub mod graph;
pub mod packstream;
pub mod pool;
pub mod result;
pub mod session;
pub mod url;
pub mod vendor;

pub use bolt::{BoltConnection, BoltState, ServerInfo, Version};
pub use config::{
    AuthToken, ConnectionConfig, DriverConfig, Endpoint, RetryPolicy, Secret, TlsProfile,
};
pub use cypher::{match_, match_node, node, BuiltQuery, Expr, Query};
pub use driver::Driver;
pub use errors::{Error, FailureClass, Result, ServerError};
pub use graph::{
    BoltDuration, Node, Path, Relationship, TemporalValue, UnboundRelationship, ZonedDateTime,
    ZonedLocalDateTime,
};
pub use packstream::{Structure, Value, ValueMap};
pub use pool::{Pool, PoolStats, PooledConnection};
pub use result::{Record, RecordStream, Summary};
pub use session::{AccessMode, Session, SessionConfig, Transaction, TxConfig};
pub use crate::url::parse_url;
pub use vendor::{Vendor, VendorAdapter};

//! Driver configuration.
//!
//! Everything the driver needs is passed in explicitly through these
//! structs; there is no global state. Credentials are wrapped in [`Secret`]
//! so no diagnostic surface can print them.

use crate::packstream::{Value, ValueMap};
use crate::vendor::Vendor;
use indexmap::IndexMap;
use std::fmt;
use std::time::Duration;

/// Fixed sentinel shown wherever a credential would otherwise appear.
pub const REDACTED: &str = "***";

/// A host/port pair. Displayed on every error that involves the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// TLS behavior selected by the URL scheme suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsProfile {
    /// Plain TCP.
    #[default]
    None,
    /// TLS with certificate verification against the system roots.
    Verified,
    /// TLS accepting any certificate, including self-signed.
    Insecure,
}

/// Credential holder whose Debug/Display never reveal the inner value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw credential. Only the HELLO/LOGON encoder calls this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret::new(value)
    }
}

/// Authentication token sent in HELLO (≤5.0) or LOGON (≥5.1).
#[derive(Debug, Clone, PartialEq)]
pub enum AuthToken {
    None,
    Basic {
        principal: String,
        credentials: Secret,
    },
    /// Any server-side pluggable scheme; field values are passed through.
    Custom {
        scheme: String,
        fields: IndexMap<String, Value>,
    },
}

impl AuthToken {
    pub fn basic(principal: impl Into<String>, credentials: impl Into<Secret>) -> Self {
        AuthToken::Basic {
            principal: principal.into(),
            credentials: credentials.into(),
        }
    }

    /// The auth fields as message metadata.
    pub fn to_metadata(&self) -> ValueMap {
        let mut map = ValueMap::new();
        match self {
            AuthToken::None => {
                map.insert("scheme".into(), Value::String("none".into()));
            }
            AuthToken::Basic {
                principal,
                credentials,
            } => {
                map.insert("scheme".into(), Value::String("basic".into()));
                map.insert("principal".into(), Value::String(principal.clone()));
                map.insert(
                    "credentials".into(),
                    Value::String(credentials.expose().to_owned()),
                );
            }
            AuthToken::Custom { scheme, fields } => {
                map.insert("scheme".into(), Value::String(scheme.clone()));
                for (key, value) in fields {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        map
    }
}

/// Backoff shape for transaction-function retries: full jitter around an
/// exponential ramp, bounded by a total elapsed ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay used as ± jitter.
    pub jitter: f64,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.2,
            max_elapsed: Duration::from_secs(30),
        }
    }
}

/// Everything needed to reach and speak to one endpoint. Usually produced
/// by [`crate::url::parse_url`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: Endpoint,
    pub vendor: Vendor,
    pub tls: TlsProfile,
    pub auth: AuthToken,
    pub database: Option<String>,
    /// URL query options, passed through untouched.
    pub options: IndexMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: Endpoint {
                host: host.into(),
                port,
            },
            vendor: Vendor::Neo4j,
            tls: TlsProfile::None,
            auth: AuthToken::None,
            database: None,
            options: IndexMap::new(),
        }
    }
}

/// Tunables that apply to the whole driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub user_agent: String,
    pub max_pool_size: usize,
    pub connect_timeout: Duration,
    /// Per-message read deadline on an established connection.
    pub read_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Idle connections older than this are probed before reuse.
    pub idle_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("activecypher/", env!("CARGO_PKG_VERSION")).to_owned(),
            max_pool_size: 16,
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(60),
            idle_ttl: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_never_leaks_through_debug() {
        let auth = AuthToken::basic("neo4j", "hunter2");
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains(REDACTED));
    }

    #[test]
    fn basic_auth_metadata_carries_credentials() {
        let auth = AuthToken::basic("neo4j", "pw");
        let meta = auth.to_metadata();
        assert_eq!(meta.get("scheme"), Some(&Value::String("basic".into())));
        assert_eq!(meta.get("credentials"), Some(&Value::String("pw".into())));
    }

    #[test]
    fn custom_scheme_passes_fields_through() {
        let mut fields = IndexMap::new();
        fields.insert("ticket".to_string(), Value::String("abc".into()));
        let auth = AuthToken::Custom {
            scheme: "kerberos".into(),
            fields,
        };
        let meta = auth.to_metadata();
        assert_eq!(meta.get("scheme"), Some(&Value::String("kerberos".into())));
        assert_eq!(meta.get("ticket"), Some(&Value::String("abc".into())));
    }
}

//! Vendor dialect adapters.
//!
//! The two supported server families diverge in a handful of places: the
//! identity function, access-mode semantics, routing support, and the
//! statements used to introspect the schema. Everything variable flows
//! through parameters; adapters never splice untrusted values into Cypher
//! text.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Neo4j,
    Memgraph,
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Neo4j => f.write_str("neo4j"),
            Vendor::Memgraph => f.write_str("memgraph"),
        }
    }
}

impl Vendor {
    pub fn adapter(self) -> &'static dyn VendorAdapter {
        match self {
            Vendor::Neo4j => &Neo4jAdapter,
            Vendor::Memgraph => &MemgraphAdapter,
        }
    }
}

/// Dialect hooks consulted by the driver, pool, and query builder.
pub trait VendorAdapter: Send + Sync + fmt::Debug {
    fn vendor(&self) -> Vendor;

    /// Name of the identity function (`elementId` vs `id`).
    fn id_function(&self) -> &'static str;

    /// An id-equality predicate for `alias`, comparing against the named
    /// parameter. The id value itself always travels as a parameter.
    fn id_predicate(&self, alias: &str, param_name: &str) -> String;

    /// Whether BEGIN/RUN access-mode metadata means anything to the server.
    fn supports_access_modes(&self) -> bool;

    /// Whether ROUTE is accepted. Sending ROUTE to a dialect without
    /// routing is rejected client-side.
    fn supports_routing(&self) -> bool;

    /// Database selected when the URL names none.
    fn default_database(&self) -> Option<&'static str>;

    /// Cheap statement used by the pool to probe a suspect connection.
    fn liveness_probe(&self) -> &'static str {
        "RETURN 1"
    }

    /// Schema introspection statements. Result shapes differ per vendor;
    /// callers read them as raw records.
    fn list_indexes(&self) -> &'static str;
    fn list_constraints(&self) -> &'static str;
    fn list_labels(&self) -> &'static str;
    fn list_relationship_types(&self) -> &'static str;
}

#[derive(Debug)]
pub struct Neo4jAdapter;

impl VendorAdapter for Neo4jAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Neo4j
    }

    fn id_function(&self) -> &'static str {
        "elementId"
    }

    fn id_predicate(&self, alias: &str, param_name: &str) -> String {
        format!("elementId({alias}) = ${param_name}")
    }

    fn supports_access_modes(&self) -> bool {
        true
    }

    fn supports_routing(&self) -> bool {
        true
    }

    fn default_database(&self) -> Option<&'static str> {
        // Unset: the server resolves its own default database.
        None
    }

    fn list_indexes(&self) -> &'static str {
        "SHOW INDEXES"
    }

    fn list_constraints(&self) -> &'static str {
        "SHOW CONSTRAINTS"
    }

    fn list_labels(&self) -> &'static str {
        "CALL db.labels() YIELD label RETURN label"
    }

    fn list_relationship_types(&self) -> &'static str {
        "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType"
    }
}

#[derive(Debug)]
pub struct MemgraphAdapter;

impl VendorAdapter for MemgraphAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Memgraph
    }

    fn id_function(&self) -> &'static str {
        "id"
    }

    fn id_predicate(&self, alias: &str, param_name: &str) -> String {
        format!("id({alias}) = ${param_name}")
    }

    fn supports_access_modes(&self) -> bool {
        false
    }

    fn supports_routing(&self) -> bool {
        false
    }

    fn default_database(&self) -> Option<&'static str> {
        Some("memgraph")
    }

    fn list_indexes(&self) -> &'static str {
        "SHOW INDEX INFO"
    }

    fn list_constraints(&self) -> &'static str {
        "SHOW CONSTRAINT INFO"
    }

    fn list_labels(&self) -> &'static str {
        "CALL db.labels() YIELD label RETURN label"
    }

    fn list_relationship_types(&self) -> &'static str {
        "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType"
    }
}

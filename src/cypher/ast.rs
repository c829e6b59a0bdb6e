//! Clause and pattern nodes of the query AST.
//!
//! Nodes own their children outright; aliases re-mentioned across clauses
//! are plain identifier strings, never back-references.

use super::expr::Expr;
use super::query::Query;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `-[..]->`
    Outgoing,
    /// `<-[..]-`
    Incoming,
    /// `-[..]-`
    Undirected,
}

/// `(alias:Label {key: value})`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    pub alias: Option<String>,
    pub labels: Vec<String>,
    pub properties: IndexMap<String, Expr>,
}

impl NodePattern {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            ..Default::default()
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Shorthand for [`NodePattern::new`].
pub fn node(alias: impl Into<String>) -> NodePattern {
    NodePattern::new(alias)
}

/// Variable-length specifier: `*`, `*2`, `*1..3`, `*..5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarLength {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

/// `-[alias:TYPE {key: value}]->`
#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub alias: Option<String>,
    pub types: Vec<String>,
    pub properties: IndexMap<String, Expr>,
    pub direction: Direction,
    pub length: Option<VarLength>,
}

impl Default for RelPattern {
    fn default() -> Self {
        Self {
            alias: None,
            types: Vec::new(),
            properties: IndexMap::new(),
            direction: Direction::Outgoing,
            length: None,
        }
    }
}

impl RelPattern {
    pub fn typed(rel_type: impl Into<String>) -> Self {
        Self {
            types: vec![rel_type.into()],
            ..Default::default()
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn rel_type(mut self, rel_type: impl Into<String>) -> Self {
        self.types.push(rel_type.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn length(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.length = Some(VarLength { min, max });
        self
    }
}

/// An alternating node/relationship walk, optionally named (`p = (...)`).
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub name: Option<String>,
    pub start: NodePattern,
    pub steps: Vec<(RelPattern, NodePattern)>,
}

impl PathPattern {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append `-[rel]->(next)` (direction taken from `rel`).
    pub fn step(mut self, rel: RelPattern, next: NodePattern) -> Self {
        self.steps.push((rel, next));
        self
    }

    /// Append `-[:TYPE]->(next)`.
    pub fn to(self, rel_type: impl Into<String>, next: NodePattern) -> Self {
        self.step(RelPattern::typed(rel_type), next)
    }

    /// Append `<-[:TYPE]-(next)`.
    pub fn from(self, rel_type: impl Into<String>, next: NodePattern) -> Self {
        self.step(
            RelPattern::typed(rel_type).direction(Direction::Incoming),
            next,
        )
    }

    /// Append `-[:TYPE]-(next)`.
    pub fn related(self, rel_type: impl Into<String>, next: NodePattern) -> Self {
        self.step(
            RelPattern::typed(rel_type).direction(Direction::Undirected),
            next,
        )
    }

    /// Aliases defined by this pattern, each with its labels (nodes) or
    /// types (relationships). Used for conflict detection on merge.
    pub fn defined_aliases(&self) -> Vec<(&str, &[String])> {
        let mut out = Vec::new();
        if let Some(alias) = self.start.alias.as_deref() {
            out.push((alias, self.start.labels.as_slice()));
        }
        for (rel, node) in &self.steps {
            if let Some(alias) = rel.alias.as_deref() {
                out.push((alias, rel.types.as_slice()));
            }
            if let Some(alias) = node.alias.as_deref() {
                out.push((alias, node.labels.as_slice()));
            }
        }
        out
    }
}

impl From<NodePattern> for PathPattern {
    fn from(start: NodePattern) -> Self {
        Self {
            name: None,
            start,
            steps: Vec::new(),
        }
    }
}

/// One assignment in SET / ON CREATE SET / ON MATCH SET.
#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    /// `alias.key = value`
    Property {
        alias: String,
        key: String,
        value: Expr,
    },
    /// `alias = value` or `alias += value`
    Variable {
        alias: String,
        value: Expr,
        merge: bool,
    },
    /// `alias:Label1:Label2`
    Labels { alias: String, labels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveItem {
    /// `alias.key`
    Property { alias: String, key: String },
    /// `alias:Label`
    Labels { alias: String, labels: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Clause category, in canonical render order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Match,
    OptionalMatch,
    LoadCsv,
    Unwind,
    Where,
    Call,
    CallSubquery,
    With,
    Create,
    Merge,
    Set,
    Remove,
    Delete,
    Foreach,
    Return,
    OrderBy,
    Skip,
    Limit,
    Union,
}

impl ClauseKind {
    /// Render rank: reading < procedural < WITH < mutating < RETURN <
    /// pagination < UNION. Clauses of equal rank keep insertion order.
    pub fn rank(self) -> u8 {
        match self {
            ClauseKind::Match | ClauseKind::OptionalMatch => 10,
            ClauseKind::LoadCsv => 11,
            ClauseKind::Unwind => 12,
            ClauseKind::Where => 15,
            ClauseKind::Call | ClauseKind::CallSubquery => 20,
            ClauseKind::With => 30,
            ClauseKind::Create
            | ClauseKind::Merge
            | ClauseKind::Set
            | ClauseKind::Remove
            | ClauseKind::Delete
            | ClauseKind::Foreach => 40,
            ClauseKind::Return => 50,
            ClauseKind::OrderBy => 60,
            ClauseKind::Skip => 70,
            ClauseKind::Limit => 80,
            ClauseKind::Union => 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match {
        optional: bool,
        patterns: Vec<PathPattern>,
    },
    Where(Expr),
    Create(Vec<PathPattern>),
    Merge {
        pattern: PathPattern,
        on_create: Vec<SetItem>,
        on_match: Vec<SetItem>,
    },
    Set(Vec<SetItem>),
    Remove(Vec<RemoveItem>),
    Delete {
        detach: bool,
        exprs: Vec<Expr>,
    },
    With {
        distinct: bool,
        items: Vec<Expr>,
    },
    Return {
        distinct: bool,
        items: Vec<Expr>,
    },
    OrderBy(Vec<(Expr, SortOrder)>),
    Skip(Expr),
    Limit(Expr),
    Unwind {
        expr: Expr,
        alias: String,
    },
    Call {
        procedure: String,
        args: Vec<Expr>,
        yields: Vec<String>,
    },
    CallSubquery(Query),
    Union {
        all: bool,
        query: Query,
    },
    Foreach {
        variable: String,
        list: Expr,
        updates: Vec<Clause>,
    },
    LoadCsv {
        with_headers: bool,
        source: Expr,
        alias: String,
        field_terminator: Option<String>,
    },
    /// Pre-rendered clause text, the migration path for callers not yet on
    /// the AST. Must produce text equivalent to the AST rendering.
    Legacy { kind: ClauseKind, text: String },
}

impl Clause {
    pub fn kind(&self) -> ClauseKind {
        match self {
            Clause::Match { optional: false, .. } => ClauseKind::Match,
            Clause::Match { optional: true, .. } => ClauseKind::OptionalMatch,
            Clause::Where(_) => ClauseKind::Where,
            Clause::Create(_) => ClauseKind::Create,
            Clause::Merge { .. } => ClauseKind::Merge,
            Clause::Set(_) => ClauseKind::Set,
            Clause::Remove(_) => ClauseKind::Remove,
            Clause::Delete { .. } => ClauseKind::Delete,
            Clause::With { .. } => ClauseKind::With,
            Clause::Return { .. } => ClauseKind::Return,
            Clause::OrderBy(_) => ClauseKind::OrderBy,
            Clause::Skip(_) => ClauseKind::Skip,
            Clause::Limit(_) => ClauseKind::Limit,
            Clause::Unwind { .. } => ClauseKind::Unwind,
            Clause::Call { .. } => ClauseKind::Call,
            Clause::CallSubquery(_) => ClauseKind::CallSubquery,
            Clause::Union { .. } => ClauseKind::Union,
            Clause::Foreach { .. } => ClauseKind::Foreach,
            Clause::LoadCsv { .. } => ClauseKind::LoadCsv,
            Clause::Legacy { kind, .. } => *kind,
        }
    }
}

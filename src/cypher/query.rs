//! The `Query` builder: an ordered list of clause nodes plus a parameter
//! registry, composable with other queries.

use super::ast::{
    Clause, ClauseKind, NodePattern, PathPattern, RemoveItem, SetItem, SortOrder,
};
use super::compile::Compiler;
use super::expr::Expr;
use super::params::ParamRegistry;
use crate::errors::{Error, Result};
use crate::packstream::{Value, ValueMap};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A rendered query: Cypher text plus its self-contained parameter map.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub cypher: String,
    pub parameters: ValueMap,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    clauses: Vec<Clause>,
    params: ParamRegistry,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn params(&self) -> &ParamRegistry {
        &self.params
    }

    // -- reading ---------------------------------------------------------

    pub fn match_(mut self, pattern: impl Into<PathPattern>) -> Self {
        self.clauses.push(Clause::Match {
            optional: false,
            patterns: vec![pattern.into()],
        });
        self
    }

    pub fn optional_match(mut self, pattern: impl Into<PathPattern>) -> Self {
        self.clauses.push(Clause::Match {
            optional: true,
            patterns: vec![pattern.into()],
        });
        self
    }

    /// Add a WHERE condition. Conditions from repeated calls (or merged
    /// queries) are AND-joined in the rendered text.
    pub fn where_(mut self, condition: Expr) -> Self {
        self.clauses.push(Clause::Where(condition));
        self
    }

    pub fn unwind(mut self, list: impl Into<Expr>, alias: impl Into<String>) -> Self {
        self.clauses.push(Clause::Unwind {
            expr: list.into(),
            alias: alias.into(),
        });
        self
    }

    pub fn load_csv(
        mut self,
        with_headers: bool,
        source: impl Into<Expr>,
        alias: impl Into<String>,
    ) -> Self {
        self.clauses.push(Clause::LoadCsv {
            with_headers,
            source: source.into(),
            alias: alias.into(),
            field_terminator: None,
        });
        self
    }

    // -- procedural ------------------------------------------------------

    pub fn call(
        mut self,
        procedure: impl Into<String>,
        args: Vec<Expr>,
        yields: Vec<String>,
    ) -> Self {
        self.clauses.push(Clause::Call {
            procedure: procedure.into(),
            args,
            yields,
        });
        self
    }

    pub fn call_subquery(mut self, subquery: Query) -> Self {
        self.clauses.push(Clause::CallSubquery(subquery));
        self
    }

    // -- mutating --------------------------------------------------------

    pub fn create(mut self, pattern: impl Into<PathPattern>) -> Self {
        self.clauses.push(Clause::Create(vec![pattern.into()]));
        self
    }

    pub fn merge(mut self, pattern: impl Into<PathPattern>) -> Self {
        self.clauses.push(Clause::Merge {
            pattern: pattern.into(),
            on_create: Vec::new(),
            on_match: Vec::new(),
        });
        self
    }

    pub fn merge_on(
        mut self,
        pattern: impl Into<PathPattern>,
        on_create: Vec<SetItem>,
        on_match: Vec<SetItem>,
    ) -> Self {
        self.clauses.push(Clause::Merge {
            pattern: pattern.into(),
            on_create,
            on_match,
        });
        self
    }

    pub fn set(mut self, items: Vec<SetItem>) -> Self {
        self.clauses.push(Clause::Set(items));
        self
    }

    /// `SET alias.key = value`
    pub fn set_prop(
        self,
        alias: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Expr>,
    ) -> Self {
        self.set(vec![SetItem::Property {
            alias: alias.into(),
            key: key.into(),
            value: value.into(),
        }])
    }

    pub fn remove(mut self, items: Vec<RemoveItem>) -> Self {
        self.clauses.push(Clause::Remove(items));
        self
    }

    pub fn delete(mut self, exprs: Vec<Expr>) -> Self {
        self.clauses.push(Clause::Delete {
            detach: false,
            exprs,
        });
        self
    }

    pub fn detach_delete(mut self, exprs: Vec<Expr>) -> Self {
        self.clauses.push(Clause::Delete {
            detach: true,
            exprs,
        });
        self
    }

    pub fn foreach(
        mut self,
        variable: impl Into<String>,
        list: impl Into<Expr>,
        updates: Vec<Clause>,
    ) -> Self {
        self.clauses.push(Clause::Foreach {
            variable: variable.into(),
            list: list.into(),
            updates,
        });
        self
    }

    // -- projection ------------------------------------------------------

    pub fn with_items(mut self, items: Vec<Expr>) -> Self {
        self.clauses.push(Clause::With {
            distinct: false,
            items,
        });
        self
    }

    pub fn returns(mut self, items: Vec<Expr>) -> Self {
        self.clauses.push(Clause::Return {
            distinct: false,
            items,
        });
        self
    }

    pub fn returns_distinct(mut self, items: Vec<Expr>) -> Self {
        self.clauses.push(Clause::Return {
            distinct: true,
            items,
        });
        self
    }

    // -- pagination (replacing semantics) --------------------------------

    pub fn order_by(mut self, keys: Vec<(Expr, SortOrder)>) -> Self {
        self.replace_clause(ClauseKind::OrderBy, Clause::OrderBy(keys));
        self
    }

    pub fn skip(mut self, count: impl Into<Expr>) -> Self {
        self.replace_clause(ClauseKind::Skip, Clause::Skip(count.into()));
        self
    }

    pub fn limit(mut self, count: impl Into<Expr>) -> Self {
        self.replace_clause(ClauseKind::Limit, Clause::Limit(count.into()));
        self
    }

    // -- composition -----------------------------------------------------

    pub fn union(mut self, query: Query) -> Self {
        self.clauses.push(Clause::Union { all: false, query });
        self
    }

    pub fn union_all(mut self, query: Query) -> Self {
        self.clauses.push(Clause::Union { all: true, query });
        self
    }

    /// Declare a user-named parameter (`$name`), emitted verbatim.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        self.params.declare(name, value.into())?;
        Ok(self)
    }

    /// Append a pre-rendered clause (the legacy path).
    pub fn legacy_clause(mut self, kind: ClauseKind, text: impl Into<String>) -> Self {
        self.clauses.push(Clause::Legacy {
            kind,
            text: text.into(),
        });
        self
    }

    /// Merge `other` into this query.
    ///
    /// WHERE conditions are AND-joined, ORDER BY / SKIP / LIMIT from the
    /// right replace the left's, every other clause kind is appended.
    /// Fails with [`Error::AliasConflict`] when both sides bind the same
    /// alias to differing non-empty label sets; parameters are renumbered
    /// to stay unique, collapsing structurally equal values.
    pub fn merge_query(mut self, other: Query) -> Result<Self> {
        self.check_alias_conflicts(&other)?;

        let Query {
            clauses: mut incoming,
            params: incoming_params,
        } = other;

        let renames = self.params.absorb(incoming_params);
        if !renames.is_empty() {
            for clause in &mut incoming {
                rename_clause_params(clause, &renames);
            }
        }

        for clause in incoming {
            match clause.kind() {
                ClauseKind::OrderBy | ClauseKind::Skip | ClauseKind::Limit => {
                    self.replace_clause(clause.kind(), clause);
                }
                _ => self.clauses.push(clause),
            }
        }
        Ok(self)
    }

    /// Aliases bound in MATCH/CREATE/MERGE patterns, with the union of
    /// their labels (or relationship types).
    pub fn defined_aliases(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut visit = |pattern: &PathPattern| {
            for (alias, labels) in pattern.defined_aliases() {
                out.entry(alias.to_owned())
                    .or_default()
                    .extend(labels.iter().cloned());
            }
        };
        for clause in &self.clauses {
            match clause {
                Clause::Match { patterns, .. } | Clause::Create(patterns) => {
                    patterns.iter().for_each(&mut visit);
                }
                Clause::Merge { pattern, .. } => visit(pattern),
                _ => {}
            }
        }
        out
    }

    /// Render to Cypher text plus the final parameter map.
    pub fn build(&self) -> Result<BuiltQuery> {
        let (cypher, registry) = Compiler::compile(self)?;
        Ok(BuiltQuery {
            cypher,
            parameters: registry.into_values(),
        })
    }

    /// Render to Cypher text only.
    pub fn to_cypher(&self) -> Result<String> {
        Ok(self.build()?.cypher)
    }

    fn replace_clause(&mut self, kind: ClauseKind, clause: Clause) {
        self.clauses.retain(|existing| existing.kind() != kind);
        self.clauses.push(clause);
    }

    fn check_alias_conflicts(&self, other: &Query) -> Result<()> {
        let left = self.defined_aliases();
        let right = other.defined_aliases();
        for (alias, right_labels) in &right {
            let Some(left_labels) = left.get(alias) else { continue };
            if left_labels.is_empty() || right_labels.is_empty() {
                continue;
            }
            if left_labels != right_labels {
                return Err(Error::AliasConflict {
                    alias: alias.clone(),
                    left: left_labels.iter().cloned().collect(),
                    right: right_labels.iter().cloned().collect(),
                });
            }
        }
        Ok(())
    }
}

/// Shorthand: a query starting with `MATCH (pattern)`.
pub fn match_(pattern: impl Into<PathPattern>) -> Query {
    Query::new().match_(pattern)
}

/// Shorthand: a query starting with `MATCH` on a bare labeled node.
pub fn match_node(alias: impl Into<String>, label: impl Into<String>) -> Query {
    Query::new().match_(NodePattern::new(alias).label(label))
}

// ---------------------------------------------------------------------------
// Parameter renaming across a merged-in clause tree
// ---------------------------------------------------------------------------

fn rename_clause_params(clause: &mut Clause, renames: &HashMap<String, String>) {
    match clause {
        Clause::Match { patterns, .. } | Clause::Create(patterns) => {
            for pattern in patterns {
                rename_pattern_params(pattern, renames);
            }
        }
        Clause::Merge {
            pattern,
            on_create,
            on_match,
        } => {
            rename_pattern_params(pattern, renames);
            for item in on_create.iter_mut().chain(on_match.iter_mut()) {
                rename_set_item_params(item, renames);
            }
        }
        Clause::Where(expr) | Clause::Skip(expr) | Clause::Limit(expr) => {
            rename_expr_params(expr, renames);
        }
        Clause::Set(items) => {
            for item in items {
                rename_set_item_params(item, renames);
            }
        }
        Clause::Remove(_) => {}
        Clause::Delete { exprs, .. } => {
            for expr in exprs {
                rename_expr_params(expr, renames);
            }
        }
        Clause::With { items, .. } | Clause::Return { items, .. } => {
            for expr in items {
                rename_expr_params(expr, renames);
            }
        }
        Clause::OrderBy(keys) => {
            for (expr, _) in keys {
                rename_expr_params(expr, renames);
            }
        }
        Clause::Unwind { expr, .. } => rename_expr_params(expr, renames),
        Clause::Call { args, .. } => {
            for expr in args {
                rename_expr_params(expr, renames);
            }
        }
        Clause::CallSubquery(query) | Clause::Union { query, .. } => {
            rename_query_params(query, renames);
        }
        Clause::Foreach { list, updates, .. } => {
            rename_expr_params(list, renames);
            for update in updates {
                rename_clause_params(update, renames);
            }
        }
        Clause::LoadCsv { source, .. } => rename_expr_params(source, renames),
        Clause::Legacy { .. } => {}
    }
}

fn rename_query_params(query: &mut Query, renames: &HashMap<String, String>) {
    // Names the nested query declares itself shadow the outer renames.
    let filtered: HashMap<String, String> = renames
        .iter()
        .filter(|(old, _)| query.params.get(old).is_none())
        .map(|(old, new)| (old.clone(), new.clone()))
        .collect();
    if filtered.is_empty() {
        return;
    }
    for clause in &mut query.clauses {
        rename_clause_params(clause, &filtered);
    }
}

fn rename_pattern_params(pattern: &mut PathPattern, renames: &HashMap<String, String>) {
    for value in pattern.start.properties.values_mut() {
        rename_expr_params(value, renames);
    }
    for (rel, node) in &mut pattern.steps {
        for value in rel.properties.values_mut() {
            rename_expr_params(value, renames);
        }
        for value in node.properties.values_mut() {
            rename_expr_params(value, renames);
        }
    }
}

fn rename_set_item_params(item: &mut SetItem, renames: &HashMap<String, String>) {
    match item {
        SetItem::Property { value, .. } | SetItem::Variable { value, .. } => {
            rename_expr_params(value, renames)
        }
        SetItem::Labels { .. } => {}
    }
}

fn rename_expr_params(expr: &mut Expr, renames: &HashMap<String, String>) {
    match expr {
        Expr::Param(name) => {
            if let Some(renamed) = renames.get(name) {
                *name = renamed.clone();
            }
        }
        Expr::Literal(_) | Expr::Ident(_) | Expr::Raw(_) => {}
        Expr::Property { subject, .. } => rename_expr_params(subject, renames),
        Expr::Unary { operand, .. } => rename_expr_params(operand, renames),
        Expr::Binary { left, right, .. } => {
            rename_expr_params(left, renames);
            rename_expr_params(right, renames);
        }
        Expr::FnCall { args, .. } => {
            for arg in args {
                rename_expr_params(arg, renames);
            }
        }
        Expr::Aliased { expr, .. } => rename_expr_params(expr, renames),
        Expr::List(items) => {
            for item in items {
                rename_expr_params(item, renames);
            }
        }
        Expr::Map(entries) => {
            for value in entries.values_mut() {
                rename_expr_params(value, renames);
            }
        }
        Expr::ExistsPattern(pattern) => rename_pattern_params(pattern, renames),
        Expr::ExistsSubquery(query) => rename_query_params(query, renames),
        Expr::Case {
            subject,
            branches,
            default,
        } => {
            if let Some(subject) = subject {
                rename_expr_params(subject, renames);
            }
            for (when, then) in branches {
                rename_expr_params(when, renames);
                rename_expr_params(then, renames);
            }
            if let Some(default) = default {
                rename_expr_params(default, renames);
            }
        }
        Expr::PatternComprehension {
            pattern,
            predicate,
            projection,
        } => {
            rename_pattern_params(pattern, renames);
            if let Some(predicate) = predicate {
                rename_expr_params(predicate, renames);
            }
            rename_expr_params(projection, renames);
        }
    }
}

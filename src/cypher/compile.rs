//! The visitor compiler: AST → Cypher text plus a parameter map.
//!
//! The compiler is the single owner of the output buffer and the working
//! parameter registry. Literals are registered (and deduplicated) as they
//! are visited; identifiers are validated or backtick-escaped, never
//! parameterized. Nested queries (CALL {}, UNION, EXISTS {}) render with
//! their parameters hoisted into the outer registry, renaming on
//! collision.

use super::ast::{
    Clause, Direction, NodePattern, PathPattern, RelPattern, RemoveItem, SetItem, SortOrder,
};
use super::expr::{BinaryOp, Expr, UnaryOp};
use super::params::ParamRegistry;
use super::query::Query;
use crate::errors::{Error, Result};
use std::collections::HashMap;

pub struct Compiler {
    out: String,
    registry: ParamRegistry,
    /// Rename scopes for nested queries, innermost last.
    renames: Vec<HashMap<String, String>>,
}

impl Compiler {
    /// Render `query`, returning the text and the final parameter map.
    pub fn compile(query: &Query) -> Result<(String, ParamRegistry)> {
        let mut compiler = Compiler {
            out: String::new(),
            registry: query.params().clone(),
            renames: Vec::new(),
        };
        compiler.render_query_body(query)?;
        Ok((compiler.out, compiler.registry))
    }

    /// Clauses in canonical order; insertion order breaks ties.
    fn ordered_clauses<'a>(query: &'a Query) -> Vec<&'a Clause> {
        let mut ordered: Vec<&Clause> = query.clauses().iter().collect();
        ordered.sort_by_key(|clause| clause.kind().rank());
        ordered
    }

    fn render_query_body(&mut self, query: &Query) -> Result<()> {
        let ordered = Self::ordered_clauses(query);

        // All WHERE clauses collapse into one, AND-joined.
        let wheres: Vec<&Expr> = ordered
            .iter()
            .filter_map(|clause| match clause {
                Clause::Where(expr) => Some(expr),
                _ => None,
            })
            .collect();

        let mut first = true;
        let mut where_rendered = false;
        for clause in ordered {
            if let Clause::Where(_) = clause {
                if where_rendered {
                    continue;
                }
                where_rendered = true;
                self.clause_break(&mut first);
                self.render_where(&wheres)?;
                continue;
            }
            self.clause_break(&mut first);
            self.render_clause(clause)?;
        }
        Ok(())
    }

    /// Render a nested query with its parameters hoisted into this
    /// compiler's registry.
    fn render_nested(&mut self, query: &Query) -> Result<()> {
        let renames = self.registry.absorb(query.params().clone());
        self.renames.push(renames);
        let result = self.render_query_body(query);
        self.renames.pop();
        result
    }

    fn clause_break(&mut self, first: &mut bool) {
        if !*first {
            self.out.push('\n');
        }
        *first = false;
    }

    fn render_where(&mut self, conditions: &[&Expr]) -> Result<()> {
        self.out.push_str("WHERE ");
        let parent = if conditions.len() > 1 {
            BinaryOp::And.precedence()
        } else {
            0
        };
        for (i, condition) in conditions.iter().enumerate() {
            if i > 0 {
                self.out.push_str(" AND ");
            }
            self.render_expr(condition, parent)?;
        }
        Ok(())
    }

    fn render_clause(&mut self, clause: &Clause) -> Result<()> {
        match clause {
            Clause::Match { optional, patterns } => {
                self.out
                    .push_str(if *optional { "OPTIONAL MATCH " } else { "MATCH " });
                self.render_patterns(patterns)
            }
            Clause::Where(expr) => {
                // Reached only through Foreach updates; the query body
                // collapses WHERE clauses itself.
                self.out.push_str("WHERE ");
                self.render_expr(expr, 0)
            }
            Clause::Create(patterns) => {
                self.out.push_str("CREATE ");
                self.render_patterns(patterns)
            }
            Clause::Merge {
                pattern,
                on_create,
                on_match,
            } => {
                self.out.push_str("MERGE ");
                self.render_pattern(pattern)?;
                if !on_create.is_empty() {
                    self.out.push_str("\nON CREATE SET ");
                    self.render_set_items(on_create)?;
                }
                if !on_match.is_empty() {
                    self.out.push_str("\nON MATCH SET ");
                    self.render_set_items(on_match)?;
                }
                Ok(())
            }
            Clause::Set(items) => {
                self.out.push_str("SET ");
                self.render_set_items(items)
            }
            Clause::Remove(items) => {
                self.out.push_str("REMOVE ");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    match item {
                        RemoveItem::Property { alias, key } => {
                            self.push_ident(alias)?;
                            self.out.push('.');
                            self.push_ident(key)?;
                        }
                        RemoveItem::Labels { alias, labels } => {
                            self.push_ident(alias)?;
                            self.render_label_list(labels)?;
                        }
                    }
                }
                Ok(())
            }
            Clause::Delete { detach, exprs } => {
                self.out
                    .push_str(if *detach { "DETACH DELETE " } else { "DELETE " });
                self.render_expr_list(exprs)
            }
            Clause::With { distinct, items } => {
                self.out
                    .push_str(if *distinct { "WITH DISTINCT " } else { "WITH " });
                self.render_expr_list(items)
            }
            Clause::Return { distinct, items } => {
                self.out
                    .push_str(if *distinct { "RETURN DISTINCT " } else { "RETURN " });
                self.render_expr_list(items)
            }
            Clause::OrderBy(keys) => {
                self.out.push_str("ORDER BY ");
                for (i, (expr, order)) in keys.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.render_expr(expr, 0)?;
                    if *order == SortOrder::Desc {
                        self.out.push_str(" DESC");
                    }
                }
                Ok(())
            }
            Clause::Skip(expr) => {
                self.out.push_str("SKIP ");
                self.render_expr(expr, 0)
            }
            Clause::Limit(expr) => {
                self.out.push_str("LIMIT ");
                self.render_expr(expr, 0)
            }
            Clause::Unwind { expr, alias } => {
                self.out.push_str("UNWIND ");
                self.render_expr(expr, 0)?;
                self.out.push_str(" AS ");
                self.push_ident(alias)
            }
            Clause::Call {
                procedure,
                args,
                yields,
            } => {
                self.out.push_str("CALL ");
                self.out.push_str(procedure);
                self.out.push('(');
                self.render_expr_list(args)?;
                self.out.push(')');
                if !yields.is_empty() {
                    self.out.push_str(" YIELD ");
                    for (i, name) in yields.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.push_ident(name)?;
                    }
                }
                Ok(())
            }
            Clause::CallSubquery(query) => {
                self.out.push_str("CALL {\n");
                self.render_nested(query)?;
                self.out.push_str("\n}");
                Ok(())
            }
            Clause::Union { all, query } => {
                self.out.push_str(if *all { "UNION ALL\n" } else { "UNION\n" });
                self.render_nested(query)
            }
            Clause::Foreach {
                variable,
                list,
                updates,
            } => {
                self.out.push_str("FOREACH (");
                self.push_ident(variable)?;
                self.out.push_str(" IN ");
                self.render_expr(list, 0)?;
                self.out.push_str(" | ");
                for (i, update) in updates.iter().enumerate() {
                    if i > 0 {
                        self.out.push(' ');
                    }
                    self.render_clause(update)?;
                }
                self.out.push(')');
                Ok(())
            }
            Clause::LoadCsv {
                with_headers,
                source,
                alias,
                field_terminator,
            } => {
                self.out.push_str(if *with_headers {
                    "LOAD CSV WITH HEADERS FROM "
                } else {
                    "LOAD CSV FROM "
                });
                self.render_expr(source, 0)?;
                self.out.push_str(" AS ");
                self.push_ident(alias)?;
                if let Some(terminator) = field_terminator {
                    self.out.push_str(" FIELDTERMINATOR ");
                    self.push_string_literal(terminator);
                }
                Ok(())
            }
            Clause::Legacy { text, .. } => {
                self.out.push_str(text);
                Ok(())
            }
        }
    }

    fn render_patterns(&mut self, patterns: &[PathPattern]) -> Result<()> {
        for (i, pattern) in patterns.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.render_pattern(pattern)?;
        }
        Ok(())
    }

    fn render_pattern(&mut self, pattern: &PathPattern) -> Result<()> {
        if let Some(name) = &pattern.name {
            self.push_ident(name)?;
            self.out.push_str(" = ");
        }
        self.render_node(&pattern.start)?;
        for (rel, next) in &pattern.steps {
            self.render_rel(rel)?;
            self.render_node(next)?;
        }
        Ok(())
    }

    fn render_node(&mut self, node: &NodePattern) -> Result<()> {
        self.out.push('(');
        if let Some(alias) = &node.alias {
            self.push_ident(alias)?;
        }
        self.render_label_list(&node.labels)?;
        if !node.properties.is_empty() {
            self.out.push(' ');
            self.render_property_map(&node.properties)?;
        }
        self.out.push(')');
        Ok(())
    }

    fn render_rel(&mut self, rel: &RelPattern) -> Result<()> {
        self.out.push_str(match rel.direction {
            Direction::Incoming => "<-",
            _ => "-",
        });

        let bare = rel.alias.is_none()
            && rel.types.is_empty()
            && rel.properties.is_empty()
            && rel.length.is_none();
        if !bare {
            self.out.push('[');
            if let Some(alias) = &rel.alias {
                self.push_ident(alias)?;
            }
            for (i, rel_type) in rel.types.iter().enumerate() {
                self.out.push(if i == 0 { ':' } else { '|' });
                let escaped = escape_ident(rel_type)?;
                self.out.push_str(&escaped);
            }
            if let Some(length) = rel.length {
                self.out.push('*');
                if let Some(min) = length.min {
                    self.out.push_str(&min.to_string());
                }
                if length.min != length.max {
                    self.out.push_str("..");
                    if let Some(max) = length.max {
                        self.out.push_str(&max.to_string());
                    }
                }
            }
            if !rel.properties.is_empty() {
                self.out.push(' ');
                self.render_property_map(&rel.properties)?;
            }
            self.out.push(']');
        }

        self.out.push_str(match rel.direction {
            Direction::Outgoing => "->",
            _ => "-",
        });
        Ok(())
    }

    fn render_label_list(&mut self, labels: &[String]) -> Result<()> {
        for label in labels {
            self.out.push(':');
            let escaped = escape_ident(label)?;
            self.out.push_str(&escaped);
        }
        Ok(())
    }

    fn render_property_map(
        &mut self,
        properties: &indexmap::IndexMap<String, Expr>,
    ) -> Result<()> {
        self.out.push('{');
        for (i, (key, value)) in properties.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.push_ident(key)?;
            self.out.push_str(": ");
            self.render_expr(value, 0)?;
        }
        self.out.push('}');
        Ok(())
    }

    fn render_set_items(&mut self, items: &[SetItem]) -> Result<()> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            match item {
                SetItem::Property { alias, key, value } => {
                    self.push_ident(alias)?;
                    self.out.push('.');
                    self.push_ident(key)?;
                    self.out.push_str(" = ");
                    self.render_expr(value, 0)?;
                }
                SetItem::Variable {
                    alias,
                    value,
                    merge,
                } => {
                    self.push_ident(alias)?;
                    self.out.push_str(if *merge { " += " } else { " = " });
                    self.render_expr(value, 0)?;
                }
                SetItem::Labels { alias, labels } => {
                    self.push_ident(alias)?;
                    self.render_label_list(labels)?;
                }
            }
        }
        Ok(())
    }

    fn render_expr_list(&mut self, exprs: &[Expr]) -> Result<()> {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.render_expr(expr, 0)?;
        }
        Ok(())
    }

    fn render_expr(&mut self, expr: &Expr, parent_prec: u8) -> Result<()> {
        match expr {
            Expr::Literal(value) => {
                let name = self.registry.register(value.clone());
                self.out.push('$');
                self.out.push_str(&name);
            }
            Expr::Param(name) => {
                let resolved = self.resolve_param(name);
                self.out.push('$');
                self.out.push_str(&resolved);
            }
            Expr::Ident(name) => self.push_ident(name)?,
            Expr::Property { subject, key } => {
                self.render_expr(subject, u8::MAX)?;
                self.out.push('.');
                self.push_ident(key)?;
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    self.out.push_str("NOT ");
                    self.render_expr(operand, BinaryOp::And.precedence() + 1)?;
                }
                UnaryOp::Neg => {
                    self.out.push('-');
                    self.render_expr(operand, BinaryOp::Mul.precedence() + 1)?;
                }
                UnaryOp::IsNull => {
                    self.render_expr(operand, BinaryOp::Eq.precedence())?;
                    self.out.push_str(" IS NULL");
                }
                UnaryOp::IsNotNull => {
                    self.render_expr(operand, BinaryOp::Eq.precedence())?;
                    self.out.push_str(" IS NOT NULL");
                }
            },
            Expr::Binary { op, left, right } => {
                let prec = op.precedence();
                let parens = prec < parent_prec;
                if parens {
                    self.out.push('(');
                }
                self.render_expr(left, prec)?;
                self.out.push(' ');
                self.out.push_str(op.token());
                self.out.push(' ');
                self.render_expr(right, prec + 1)?;
                if parens {
                    self.out.push(')');
                }
            }
            Expr::FnCall {
                name,
                args,
                distinct,
            } => {
                self.out.push_str(name);
                self.out.push('(');
                if *distinct {
                    self.out.push_str("DISTINCT ");
                }
                self.render_expr_list(args)?;
                self.out.push(')');
            }
            Expr::Aliased { expr, alias } => {
                self.render_expr(expr, 0)?;
                self.out.push_str(" AS ");
                self.push_ident(alias)?;
            }
            Expr::List(items) => {
                self.out.push('[');
                self.render_expr_list(items)?;
                self.out.push(']');
            }
            Expr::Map(entries) => {
                self.out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.push_ident(key)?;
                    self.out.push_str(": ");
                    self.render_expr(value, 0)?;
                }
                self.out.push('}');
            }
            Expr::ExistsPattern(pattern) => {
                self.out.push_str("EXISTS { ");
                self.render_pattern(pattern)?;
                self.out.push_str(" }");
            }
            Expr::ExistsSubquery(query) => {
                self.out.push_str("EXISTS {\n");
                self.render_nested(query)?;
                self.out.push_str("\n}");
            }
            Expr::Case {
                subject,
                branches,
                default,
            } => {
                self.out.push_str("CASE");
                if let Some(subject) = subject {
                    self.out.push(' ');
                    self.render_expr(subject, 0)?;
                }
                for (when, then) in branches {
                    self.out.push_str(" WHEN ");
                    self.render_expr(when, 0)?;
                    self.out.push_str(" THEN ");
                    self.render_expr(then, 0)?;
                }
                if let Some(default) = default {
                    self.out.push_str(" ELSE ");
                    self.render_expr(default, 0)?;
                }
                self.out.push_str(" END");
            }
            Expr::PatternComprehension {
                pattern,
                predicate,
                projection,
            } => {
                self.out.push('[');
                self.render_pattern(pattern)?;
                if let Some(predicate) = predicate {
                    self.out.push_str(" WHERE ");
                    self.render_expr(predicate, 0)?;
                }
                self.out.push_str(" | ");
                self.render_expr(projection, 0)?;
                self.out.push(']');
            }
            Expr::Raw(text) => self.out.push_str(text),
        }
        Ok(())
    }

    fn resolve_param(&self, name: &str) -> String {
        for scope in self.renames.iter().rev() {
            if let Some(renamed) = scope.get(name) {
                return renamed.clone();
            }
        }
        name.to_owned()
    }

    fn push_ident(&mut self, name: &str) -> Result<()> {
        let escaped = escape_ident(name)?;
        self.out.push_str(&escaped);
        Ok(())
    }

    fn push_string_literal(&mut self, text: &str) {
        self.out.push('\'');
        for c in text.chars() {
            match c {
                '\'' => self.out.push_str("\\'"),
                '\\' => self.out.push_str("\\\\"),
                other => self.out.push(other),
            }
        }
        self.out.push('\'');
    }
}

/// Validate or backtick-escape an identifier (alias, label, relationship
/// type, property key). There is no raw-interpolation path: anything that
/// is not a plain identifier is escaped, and empty names are rejected.
pub fn escape_ident(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::Configuration("empty identifier".into()));
    }
    let mut chars = name.chars();
    let plain = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        return Ok(name.to_owned());
    }
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('`');
    for c in name.chars() {
        if c == '`' {
            escaped.push('`');
        }
        escaped.push(c);
    }
    escaped.push('`');
    Ok(escaped)
}

//! Typed Cypher query builder.
//!
//! Three node families (clauses, patterns, expressions) compile through a
//! visitor into Cypher text plus a deduplicated parameter map. Queries
//! compose: [`Query::merge_query`] combines two independently built
//! queries, detecting alias conflicts.

pub mod ast;
pub mod compile;
pub mod expr;
pub mod params;
pub mod query;

pub use ast::{
    node, Clause, ClauseKind, Direction, NodePattern, PathPattern, RelPattern, RemoveItem,
    SetItem, SortOrder, VarLength,
};
pub use compile::{escape_ident, Compiler};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use params::ParamRegistry;
pub use query::{match_, match_node, BuiltQuery, Query};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::packstream::Value;

    #[test]
    fn canonical_clause_order() {
        // Built out of order on purpose; rendering follows the canonical
        // reading < WITH < mutating < RETURN < pagination order.
        let query = Query::new()
            .limit(10)
            .returns(vec![Expr::ident("n")])
            .set_prop("n", "seen", true)
            .match_(node("n").label("Person"));
        let built = query.build().unwrap();
        assert_eq!(
            built.cypher,
            "MATCH (n:Person)\nSET n.seen = $p1\nRETURN n\nLIMIT $p2"
        );
    }

    #[test]
    fn where_conditions_join_with_and() {
        let query = match_node("p", "Person")
            .where_(Expr::prop("p", "age").gt(21))
            .where_(Expr::prop("p", "name").starts_with("A"))
            .returns(vec![Expr::ident("p")]);
        let built = query.build().unwrap();
        assert_eq!(
            built.cypher,
            "MATCH (p:Person)\nWHERE p.age > $p1 AND p.name STARTS WITH $p2\nRETURN p"
        );
    }

    #[test]
    fn structurally_equal_literals_share_one_parameter() {
        let query = match_node("p", "Person")
            .where_(Expr::prop("p", "age").eq(30))
            .returns(vec![Expr::ident("p")])
            .limit(30);
        let built = query.build().unwrap();
        assert_eq!(built.parameters.len(), 1);
        assert_eq!(built.parameters.get("p1"), Some(&Value::Int(30)));
        assert_eq!(
            built.cypher,
            "MATCH (p:Person)\nWHERE p.age = $p1\nRETURN p\nLIMIT $p1"
        );
    }

    #[test]
    fn aliases_are_never_parameterized() {
        let built = match_node("n", "Person")
            .returns(vec![Expr::prop("n", "name")])
            .build()
            .unwrap();
        assert!(built.parameters.is_empty());
        assert_eq!(built.cypher, "MATCH (n:Person)\nRETURN n.name");
    }

    #[test]
    fn user_parameters_render_verbatim() {
        let built = match_node("n", "Person")
            .where_(Expr::prop("n", "name").eq(Expr::param("name")))
            .returns(vec![Expr::ident("n")])
            .param("name", "Ada")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            built.cypher,
            "MATCH (n:Person)\nWHERE n.name = $name\nRETURN n"
        );
        assert_eq!(built.parameters.get("name"), Some(&Value::String("Ada".into())));
    }

    #[test]
    fn pattern_properties_are_parameterized() {
        let built = Query::new()
            .create(node("n").label("Person").property("name", "Ada"))
            .build()
            .unwrap();
        assert_eq!(built.cypher, "CREATE (n:Person {name: $p1})");
    }

    #[test]
    fn relationship_patterns_render_both_directions() {
        let pattern = <PathPattern as From<_>>::from(node("a"))
            .to("KNOWS", node("b"))
            .from("LIKES", node("c"));
        let built = Query::new()
            .match_(pattern)
            .returns(vec![Expr::ident("a")])
            .build()
            .unwrap();
        assert_eq!(
            built.cypher,
            "MATCH (a)-[:KNOWS]->(b)<-[:LIKES]-(c)\nRETURN a"
        );
    }

    #[test]
    fn merge_combines_where_and_replaces_pagination() {
        let left = match_node("p", "Person")
            .where_(Expr::prop("p", "age").gt(21))
            .limit(10)
            .returns(vec![Expr::ident("p")]);
        let right = Query::new()
            .where_(Expr::prop("p", "active").eq(true))
            .limit(5);
        let built = left.merge_query(right).unwrap().build().unwrap();
        assert_eq!(
            built.cypher,
            "MATCH (p:Person)\nWHERE p.age > $p1 AND p.active = $p2\nRETURN p\nLIMIT $p3"
        );
        assert_eq!(built.parameters.get("p3"), Some(&Value::Int(5)));
    }

    #[test]
    fn merge_detects_alias_conflicts() {
        let left = match_node("n", "A");
        let right = match_node("n", "B");
        match left.merge_query(right) {
            Err(Error::AliasConflict { alias, .. }) => assert_eq!(alias, "n"),
            other => panic!("expected alias conflict, got {other:?}"),
        }
    }

    #[test]
    fn unlabeled_alias_is_compatible() {
        let left = match_node("n", "A");
        let right = Query::new().match_(node("n"));
        assert!(left.merge_query(right).is_ok());
    }

    #[test]
    fn merge_renumbers_colliding_user_parameters() {
        let left = match_node("a", "A")
            .where_(Expr::prop("a", "x").eq(Expr::param("v")))
            .param("v", 1i64)
            .unwrap();
        let right = Query::new()
            .where_(Expr::prop("a", "y").eq(Expr::param("v")))
            .param("v", 2i64)
            .unwrap();
        let built = left.merge_query(right).unwrap().build().unwrap();
        assert_eq!(built.parameters.get("v"), Some(&Value::Int(1)));
        // The right-hand $v was renumbered but kept its value.
        let renamed: Vec<_> = built
            .parameters
            .iter()
            .filter(|(name, _)| *name != "v")
            .collect();
        assert_eq!(renamed.len(), 1);
        assert_eq!(renamed[0].1, &Value::Int(2));
        assert!(built.cypher.contains(&format!("a.y = ${}", renamed[0].0)));
    }

    #[test]
    fn exists_subquery_parameters_hoist_into_the_outer_query() {
        let inner = match_node("f", "Friend")
            .where_(Expr::prop("f", "since").gt(Expr::param("year")))
            .param("year", 2020i64)
            .unwrap()
            .returns(vec![Expr::ident("f")]);
        let built = match_node("p", "Person")
            .where_(Expr::ExistsSubquery(Box::new(inner)))
            .returns(vec![Expr::ident("p")])
            .build()
            .unwrap();
        assert!(built.cypher.starts_with("MATCH (p:Person)\nWHERE EXISTS {\n"));
        assert_eq!(built.parameters.get("year"), Some(&Value::Int(2020)));
    }

    #[test]
    fn union_composes_whole_queries() {
        let second = match_node("m", "Admin").returns(vec![Expr::ident("m")]);
        let built = match_node("n", "User")
            .returns(vec![Expr::ident("n")])
            .union_all(second)
            .build()
            .unwrap();
        assert_eq!(
            built.cypher,
            "MATCH (n:User)\nRETURN n\nUNION ALL\nMATCH (m:Admin)\nRETURN m"
        );
    }

    #[test]
    fn no_empty_lines_in_rendered_text() {
        let built = match_node("n", "Person")
            .where_(Expr::prop("n", "age").gt(18))
            .returns(vec![Expr::ident("n")])
            .order_by(vec![(Expr::prop("n", "name"), SortOrder::Asc)])
            .skip(5)
            .limit(10)
            .build()
            .unwrap();
        assert!(!built.cypher.contains("\n\n"));
        assert!(built.cypher.ends_with("LIMIT $p3"));
    }

    #[test]
    fn legacy_clauses_render_verbatim_in_their_category_slot() {
        let built = match_node("n", "Person")
            .legacy_clause(ClauseKind::Return, "RETURN n.name AS name")
            .build()
            .unwrap();
        assert_eq!(built.cypher, "MATCH (n:Person)\nRETURN n.name AS name");
    }

    #[test]
    fn odd_labels_are_escaped_not_interpolated() {
        let built = Query::new()
            .match_(node("n").label("Weird Label"))
            .returns(vec![Expr::ident("n")])
            .build()
            .unwrap();
        assert_eq!(built.cypher, "MATCH (n:`Weird Label`)\nRETURN n");
    }

    #[test]
    fn case_and_comprehension_render() {
        let case = Expr::Case {
            subject: None,
            branches: vec![(Expr::prop("n", "age").ge(18), Expr::lit("adult"))],
            default: Some(Box::new(Expr::lit("minor"))),
        };
        let built = match_node("n", "Person")
            .returns(vec![case.as_alias("bracket")])
            .build()
            .unwrap();
        assert_eq!(
            built.cypher,
            "MATCH (n:Person)\nRETURN CASE WHEN n.age >= $p1 THEN $p2 ELSE $p3 END AS bracket"
        );
    }
}

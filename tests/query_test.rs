//! Query-builder end-to-end scenarios.

use activecypher::cypher::{node, Expr, PathPattern, Query, SortOrder};
use activecypher::{match_node, Error, Value, Vendor};

#[test]
fn person_age_query_registers_one_parameter_referenced_twice() {
    // MATCH (p:Person) WHERE p.age = 30 RETURN p LIMIT 30 → one parameter.
    let built = match_node("p", "Person")
        .where_(Expr::prop("p", "age").eq(30))
        .returns(vec![Expr::ident("p")])
        .limit(30)
        .build()
        .unwrap();

    assert_eq!(built.parameters.len(), 1);
    assert_eq!(built.parameters.get("p1"), Some(&Value::Int(30)));
    assert_eq!(built.cypher.matches("$p1").count(), 2);
}

#[test]
fn alias_conflict_is_detected_and_compatible_merges_pass() {
    // MATCH (n:A) + MATCH (n:B) conflicts.
    let conflict = match_node("n", "A").merge_query(match_node("n", "B"));
    match conflict {
        Err(Error::AliasConflict { alias, left, right }) => {
            assert_eq!(alias, "n");
            assert_eq!(left, vec!["A".to_string()]);
            assert_eq!(right, vec!["B".to_string()]);
        }
        other => panic!("expected AliasConflict, got {other:?}"),
    }

    // MATCH (n:A) + MATCH (n) is compatible.
    let merged = match_node("n", "A")
        .merge_query(Query::new().match_(node("n")))
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(merged.cypher, "MATCH (n:A)\nMATCH (n)");
}

#[test]
fn merged_parameters_preserve_value_identity() {
    let left = match_node("p", "Person")
        .where_(Expr::prop("p", "age").eq(30))
        .returns(vec![Expr::ident("p")]);
    let right = Query::new().where_(Expr::prop("p", "retries").eq(30)).limit(30);

    let built = left.merge_query(right).unwrap().build().unwrap();
    // Every 30 collapses onto one registered parameter.
    assert_eq!(built.parameters.len(), 1);
    assert_eq!(built.cypher.matches("$p1").count(), 3);
}

#[test]
fn a_full_query_renders_in_canonical_order() {
    let pattern = <PathPattern as From<_>>::from(node("p").label("Person"))
        .to("WROTE", node("b").label("Book").property("year", 2020));
    let built = Query::new()
        .match_(pattern)
        .where_(Expr::prop("b", "title").contains("Rust"))
        .with_items(vec![Expr::ident("p"), Expr::ident("b")])
        .returns(vec![
            Expr::prop("p", "name").as_alias("author"),
            Expr::prop("b", "title").as_alias("title"),
        ])
        .order_by(vec![(Expr::ident("author"), SortOrder::Desc)])
        .skip(10)
        .limit(20)
        .build()
        .unwrap();

    assert_eq!(
        built.cypher,
        "MATCH (p:Person)-[:WROTE]->(b:Book {year: $p1})\n\
         WHERE b.title CONTAINS $p2\n\
         WITH p, b\n\
         RETURN p.name AS author, b.title AS title\n\
         ORDER BY author DESC\n\
         SKIP $p3\n\
         LIMIT $p4"
    );
    assert_eq!(built.parameters.get("p1"), Some(&Value::Int(2020)));
}

#[test]
fn vendor_id_predicates_compose_with_registered_parameters() {
    let adapter = Vendor::Neo4j.adapter();
    let mut query = match_node("n", "Person");
    // The id value travels as a declared parameter, never inline.
    query = query.param("node_id", "4:abc:17").unwrap();
    let predicate = adapter.id_predicate("n", "node_id");
    let built = query
        .where_(Expr::raw(predicate))
        .returns(vec![Expr::ident("n")])
        .build()
        .unwrap();

    assert_eq!(
        built.cypher,
        "MATCH (n:Person)\nWHERE elementId(n) = $node_id\nRETURN n"
    );
    assert_eq!(
        built.parameters.get("node_id"),
        Some(&Value::String("4:abc:17".into()))
    );

    let memgraph = Vendor::Memgraph.adapter();
    assert_eq!(memgraph.id_predicate("n", "node_id"), "id(n) = $node_id");
}

#[test]
fn exists_and_call_subqueries_hoist_parameters() {
    let inner = match_node("b", "Book")
        .where_(Expr::prop("b", "year").gt(Expr::param("cutoff")))
        .param("cutoff", 1999i64)
        .unwrap()
        .returns(vec![Expr::func("count", vec![Expr::ident("b")]).as_alias("books")]);

    let built = match_node("p", "Person")
        .call_subquery(inner)
        .returns(vec![Expr::ident("p"), Expr::ident("books")])
        .build()
        .unwrap();

    assert!(built.cypher.contains("CALL {\n"));
    assert!(built.cypher.contains("$cutoff"));
    assert_eq!(built.parameters.get("cutoff"), Some(&Value::Int(1999)));
}

#[test]
fn deep_composition_keeps_the_parameter_map_self_contained() {
    let base = match_node("u", "User")
        .where_(Expr::prop("u", "active").eq(true))
        .returns(vec![Expr::ident("u")]);
    let refinement = Query::new()
        .where_(Expr::prop("u", "age").ge(Expr::param("min_age")))
        .param("min_age", 21i64)
        .unwrap()
        .order_by(vec![(Expr::prop("u", "age"), SortOrder::Asc)])
        .limit(100);

    let built = base.merge_query(refinement).unwrap().build().unwrap();

    // Every $name in the text is present in the parameter map.
    for token in built.cypher.split(|c: char| !(c == '$' || c.is_alphanumeric() || c == '_')) {
        if let Some(name) = token.strip_prefix('$') {
            assert!(
                built.parameters.contains_key(name),
                "free parameter `{name}` in: {}",
                built.cypher
            );
        }
    }
}

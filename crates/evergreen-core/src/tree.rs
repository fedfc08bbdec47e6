//! Tree evaluation
//!
//! Walks a template once and classifies every node below the root as a
//! constant, an expression or a branch. The result is a flat map keyed by
//! symbolic path, rebuilt from scratch on every pass.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::expression::{self, Piece};
use crate::path::{ArrayPath, Subpath};
use crate::value::Value;

/// A string leaf that could not be parsed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{sympath}: {message} (in {literal:?})")]
pub struct LeafParseError {
    /// Symbolic path of the leaf
    pub sympath: String,
    /// Array path of the leaf
    pub path: ArrayPath,
    /// The offending string
    pub literal: String,
    /// What the parser objected to
    pub message: String,
}

/// A leaf that still needs resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionLeaf {
    /// Where the leaf lives
    pub path: ArrayPath,
    /// Parsed pieces, directive first if present
    pub pieces: Vec<Piece>,
    /// Every placeholder referenced, symbolic path to array path, in order of appearance
    pub dependencies: IndexMap<String, ArrayPath>,
}

impl ExpressionLeaf {
    pub fn sympath(&self) -> String {
        self.path.join()
    }

    /// The directive strategy, if the leaf carries one
    pub fn directive(&self) -> Option<&str> {
        expression::directive_of(&self.pieces)
    }
}

/// Classification of a single node
#[derive(Debug, Clone, PartialEq)]
pub enum LeafMetadata {
    /// Already final
    Constant { path: ArrayPath },
    /// Needs resolution
    Expression(ExpressionLeaf),
    /// A mapping or sequence; only traversed
    Branch { path: ArrayPath },
}

impl LeafMetadata {
    pub fn path(&self) -> &ArrayPath {
        match self {
            LeafMetadata::Constant { path } | LeafMetadata::Branch { path } => path,
            LeafMetadata::Expression(leaf) => &leaf.path,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, LeafMetadata::Constant { .. })
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, LeafMetadata::Expression(_))
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, LeafMetadata::Branch { .. })
    }

    pub fn as_expression(&self) -> Option<&ExpressionLeaf> {
        match self {
            LeafMetadata::Expression(leaf) => Some(leaf),
            _ => None,
        }
    }
}

/// Result of evaluating a tree
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Every non-root node, in document order
    pub paths: IndexMap<String, LeafMetadata>,
    /// Leaves that failed expression parsing
    pub errors: Vec<LeafParseError>,
}

impl Evaluation {
    pub fn get(&self, sympath: &str) -> Option<&LeafMetadata> {
        self.paths.get(sympath)
    }

    /// Is `sympath` an unresolved expression in this evaluation?
    pub fn is_expression(&self, sympath: &str) -> bool {
        self.paths
            .get(sympath)
            .is_some_and(LeafMetadata::is_expression)
    }

    /// Expression leaves in document order
    pub fn expressions(&self) -> impl Iterator<Item = &ExpressionLeaf> {
        self.paths.values().filter_map(LeafMetadata::as_expression)
    }

    pub fn expression_count(&self) -> usize {
        self.expressions().count()
    }

    /// Total number of placeholder dependencies across all expressions
    pub fn dependency_count(&self) -> usize {
        self.expressions().map(|leaf| leaf.dependencies.len()).sum()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Evaluate a whole template. The root must be a mapping.
pub fn evaluate(tree: &Value) -> Result<Evaluation> {
    evaluate_with_prefix(tree, &ArrayPath::root())
}

/// Evaluate a subtree whose node paths are reported under `prefix`
pub fn evaluate_with_prefix(tree: &Value, prefix: &ArrayPath) -> Result<Evaluation> {
    if !tree.is_mapping() {
        return Err(Error::tree_not_object(tree.type_name()));
    }

    let mut evaluation = Evaluation::default();
    walk_children(tree, prefix, &mut evaluation)?;
    Ok(evaluation)
}

fn walk_children(branch: &Value, path: &ArrayPath, evaluation: &mut Evaluation) -> Result<()> {
    match branch {
        Value::Mapping(map) => {
            for (key, child) in map {
                walk(child, path.child(Subpath::field(key.as_str())), evaluation)?;
            }
        }
        Value::Sequence(seq) => {
            for (i, child) in seq.iter().enumerate() {
                walk(child, path.child(Subpath::index(i)), evaluation)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn walk(node: &Value, path: ArrayPath, evaluation: &mut Evaluation) -> Result<()> {
    let sympath = path.join();

    let metadata = match node {
        Value::Mapping(_) | Value::Sequence(_) => {
            walk_children(node, &path, evaluation)?;
            LeafMetadata::Branch { path }
        }
        Value::String(literal) => match classify_string(literal, path.clone()) {
            Ok(metadata) => metadata,
            Err(message) => {
                evaluation.errors.push(LeafParseError {
                    sympath: sympath.clone(),
                    path,
                    literal: literal.clone(),
                    message,
                });
                return Ok(());
            }
        },
        _ => LeafMetadata::Constant { path },
    };

    // A key containing '.' or '[' can render to the same symbolic path as a nested node
    if evaluation.paths.contains_key(&sympath) {
        return Err(Error::invalid_path(
            sympath.clone(),
            format!("More than one node has the symbolic path '{}'", sympath),
        )
        .with_help("Rename keys containing '.', '[' or ']' so every node has a distinct path"));
    }
    evaluation.paths.insert(sympath, metadata);
    Ok(())
}

fn classify_string(literal: &str, path: ArrayPath) -> std::result::Result<LeafMetadata, String> {
    let pieces = expression::parse(literal).map_err(|e| parse_message(&e))?;

    if !expression::is_expression(&pieces) {
        return Ok(LeafMetadata::Constant { path });
    }

    let mut dependencies = IndexMap::new();
    for piece in &pieces {
        if let Piece::Placeholder(sympath) = piece {
            let target = ArrayPath::parse(sympath).map_err(|e| parse_message(&e))?;
            dependencies.insert(sympath.clone(), target);
        }
    }

    Ok(LeafMetadata::Expression(ExpressionLeaf {
        path,
        pieces,
        dependencies,
    }))
}

fn parse_message(err: &Error) -> String {
    match &err.cause {
        Some(cause) => cause.clone(),
        None => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn tree(json: serde_json::Value) -> Value {
        json.into()
    }

    #[test]
    fn test_root_must_be_mapping() {
        let err = evaluate(&Value::Sequence(vec![])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TreeNotObject);

        let err = evaluate(&Value::from("scalar")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TreeNotObject);
    }

    #[test]
    fn test_classifies_every_node() {
        let t = tree(serde_json::json!({
            "foo": "bar",
            "port": 3306,
            "enabled": true,
            "nothing": null,
            "pool": { "connection": "mysql://{{host}}:{{mysql.port}}" },
            "list": ["a", "{{foo}}"]
        }));
        let evaluation = evaluate(&t).unwrap();

        let keys: Vec<&str> = evaluation.paths.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "foo",
                "port",
                "enabled",
                "nothing",
                "pool.connection",
                "pool",
                "list[0]",
                "list[1]",
                "list"
            ]
        );

        assert!(evaluation.get("foo").unwrap().is_constant());
        assert!(evaluation.get("port").unwrap().is_constant());
        assert!(evaluation.get("nothing").unwrap().is_constant());
        assert!(evaluation.get("pool").unwrap().is_branch());
        assert!(evaluation.get("list").unwrap().is_branch());
        assert!(evaluation.is_expression("list[1]"));
        assert!(evaluation.get("").is_none());
    }

    #[test]
    fn test_records_dependencies() {
        let t = tree(serde_json::json!({
            "pool": { "connection": "mysql://{{host}}:{{mysql.port}}" }
        }));
        let evaluation = evaluate(&t).unwrap();
        let leaf = evaluation
            .get("pool.connection")
            .and_then(LeafMetadata::as_expression)
            .unwrap();

        let deps: Vec<&str> = leaf.dependencies.keys().map(String::as_str).collect();
        assert_eq!(deps, vec!["host", "mysql.port"]);
        assert_eq!(leaf.dependencies["mysql.port"].join(), "mysql.port");
        assert_eq!(leaf.path.join(), "pool.connection");
        assert_eq!(leaf.directive(), None);
    }

    #[test]
    fn test_directive_leaf_is_expression() {
        let t = tree(serde_json::json!({ "leaf": "$echo:hi" }));
        let evaluation = evaluate(&t).unwrap();
        let leaf = evaluation.expressions().next().unwrap();

        assert_eq!(leaf.directive(), Some("echo"));
        assert!(leaf.dependencies.is_empty());
    }

    #[test]
    fn test_escaped_placeholder_is_constant() {
        let t = tree(serde_json::json!({ "literal": "\\{{not.a.ref}}" }));
        let evaluation = evaluate(&t).unwrap();
        assert!(evaluation.get("literal").unwrap().is_constant());
    }

    #[test]
    fn test_aggregates_parse_errors() {
        let t = tree(serde_json::json!({
            "good": "{{foo}}",
            "bad": "hello {{world",
            "nested": { "worse": "{{a b}}" },
            "foo": "bar"
        }));
        let evaluation = evaluate(&t).unwrap();

        assert!(evaluation.has_errors());
        let failed: Vec<&str> = evaluation.errors.iter().map(|e| e.sympath.as_str()).collect();
        assert_eq!(failed, vec!["bad", "nested.worse"]);
        assert_eq!(evaluation.errors[0].literal, "hello {{world");

        // Siblings are still evaluated
        assert!(evaluation.is_expression("good"));
        assert!(evaluation.get("foo").unwrap().is_constant());
    }

    #[test]
    fn test_invalid_placeholder_path_is_parse_error() {
        let t = tree(serde_json::json!({ "bad": "{{a..b}}" }));
        let evaluation = evaluate(&t).unwrap();
        assert_eq!(evaluation.errors.len(), 1);
        assert!(evaluation.errors[0].to_string().starts_with("bad:"));
    }

    #[test]
    fn test_resolved_tree_has_no_expressions() {
        let t = tree(serde_json::json!({
            "foo": "bar",
            "hello": "bar",
            "nested": { "list": [1, 2.5, "x"] }
        }));
        let evaluation = evaluate(&t).unwrap();
        assert_eq!(evaluation.expression_count(), 0);
        assert_eq!(evaluation.dependency_count(), 0);
    }

    #[test]
    fn test_dotted_key_colliding_with_nested_node_is_rejected() {
        let t = tree(serde_json::json!({
            "a": { "b": "{{c}}" },
            "a.b": "x",
            "c": "y"
        }));
        let err = evaluate(&t).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPath);
        assert_eq!(err.path.as_deref(), Some("a.b"));

        // Same collision when the dotted key comes first
        let t = tree(serde_json::json!({ "list[0]": 1, "list": ["{{c}}"], "c": 2 }));
        let err = evaluate(&t).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("list[0]"));
    }

    #[test]
    fn test_dotted_key_without_collision_is_allowed() {
        let t = tree(serde_json::json!({ "a.b": "x", "c": 1 }));
        let evaluation = evaluate(&t).unwrap();
        assert!(evaluation.get("a.b").is_some());
    }

    #[test]
    fn test_prefix_is_applied() {
        let t = tree(serde_json::json!({ "a": "{{b}}" }));
        let prefix = ArrayPath::parse("outer[1]").unwrap();
        let evaluation = evaluate_with_prefix(&t, &prefix).unwrap();
        assert!(evaluation.is_expression("outer[1].a"));
    }
}

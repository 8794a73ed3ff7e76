//! YAML parsing into the generic document tree.

use serde_yaml::Value;
use thiserror::Error;

use crate::node::DocNode;

#[derive(Debug, Error)]
pub enum YamlParseError {
    #[error("invalid YAML: {0}")]
    Invalid(#[from] serde_yaml::Error),
}

/// Parse a YAML document into a [`DocNode`].
///
/// Scalar values are stringified; the validator never inspects them. An
/// empty document parses as an empty scalar.
pub fn parse(input: &str) -> Result<DocNode, YamlParseError> {
    let value: Value = serde_yaml::from_str(input)?;
    Ok(convert(value))
}

fn convert(value: Value) -> DocNode {
    match value {
        Value::Null => DocNode::Scalar(String::new()),
        Value::Bool(b) => DocNode::Scalar(b.to_string()),
        Value::Number(n) => DocNode::Scalar(n.to_string()),
        Value::String(s) => DocNode::Scalar(s),
        Value::Sequence(items) => DocNode::List(items.into_iter().map(convert).collect()),
        Value::Mapping(mapping) => DocNode::Map(
            mapping
                .into_iter()
                .map(|(k, v)| (key_to_string(&k), convert(v)))
                .collect(),
        ),
        Value::Tagged(tagged) => convert(tagged.value),
    }
}

fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_mapping() {
        let doc = parse("title: Widget\nspec:\n  weight: 12\n  color: red\n").unwrap();
        let spec = doc.get("spec").unwrap();
        assert_eq!(spec.kind(), "map");
        assert_eq!(spec.get("weight"), Some(&DocNode::scalar("12")));
    }

    #[test]
    fn parses_sequences() {
        let doc = parse("tags:\n  - a\n  - b\n").unwrap();
        match doc.get("tags").unwrap() {
            DocNode::List(items) => assert_eq!(items.len(), 2),
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn keeps_key_order() {
        let doc = parse("b: 1\na: 2\nc: 3\n").unwrap();
        match doc {
            DocNode::Map(pairs) => {
                let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, ["b", "a", "c"]);
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn empty_document_is_a_scalar() {
        assert_eq!(parse("").unwrap().kind(), "scalar");
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(parse("title: [unclosed").is_err());
    }
}

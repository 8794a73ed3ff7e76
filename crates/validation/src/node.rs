//! Generic document tree.

/// A parsed document node.
///
/// The dynamic nested shapes the parsers produce are collapsed into this
/// tagged variant so the comparison algorithm is format-agnostic. Map pairs
/// keep document order for stable error reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum DocNode {
    Scalar(String),
    List(Vec<DocNode>),
    Map(Vec<(String, DocNode)>),
}

impl DocNode {
    pub fn scalar(s: impl Into<String>) -> Self {
        DocNode::Scalar(s.into())
    }

    /// Human-readable node kind for mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            DocNode::Scalar(_) => "scalar",
            DocNode::List(_) => "list",
            DocNode::Map(_) => "map",
        }
    }

    /// Look up a map entry by key.
    pub fn get(&self, key: &str) -> Option<&DocNode> {
        match self {
            DocNode::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

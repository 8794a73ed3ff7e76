//! XML parsing into the generic document tree.
//!
//! Elements become map entries keyed by tag name. An element with only text
//! content is a scalar; repeated sibling tags collapse into a list under the
//! shared name, which is how XML expresses repetition. Attributes are
//! ignored: the validator checks tag structure, not decoration.

use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;

use crate::node::DocNode;

#[derive(Debug, Error)]
pub enum XmlParseError {
    #[error("invalid XML: {0}")]
    Invalid(#[from] quick_xml::Error),

    #[error("invalid XML: unexpected closing tag")]
    UnexpectedClose,

    #[error("invalid XML: document has no root element")]
    NoRootElement,
}

struct Frame {
    name: String,
    text: String,
    children: Vec<(String, DocNode)>,
}

/// Parse an XML document into a [`DocNode`].
///
/// The result is a single-entry map from the root tag to its content, so the
/// root tag itself participates in validation.
pub fn parse(input: &str) -> Result<DocNode, XmlParseError> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut top_level: Vec<(String, DocNode)> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                stack.push(Frame {
                    name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    text: String::new(),
                    children: Vec::new(),
                });
            }
            Event::Empty(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let entry = (name, DocNode::Scalar(String::new()));
                match stack.last_mut() {
                    Some(parent) => parent.children.push(entry),
                    None => top_level.push(entry),
                }
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                let frame = stack.pop().ok_or(XmlParseError::UnexpectedClose)?;
                let node = if frame.children.is_empty() {
                    DocNode::Scalar(frame.text.trim().to_string())
                } else {
                    DocNode::Map(group_repeated(frame.children))
                };
                let entry = (frame.name, node);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(entry),
                    None => top_level.push(entry),
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctypes.
            _ => {}
        }
    }

    if top_level.is_empty() {
        return Err(XmlParseError::NoRootElement);
    }
    Ok(DocNode::Map(group_repeated(top_level)))
}

/// Collapse repeated sibling tags into a single list entry, preserving the
/// position of each name's first occurrence.
fn group_repeated(children: Vec<(String, DocNode)>) -> Vec<(String, DocNode)> {
    let mut grouped: Vec<(String, Vec<DocNode>)> = Vec::new();
    for (name, node) in children {
        match grouped.iter_mut().find(|(n, _)| *n == name) {
            Some((_, bucket)) => bucket.push(node),
            None => grouped.push((name, vec![node])),
        }
    }
    grouped
        .into_iter()
        .map(|(name, mut nodes)| {
            if nodes.len() == 1 {
                (name, nodes.pop().expect("single node"))
            } else {
                (name, DocNode::List(nodes))
            }
        })
        .collect()
}

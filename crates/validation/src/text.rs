//! Plain-text / Markdown heading extraction.
//!
//! Text patterns are validated heading-for-heading rather than as a tree:
//! the approved schema fixes the exact outline (`#` level and text), and the
//! generated document must reproduce it with nothing before the first
//! heading.

use serde::{Deserialize, Serialize};

/// One `#`-prefixed heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// Number of leading `#` characters.
    pub level: u8,
    pub text: String,
}

impl Heading {
    pub fn new(level: u8, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

impl core::fmt::Display for Heading {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", "#".repeat(self.level as usize), self.text)
    }
}

/// Headings plus whether non-whitespace content precedes the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOutline {
    pub headings: Vec<Heading>,
    pub has_preamble: bool,
}

/// Extract the heading outline from a plain-text/Markdown document.
///
/// Never fails: a document without headings is an empty outline (possibly
/// with a preamble, which the validator rejects for generated output).
pub fn parse(input: &str) -> TextOutline {
    let mut headings = Vec::new();
    let mut has_preamble = false;

    for line in input.lines() {
        let trimmed = line.trim();
        if let Some(heading) = parse_heading(trimmed) {
            headings.push(heading);
        } else if headings.is_empty() && !trimmed.is_empty() {
            has_preamble = true;
        }
    }

    TextOutline {
        headings,
        has_preamble,
    }
}

fn parse_heading(line: &str) -> Option<Heading> {
    if !line.starts_with('#') {
        return None;
    }
    let level = line.chars().take_while(|c| *c == '#').count();
    // Cap matches Markdown's six levels; deeper runs of '#' are content.
    if level > 6 {
        return None;
    }
    let text = line[level..].trim().to_string();
    Some(Heading::new(level as u8, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_levels_and_text() {
        let outline = parse("# Overview\n\nBody text.\n\n## Details\n");
        assert_eq!(
            outline.headings,
            vec![Heading::new(1, "Overview"), Heading::new(2, "Details")]
        );
        assert!(!outline.has_preamble);
    }

    #[test]
    fn flags_content_before_first_heading() {
        let outline = parse("An introduction.\n\n# Overview\n");
        assert!(outline.has_preamble);
    }

    #[test]
    fn whitespace_before_first_heading_is_not_preamble() {
        let outline = parse("\n   \n# Overview\n");
        assert!(!outline.has_preamble);
    }

    #[test]
    fn seven_hashes_is_content_not_a_heading() {
        let outline = parse("####### not a heading\n# Real\n");
        assert!(outline.has_preamble);
        assert_eq!(outline.headings, vec![Heading::new(1, "Real")]);
    }

    #[test]
    fn empty_document_has_empty_outline() {
        let outline = parse("");
        assert!(outline.headings.is_empty());
        assert!(!outline.has_preamble);
    }
}

//! Patterns: user-authored output specifications.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::PatternId;

/// Serialization format a pattern targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Json,
    Yaml,
    Xml,
    Csv,
    /// Plain text / Markdown headings.
    Text,
}

impl OutputFormat {
    /// Formats with a provider-side guaranteed-shape contract.
    ///
    /// JSON and CSV manifests come back from the provider already constrained
    /// to the requested schema; the remaining formats are generated free-form
    /// and must pass structural validation after the fact.
    pub fn is_structured(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Csv)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
            OutputFormat::Xml => "xml",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "text",
        }
    }
}

impl core::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            "xml" => Ok(OutputFormat::Xml),
            "csv" => Ok(OutputFormat::Csv),
            "text" => Ok(OutputFormat::Text),
            other => Err(DomainError::validation(format!(
                "unknown output format: {}",
                other
            ))),
        }
    }
}

/// A user-approved output specification: target format, extraction
/// instructions, and the schema (or schema-as-example) document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub name: String,
    pub format: OutputFormat,
    /// Free-form extraction instructions forwarded to the provider.
    pub instructions: String,
    /// The schema document in the pattern's own format. For structured
    /// formats this is a JSON schema; for the rest it is the approved
    /// example document the generated output must structurally match.
    pub schema: String,
}

impl Pattern {
    pub fn new(
        name: impl Into<String>,
        format: OutputFormat,
        instructions: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            id: PatternId::new(),
            name: name.into(),
            format,
            instructions: instructions.into(),
            schema: schema.into(),
        }
    }
}

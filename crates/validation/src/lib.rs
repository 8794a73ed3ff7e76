//! `manifold-validation` — structural schema conformance.
//!
//! Free-form provider output (YAML, XML, plain text) has no guaranteed-shape
//! contract, so before a manifest is accepted it is checked against the
//! schema document the user approved. Format-specific parsers reduce both
//! documents to one generic tree ([`DocNode`]); a single recursive diff then
//! flags missing, extra, and mismatched structure. Leaf *values* are never
//! compared — they are expected to vary per image.
//!
//! ## Components
//!
//! - [`DocNode`]: scalar / ordered-list / key-value-map document tree
//! - [`yaml`], [`xml`]: parsers into [`DocNode`]
//! - [`text`]: Markdown-heading parser (plain text validates heading lists,
//!   not trees)
//! - [`validate`]: the shared entry point producing a [`ValidationReport`]

pub mod node;
pub mod text;
pub mod validator;
pub mod xml;
pub mod yaml;

pub use node::DocNode;
pub use validator::{DocumentFormat, ValidationReport, validate};

//! Shared structural comparison.

use tracing::debug;

use crate::node::DocNode;
use crate::{text, xml, yaml};

/// Formats the validator understands.
///
/// JSON and CSV are absent on purpose: the provider returns them under a
/// guaranteed-shape contract and they never reach post-hoc validation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Xml,
    Text,
}

impl DocumentFormat {
    fn label(&self) -> &'static str {
        match self {
            DocumentFormat::Yaml => "YAML",
            DocumentFormat::Xml => "XML",
            DocumentFormat::Text => "text",
        }
    }
}

/// Outcome of a validation run.
///
/// `is_valid` is exactly `errors.is_empty()`; warnings surface structure the
/// schema did not ask for but never fail the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// How to treat generated map keys the schema does not mention.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ExtraKeyPolicy {
    /// YAML: extensible documents, extra keys are advisory.
    Warn,
    /// XML: tags are fixed structure, extra tags are failures.
    Error,
}

/// Validate a generated document against the user-approved schema document.
///
/// A parse failure of either side is an immediate failure; no partial
/// validation is attempted.
pub fn validate(generated: &str, schema: &str, format: DocumentFormat) -> ValidationReport {
    let report = match format {
        DocumentFormat::Yaml => {
            validate_tree(generated, schema, format, ExtraKeyPolicy::Warn, |input| {
                yaml::parse(input).map_err(|e| e.to_string())
            })
        }
        DocumentFormat::Xml => {
            validate_tree(generated, schema, format, ExtraKeyPolicy::Error, |input| {
                xml::parse(input).map_err(|e| e.to_string())
            })
        }
        DocumentFormat::Text => validate_outline(generated, schema),
    };

    debug!(
        format = format.label(),
        valid = report.is_valid,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "structural validation finished"
    );
    report
}

fn validate_tree<P>(
    generated: &str,
    schema: &str,
    format: DocumentFormat,
    extra_keys: ExtraKeyPolicy,
    parse: P,
) -> ValidationReport
where
    P: Fn(&str) -> Result<DocNode, String>,
{
    let mut report = ValidationReport::new();

    let schema_tree = match parse(schema) {
        Ok(tree) => tree,
        Err(e) => {
            report.error(format!(
                "Schema document is not valid {}: {}",
                format.label(),
                e
            ));
            return report;
        }
    };
    let generated_tree = match parse(generated) {
        Ok(tree) => tree,
        Err(e) => {
            report.error(format!(
                "Generated document is not valid {}: {}",
                format.label(),
                e
            ));
            return report;
        }
    };

    compare(&schema_tree, &generated_tree, "root", extra_keys, &mut report);
    report
}

/// Recursive node-by-node structural diff.
///
/// Schema lists are repeating-item templates: only the first element shapes
/// the comparison, and every generated element must match it. Scalar leaves
/// compare by presence only.
fn compare(
    schema: &DocNode,
    generated: &DocNode,
    path: &str,
    extra_keys: ExtraKeyPolicy,
    report: &mut ValidationReport,
) {
    match (schema, generated) {
        (DocNode::Map(schema_pairs), DocNode::Map(generated_pairs)) => {
            for (key, schema_child) in schema_pairs {
                let child_path = format!("{}.{}", path, key);
                match generated.get(key) {
                    Some(generated_child) => {
                        compare(schema_child, generated_child, &child_path, extra_keys, report);
                    }
                    None => report.error(format!("Missing required key: {}", child_path)),
                }
            }
            for (key, _) in generated_pairs {
                if schema.get(key).is_none() {
                    let message = format!("Unexpected key: {}.{}", path, key);
                    match extra_keys {
                        ExtraKeyPolicy::Warn => report.warning(message),
                        ExtraKeyPolicy::Error => report.error(message),
                    }
                }
            }
        }
        (DocNode::List(template), DocNode::List(items)) => {
            let Some(template) = template.first() else {
                return;
            };
            for (index, item) in items.iter().enumerate() {
                let child_path = format!("{}[{}]", path, index);
                compare(template, item, &child_path, extra_keys, report);
            }
        }
        // A single generated occurrence of a repeating shape (an XML document
        // with one <item> where the schema showed several) still matches the
        // template.
        (DocNode::List(template), single) => {
            if let Some(template) = template.first() {
                compare(template, single, path, extra_keys, report);
            }
        }
        (DocNode::Scalar(_), DocNode::Scalar(_)) => {}
        (expected, found) => {
            report.error(format!(
                "Structure mismatch at {}: expected {}, found {}",
                path,
                expected.kind(),
                found.kind()
            ));
        }
    }
}

/// Plain-text validation: heading-for-heading equality, no preamble.
fn validate_outline(generated: &str, schema: &str) -> ValidationReport {
    let mut report = ValidationReport::new();

    let schema_outline = text::parse(schema);
    let generated_outline = text::parse(generated);

    if generated_outline.has_preamble {
        report.error("Content before first heading is not allowed");
    }

    let expected = &schema_outline.headings;
    let found = &generated_outline.headings;

    for (index, heading) in expected.iter().enumerate() {
        match found.get(index) {
            Some(actual) if actual == heading => {}
            Some(actual) => report.error(format!(
                "Heading mismatch at position {}: expected '{}', found '{}'",
                index + 1,
                heading,
                actual
            )),
            None => report.error(format!("Missing heading: {}", heading)),
        }
    }
    for heading in found.iter().skip(expected.len()) {
        report.error(format!("Extra heading found: {}", heading));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_missing_key_is_reported_with_path() {
        let schema = "title: Widget\nprice: 9.99\ntags:\n  - a\n  - b\n";
        let generated = "title: Bolt\nprice: 4.5\n";

        let report = validate(generated, schema, DocumentFormat::Yaml);
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["Missing required key: root.tags"]);
    }

    #[test]
    fn yaml_extra_key_is_a_warning_only() {
        let schema = "title: Widget\n";
        let generated = "title: Bolt\ncondition: used\n";

        let report = validate(generated, schema, DocumentFormat::Yaml);
        assert!(report.is_valid);
        assert_eq!(report.warnings, vec!["Unexpected key: root.condition"]);
    }

    #[test]
    fn yaml_nested_path_uses_brackets_for_list_indices() {
        let schema = "items:\n  - name: a\n    price: 1\n";
        let generated = "items:\n  - name: x\n    price: 2\n  - name: y\n";

        let report = validate(generated, schema, DocumentFormat::Yaml);
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["Missing required key: root.items[1].price"]);
    }

    #[test]
    fn yaml_parse_failure_fails_immediately() {
        let report = validate("title: [unclosed", "title: x\n", DocumentFormat::Yaml);
        assert!(!report.is_valid);
        assert!(report.errors[0].starts_with("Generated document is not valid YAML"));

        let report = validate("title: x\n", "title: [unclosed", DocumentFormat::Yaml);
        assert!(!report.is_valid);
        assert!(report.errors[0].starts_with("Schema document is not valid YAML"));
    }

    #[test]
    fn yaml_structure_mismatch_names_both_kinds() {
        let schema = "spec:\n  weight: 1\n";
        let generated = "spec: heavy\n";

        let report = validate(generated, schema, DocumentFormat::Yaml);
        assert!(!report.is_valid);
        assert_eq!(
            report.errors,
            vec!["Structure mismatch at root.spec: expected map, found scalar"]
        );
    }

    #[test]
    fn xml_extra_tag_is_an_error() {
        let schema = "<product><title>Widget</title></product>";
        let generated = "<product><title>Bolt</title><condition>used</condition></product>";

        let report = validate(generated, schema, DocumentFormat::Xml);
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["Unexpected key: root.product.condition"]);
    }

    #[test]
    fn xml_missing_tag_is_an_error() {
        let schema = "<product><title>Widget</title><price>9.99</price></product>";
        let generated = "<product><title>Bolt</title></product>";

        let report = validate(generated, schema, DocumentFormat::Xml);
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["Missing required key: root.product.price"]);
    }

    #[test]
    fn xml_repeated_template_accepts_any_count() {
        let schema = "<order><item><sku>a</sku></item><item><sku>b</sku></item></order>";
        let one = "<order><item><sku>x</sku></item></order>";
        let three =
            "<order><item><sku>x</sku></item><item><sku>y</sku></item><item><sku>z</sku></item></order>";

        assert!(validate(one, schema, DocumentFormat::Xml).is_valid);
        assert!(validate(three, schema, DocumentFormat::Xml).is_valid);
    }

    #[test]
    fn text_extra_heading_is_an_error() {
        let schema = "# Overview\n## Details\n";
        let generated = "# Overview\n## Details\n## Extra\n";

        let report = validate(generated, schema, DocumentFormat::Text);
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["Extra heading found: ## Extra"]);
    }

    #[test]
    fn text_missing_and_mismatched_headings() {
        let schema = "# Overview\n## Details\n";

        let report = validate("# Overview\n", schema, DocumentFormat::Text);
        assert_eq!(report.errors, vec!["Missing heading: ## Details"]);

        let report = validate("# Overview\n### Details\n", schema, DocumentFormat::Text);
        assert_eq!(
            report.errors,
            vec!["Heading mismatch at position 2: expected '## Details', found '### Details'"]
        );
    }

    #[test]
    fn text_preamble_is_rejected() {
        let schema = "# Overview\n";
        let generated = "Here is your summary:\n\n# Overview\n";

        let report = validate(generated, schema, DocumentFormat::Text);
        assert!(!report.is_valid);
        assert_eq!(
            report.errors,
            vec!["Content before first heading is not allowed"]
        );
    }

    #[test]
    fn identity_documents_validate_for_all_shapes() {
        let yaml_shapes = [
            "title: Widget\n",                              // map of scalars
            "spec:\n  weight: 12\n  color: red\n",          // nested map
            "items:\n  - name: a\n    price: 1\n  - name: b\n    price: 2\n", // list of maps
            "plain scalar\n",                               // bare scalar
            "",                                             // empty
        ];
        for doc in yaml_shapes {
            let report = validate(doc, doc, DocumentFormat::Yaml);
            assert!(report.is_valid, "yaml identity failed for {:?}: {:?}", doc, report.errors);
            assert!(report.errors.is_empty());
        }

        let xml_doc = "<product><title>Widget</title><tags><tag>a</tag><tag>b</tag></tags></product>";
        assert!(validate(xml_doc, xml_doc, DocumentFormat::Xml).is_valid);

        let text_doc = "# Overview\nBody.\n## Details\n";
        assert!(validate(text_doc, text_doc, DocumentFormat::Text).is_valid);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        /// Render an arbitrary homogeneous-list YAML value.
        fn arb_yaml_value() -> impl Strategy<Value = serde_yaml::Value> {
            let leaf = prop_oneof![
                "[a-z][a-z0-9]{0,8}".prop_map(serde_yaml::Value::String),
                any::<i64>().prop_map(|n| serde_yaml::Value::Number(n.into())),
                any::<bool>().prop_map(serde_yaml::Value::Bool),
            ];
            leaf.prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    // Lists repeat one element shape, matching how schema
                    // lists are interpreted (first element is the template).
                    (inner.clone(), 1usize..4).prop_map(|(element, n)| {
                        serde_yaml::Value::Sequence(vec![element; n])
                    }),
                    prop::collection::btree_map("[a-z][a-z0-9]{0,5}", inner, 1..4).prop_map(
                        |map| {
                            serde_yaml::Value::Mapping(
                                map.into_iter()
                                    .map(|(k, v)| (serde_yaml::Value::String(k), v))
                                    .collect(),
                            )
                        }
                    ),
                ]
            })
        }

        proptest! {
            /// Property: a document always structurally matches itself.
            #[test]
            fn yaml_identity_is_always_valid(value in arb_yaml_value()) {
                let doc = serde_yaml::to_string(&value).expect("render yaml");
                let report = validate(&doc, &doc, DocumentFormat::Yaml);
                prop_assert!(report.is_valid, "errors: {:?}", report.errors);
                prop_assert!(report.errors.is_empty());
            }
        }
    }
}

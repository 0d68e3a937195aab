use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::dsl::{ExtractionRule, ExtractionSchema, PaginationPolicy, RuleType};
use crate::error::{FlowError, FlowResult};
use crate::page::{xpath::xpath_to_css, Locator};

/// Outcome of a successful validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Structural checks for extraction schemas
pub struct SchemaValidator {
    max_depth: usize,
    rule_name_regex: Regex,
}

impl SchemaValidator {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            rule_name_regex: Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("static pattern"),
        }
    }

    /// Validate a complete schema. Errors are fatal, warnings are collected.
    pub fn validate(&self, schema: &ExtractionSchema) -> FlowResult<ValidationReport> {
        debug!("Validating extraction schema: {}", schema.id);
        let mut report = ValidationReport::default();

        if schema.id.trim().is_empty() {
            return Err(FlowError::schema_validation("Schema id cannot be empty"));
        }

        if schema.rules.is_empty() {
            report.warn(format!("Schema '{}' defines no rules", schema.id));
        }

        self.validate_siblings(&schema.rules, "", &mut report);
        for rule in &schema.rules {
            self.validate_rule(rule, 1, false, &mut report)?;
        }

        if let Some(pagination) = &schema.pagination {
            self.validate_pagination(pagination, &mut report)?;
        }

        debug!("Schema validation completed with {} warning(s)", report.warnings.len());
        Ok(report)
    }

    fn validate_rule(
        &self,
        rule: &ExtractionRule,
        depth: usize,
        is_child: bool,
        report: &mut ValidationReport,
    ) -> FlowResult<()> {
        if depth > self.max_depth {
            return Err(FlowError::MaxDepthExceeded { depth: self.max_depth });
        }

        if rule.name.trim().is_empty() {
            return Err(FlowError::schema_validation("Rule name cannot be empty"));
        }

        if !self.rule_name_regex.is_match(&rule.name) {
            report.warn(format!("Rule name '{}' contains unusual characters", rule.name));
        }

        match rule.locator() {
            Some(Locator::XPath(xpath)) => {
                if let Err(e) = xpath_to_css(&xpath) {
                    report.warn(format!("Rule '{}': {}", rule.name, e));
                }
            }
            Some(Locator::Css(selector)) => {
                if let Err(e) = scraper::Selector::parse(&selector) {
                    report.warn(format!("Rule '{}' has an invalid selector '{}': {:?}", rule.name, selector, e));
                }
            }
            None if !is_child && !rule.rule_type.is_page_level() => {
                return Err(FlowError::NoSelector { rule: rule.name.clone() });
            }
            None => {}
        }

        if let Some(pattern) = &rule.regex {
            if let Err(e) = Regex::new(pattern) {
                report.warn(format!("Rule '{}' has a regex that does not compile: {}", rule.name, e));
            }
        }

        if rule.rule_type == RuleType::Attribute && rule.attribute.as_deref().map_or(true, str::is_empty) {
            report.warn(format!("Rule '{}' is of type attribute but names no attribute", rule.name));
        }

        if !rule.children.is_empty() {
            if rule.rule_type != RuleType::List {
                report.warn(format!(
                    "Rule '{}' has children but type {:?} ignores them",
                    rule.name, rule.rule_type
                ));
            }

            self.validate_siblings(&rule.children, &rule.name, report);
            for child in &rule.children {
                self.validate_rule(child, depth + 1, true, report)?;
            }
        }

        Ok(())
    }

    fn validate_siblings(&self, rules: &[ExtractionRule], parent: &str, report: &mut ValidationReport) {
        let mut seen = HashSet::new();
        for rule in rules {
            if !seen.insert(rule.name.as_str()) {
                let scope = if parent.is_empty() { "schema" } else { parent };
                report.warn(format!(
                    "Duplicate rule name '{}' in {}; the last value wins",
                    rule.name, scope
                ));
            }
        }
    }

    fn validate_pagination(&self, pagination: &PaginationPolicy, report: &mut ValidationReport) -> FlowResult<()> {
        if pagination.max_pages == Some(0) {
            return Err(FlowError::schema_validation("Max pages must be greater than 0"));
        }

        let paginates = pagination.max_pages.unwrap_or(1) > 1;
        if paginates && pagination.next_selector.as_deref().map_or(true, str::is_empty) {
            report.warn("Pagination allows several pages but has no next selector".to_string());
        }

        if let Some(max_pages) = pagination.max_pages {
            if max_pages > 1000 {
                report.warn(format!("Very high max_pages value: {}", max_pages));
            }
        }

        if let Some(wait) = pagination.wait_between_pages {
            if wait > 60_000 {
                report.warn(format!("Very long wait between pages: {}ms", wait));
            }
        }

        Ok(())
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new(crate::config::ExtractionConfig::default().max_rule_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::SchemaExamples;

    #[test]
    fn test_examples_are_valid() {
        let validator = SchemaValidator::default();
        let report = validator.validate(&SchemaExamples::product_listing()).unwrap();
        assert!(report.is_clean(), "{:?}", report.warnings);
        assert!(validator.validate(&SchemaExamples::article()).is_ok());
    }

    #[test]
    fn test_missing_locator_is_rejected_for_element_rules() {
        let schema = ExtractionSchema::new("s", vec![ExtractionRule::new("title", RuleType::Text)]);
        let err = SchemaValidator::default().validate(&schema).unwrap_err();
        assert!(matches!(err, FlowError::NoSelector { rule } if rule == "title"));
    }

    #[test]
    fn test_page_level_and_child_rules_may_omit_locator() {
        let schema = ExtractionSchema::new(
            "s",
            vec![
                ExtractionRule::new("meta", RuleType::Metadata),
                ExtractionRule::new("links", RuleType::Links),
                ExtractionRule::new("items", RuleType::List)
                    .selector("li")
                    .child(ExtractionRule::new("label", RuleType::Text)),
            ],
        );
        assert!(SchemaValidator::default().validate(&schema).is_ok());
    }

    #[test]
    fn test_warnings() {
        let schema = ExtractionSchema::new(
            "s",
            vec![
                ExtractionRule::new("a", RuleType::Attribute).selector("img"),
                ExtractionRule::new("a", RuleType::Text).selector("p").regex("(unclosed"),
                ExtractionRule::new("b", RuleType::Text)
                    .selector("p")
                    .child(ExtractionRule::new("c", RuleType::Text)),
                ExtractionRule::new("d", RuleType::Text).xpath("//p/following-sibling::div"),
            ],
        );

        let report = SchemaValidator::default().validate(&schema).unwrap();
        assert_eq!(report.warnings.len(), 5, "{:?}", report.warnings);
        assert!(report.warnings.iter().any(|w| w.contains("Duplicate rule name 'a'")));
        assert!(report.warnings.iter().any(|w| w.contains("regex")));
        assert!(report.warnings.iter().any(|w| w.contains("ignores them")));
        assert!(report.warnings.iter().any(|w| w.contains("Unsupported XPath")));
    }

    #[test]
    fn test_depth_limit() {
        let mut rule = ExtractionRule::new("leaf", RuleType::Text);
        for level in 0..4 {
            rule = ExtractionRule::new(format!("level{}", level), RuleType::List)
                .selector("div")
                .child(rule);
        }
        let schema = ExtractionSchema::new("deep", vec![rule]);

        assert!(SchemaValidator::new(5).validate(&schema).is_ok());
        assert!(matches!(
            SchemaValidator::new(3).validate(&schema),
            Err(FlowError::MaxDepthExceeded { depth: 3 })
        ));
    }

    #[test]
    fn test_zero_max_pages_rejected() {
        let schema = ExtractionSchema::new("s", vec![ExtractionRule::new("m", RuleType::Metadata)])
            .with_pagination(PaginationPolicy {
                next_selector: Some("a.next".to_string()),
                max_pages: Some(0),
                wait_between_pages: None,
            });
        assert!(SchemaValidator::default().validate(&schema).is_err());
    }
}

//! Element predicates shared by control-flow tools and conditional actions.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::xml::{ElementId, XmlDocument};

/// Logical operator
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// A single predicate over the current element.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Condition {
    AttributeExists {
        name: String,
    },
    AttributeEquals {
        name: String,
        value: String,
    },
    AttributeMatches {
        name: String,
        pattern: String,
    },
    /// Direct child with the given tag (case-insensitive).
    HasChild {
        tag: String,
    },
    HasAncestor {
        tag: String,
    },
    HasText,
    TextEquals {
        value: String,
    },
    TextMatches {
        pattern: String,
    },
    ChildCount {
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    TagEquals {
        tag: String,
    },
}

impl Condition {
    pub fn evaluate(
        &self,
        doc: &XmlDocument,
        element: ElementId,
    ) -> bool {
        match self {
            Condition::AttributeExists { name } => doc.attribute(element, name).is_some(),
            Condition::AttributeEquals { name, value } => doc.attribute(element, name) == Some(value.as_str()),
            Condition::AttributeMatches { name, pattern } => doc.attribute(element, name).is_some_and(|v| matches(pattern, v)),
            Condition::HasChild { tag } => {
                let tag = tag.to_lowercase();
                doc.children(element).iter().any(|c| doc.tag_key(*c) == tag)
            }
            Condition::HasAncestor { tag } => {
                let tag = tag.to_lowercase();
                doc.ancestors(element).any(|a| doc.tag_key(a) == tag)
            }
            Condition::HasText => !doc.text_content(element).is_empty(),
            Condition::TextEquals { value } => doc.text_content(element) == *value,
            Condition::TextMatches { pattern } => matches(pattern, &doc.text_content(element)),
            Condition::ChildCount { tag, min, max } => {
                let tag = tag.as_ref().map(|t| t.to_lowercase());
                let count = doc.children(element).iter().filter(|c| tag.as_ref().is_none_or(|t| doc.tag_key(**c) == *t)).count();
                min.is_none_or(|m| count >= m) && max.is_none_or(|m| count <= m)
            }
            Condition::TagEquals { tag } => doc.tag_key(element) == tag.to_lowercase(),
        }
    }
}

/// Conditions combined with a logical operator. An empty set is true.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSet {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, alias = "combinator")]
    pub logical_operator: LogicalOperator,
}

impl ConditionSet {
    pub fn evaluate(
        &self,
        doc: &XmlDocument,
        element: ElementId,
    ) -> bool {
        let mut results = self.conditions.iter().map(|c| c.evaluate(doc, element));
        match self.logical_operator {
            LogicalOperator::And => results.all(|r| r),
            LogicalOperator::Or => self.conditions.is_empty() || results.any(|r| r),
        }
    }
}

/// Regex match that treats a malformed pattern as a non-match.
pub(crate) fn matches(
    pattern: &str,
    value: &str,
) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(value),
        Err(err) => {
            warn!(pattern, error = %err, "malformed regex in condition");
            false
        }
    }
}

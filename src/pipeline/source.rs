//! Where a step reads its input values from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    graph::GraphAssembler,
    model::NodeId,
    pipeline::filter::TagPatterns,
    runtime::ExecutionContext,
};

fn space() -> String {
    " ".to_string()
}

/// A single scalar input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ValueSource {
    Attribute { name: String },
    /// Full text content of the element.
    Text,
    /// Text directly inside the element.
    OwnText,
    /// Property of the current node.
    Property { name: String },
    Constant { value: Value },
    /// Text of the first direct child with the tag.
    ChildText { tag: String },
    /// Api payload stored under `key`.
    ApiData { key: String },
}

impl Default for ValueSource {
    fn default() -> Self {
        ValueSource::Text
    }
}

impl ValueSource {
    pub fn read(
        &self,
        ctx: &ExecutionContext,
        graph: &GraphAssembler,
        node: Option<NodeId>,
    ) -> Option<Value> {
        match self {
            ValueSource::Attribute { name } => ctx.attribute(name).map(|v| Value::String(v.to_string())),
            ValueSource::Text => Some(Value::String(ctx.text())),
            ValueSource::OwnText => Some(Value::String(ctx.doc.own_text(ctx.element))),
            ValueSource::Property { name } => node.and_then(|n| graph.property(n, name)).cloned(),
            ValueSource::Constant { value } => Some(value.clone()),
            ValueSource::ChildText { tag } => {
                let tag = tag.to_lowercase();
                ctx.doc.children(ctx.element).iter().find(|c| ctx.doc.tag_key(**c) == tag).map(|c| Value::String(ctx.doc.text_content(*c)))
            }
            ValueSource::ApiData { key } => ctx.api_data.get(key),
        }
    }

    /// Read and render as a string; `None` when missing or empty.
    pub fn read_string(
        &self,
        ctx: &ExecutionContext,
        graph: &GraphAssembler,
        node: Option<NodeId>,
    ) -> Option<String> {
        self.read(ctx, graph, node).map(|v| value_to_string(&v)).filter(|s| !s.is_empty())
    }
}

/// A list of values gathered from the element or the current node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "from", rename_all = "kebab-case")]
pub enum CollectionSource {
    /// Direct children, optionally tag-filtered; yields an attribute or the text.
    Children {
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        attribute: Option<String>,
    },
    Descendants {
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        attribute: Option<String>,
    },
    /// An attribute value split on a separator.
    Attribute {
        name: String,
        #[serde(default = "space")]
        separator: String,
    },
    /// The element text split on a separator.
    Text {
        #[serde(default = "space")]
        separator: String,
    },
    /// A node property; arrays are taken as-is, scalars become one item.
    Property { name: String },
}

impl Default for CollectionSource {
    fn default() -> Self {
        CollectionSource::Children {
            tag: None,
            attribute: None,
        }
    }
}

impl CollectionSource {
    pub fn collect(
        &self,
        ctx: &ExecutionContext,
        graph: &GraphAssembler,
        node: Option<NodeId>,
    ) -> Vec<Value> {
        match self {
            CollectionSource::Children { tag, attribute } => {
                let ids = ctx.doc.children(ctx.element).to_vec();
                element_values(ctx, ids, tag.as_deref(), attribute.as_deref())
            }
            CollectionSource::Descendants { tag, attribute } => {
                let ids = ctx.doc.descendants(ctx.element).collect();
                element_values(ctx, ids, tag.as_deref(), attribute.as_deref())
            }
            CollectionSource::Attribute { name, separator } => ctx.attribute(name).map(|v| split(v, separator)).unwrap_or_default(),
            CollectionSource::Text { separator } => split(&ctx.text(), separator),
            CollectionSource::Property { name } => match node.and_then(|n| graph.property(n, name)) {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Null) | None => Vec::new(),
                Some(v) => vec![v.clone()],
            },
        }
    }
}

fn element_values(
    ctx: &ExecutionContext,
    ids: Vec<usize>,
    tag: Option<&str>,
    attribute: Option<&str>,
) -> Vec<Value> {
    let patterns = tag.and_then(|t| TagPatterns::new(&[t]).ok());
    ids.into_iter()
        .filter(|id| patterns.as_ref().is_none_or(|p| p.is_match(&ctx.doc.tag_key(*id))))
        .filter_map(|id| match attribute {
            Some(attr) => ctx.doc.attribute(id, attr).map(|v| Value::String(v.to_string())),
            None => Some(Value::String(ctx.doc.text_content(id))),
        })
        .collect()
}

fn split(
    value: &str,
    separator: &str,
) -> Vec<Value> {
    let parts: Vec<&str> = if separator.trim().is_empty() {
        value.split_whitespace().collect()
    } else {
        value.split(separator).map(str::trim).filter(|s| !s.is_empty()).collect()
    };
    parts.into_iter().map(|s| Value::String(s.to_string())).collect()
}

/// Render a value as plain text; strings are unquoted, null is empty.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        v => v.to_string(),
    }
}

/// Numeric view of a value; numeric strings are parsed.
pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// JSON number from a float, preferring an integer when exact.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

//! Ordered string transforms applied left to right.

use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TransformType {
    Lowercase,
    Uppercase,
    Trim,
    /// Literal, global replacement.
    Replace,
    #[serde(alias = "regex")]
    RegexReplace,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransformParams {
    /// Literal search text or regex pattern.
    #[serde(default, alias = "search")]
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
    /// Regex flags: `g` (all matches), `i`, `m`, `s`, `x`. Defaults to `g`.
    #[serde(default)]
    pub flags: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    #[serde(rename = "type")]
    pub kind: TransformType,
    #[serde(default)]
    pub params: TransformParams,
}

impl Transform {
    pub fn new(kind: TransformType) -> Self {
        Self {
            kind,
            params: TransformParams::default(),
        }
    }

    pub fn apply(
        &self,
        value: &str,
    ) -> String {
        match self.kind {
            TransformType::Lowercase => value.to_lowercase(),
            TransformType::Uppercase => value.to_uppercase(),
            TransformType::Trim => value.trim().to_string(),
            TransformType::Replace => {
                if self.params.pattern.is_empty() {
                    return value.to_string();
                }
                match Regex::new(&regex::escape(&self.params.pattern)) {
                    Ok(re) => re.replace_all(value, NoExpand(&self.params.replacement)).into_owned(),
                    Err(_) => value.to_string(),
                }
            }
            TransformType::RegexReplace => self.regex_replace(value),
        }
    }

    fn regex_replace(
        &self,
        value: &str,
    ) -> String {
        let flags = self.params.flags.as_deref().unwrap_or("g");
        let re = RegexBuilder::new(&self.params.pattern)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .ignore_whitespace(flags.contains('x'))
            .build();

        match re {
            Ok(re) if flags.contains('g') => re.replace_all(value, self.params.replacement.as_str()).into_owned(),
            Ok(re) => re.replace(value, self.params.replacement.as_str()).into_owned(),
            Err(err) => {
                warn!(pattern = %self.params.pattern, error = %err, "malformed regex in transform, value left unchanged");
                value.to_string()
            }
        }
    }
}

/// Apply transforms left to right.
pub fn apply_transforms(
    value: &str,
    transforms: &[Transform],
) -> String {
    transforms.iter().fold(value.to_string(), |acc, t| t.apply(&acc))
}

/// Accepts either a transform array or a JSON string holding one.
///
/// Entries that do not decode are dropped one by one; a string that does not
/// parse as an array yields no transforms.
pub fn lenient_transforms<'de, D>(deserializer: D) -> std::result::Result<Vec<Transform>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<serde_json::Value>),
        Text(String),
        Other(serde_json::Value),
    }

    let entries = match Raw::deserialize(deserializer)? {
        Raw::List(list) => list,
        Raw::Text(text) if text.trim().is_empty() => Vec::new(),
        Raw::Text(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
            warn!(error = %err, "ignoring transform list that is not valid JSON");
            Vec::new()
        }),
        Raw::Other(_) => Vec::new(),
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(transform) => Some(transform),
            Err(err) => {
                warn!(error = %err, "dropping invalid transform");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn transforms(v: serde_json::Value) -> Vec<Transform> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_case_and_trim() {
        let list = transforms(json!([{ "type": "trim" }, { "type": "uppercase" }]));
        assert_eq!(apply_transforms("  rois ", &list), "ROIS");
        assert_eq!(Transform::new(TransformType::Lowercase).apply("Li"), "li");
    }

    #[test]
    fn test_literal_replace_is_global_and_escaped() {
        let list = transforms(json!([{ "type": "replace", "params": { "search": ".", "replacement": "$1" } }]));
        assert_eq!(apply_transforms("a.b.c", &list), "a$1b$1c");
    }

    #[test]
    fn test_regex_replace_flags() {
        let global = transforms(json!([{ "type": "regex-replace", "params": { "pattern": "[aeiou]", "replacement": "_" } }]));
        assert_eq!(apply_transforms("rois", &global), "r__s");

        let first_only = transforms(json!([{ "type": "regex", "params": { "pattern": "O", "replacement": "0", "flags": "i" } }]));
        assert_eq!(apply_transforms("foo", &first_only), "f0o");

        let groups = transforms(json!([{ "type": "regex-replace", "params": { "pattern": "(\\w+)-(\\w+)", "replacement": "$2 $1" } }]));
        assert_eq!(apply_transforms("li-rois", &groups), "rois li");
    }

    #[test]
    fn test_malformed_regex_passes_through() {
        let list = transforms(json!([{ "type": "regex-replace", "params": { "pattern": "([a-", "replacement": "x" } }, { "type": "uppercase" }]));
        assert_eq!(apply_transforms("abc", &list), "ABC");
    }

    #[test]
    fn test_lenient_transforms_from_string() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(deserialize_with = "lenient_transforms")]
            transforms: Vec<Transform>,
        }

        let ok: Holder = serde_json::from_value(json!({ "transforms": "[{\"type\":\"lowercase\"}]" })).unwrap();
        assert_eq!(ok.transforms, vec![Transform::new(TransformType::Lowercase)]);

        let bad: Holder = serde_json::from_value(json!({ "transforms": "[{\"type\":" })).unwrap();
        assert!(bad.transforms.is_empty());
    }

    #[test]
    fn test_lenient_transforms_drop_only_bad_entries() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(deserialize_with = "lenient_transforms")]
            transforms: Vec<Transform>,
        }

        let mixed: Holder = serde_json::from_value(json!({ "transforms": [
            { "type": "trim" },
            { "type": "reverse" },
            { "type": "uppercase" }
        ] }))
        .unwrap();
        assert_eq!(mixed.transforms, vec![Transform::new(TransformType::Trim), Transform::new(TransformType::Uppercase)]);
        assert_eq!(apply_transforms(" li ", &mixed.transforms), "LI");
    }
}

//! `{{ $json.path }}` expressions evaluated against a fetched JSON payload.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Regex pattern for template expressions
/// Format: `{{ $json.key }}`, `{{ $json.items[0].name }}`
const TEMPLATE_PATTERN: &str = r"\{\{\s*(\$json[^}]*?)\s*\}\}";

static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(TEMPLATE_PATTERN).expect("template pattern is valid"));

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parse `$json.a.b[0].c` into segments. Returns `None` for anything outside the grammar.
pub fn parse_path(expr: &str) -> Option<Vec<PathSegment>> {
    let rest = expr.trim().strip_prefix("$json")?;
    let mut segments = Vec::new();
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut key = String::new();
                while let Some(&n) = chars.peek() {
                    if n == '.' || n == '[' {
                        break;
                    }
                    key.push(n);
                    chars.next();
                }
                if key.is_empty() {
                    return None;
                }
                segments.push(PathSegment::Key(key));
            }
            '[' => {
                let mut digits = String::new();
                for n in chars.by_ref() {
                    if n == ']' {
                        break;
                    }
                    digits.push(n);
                }
                segments.push(PathSegment::Index(digits.trim().parse().ok()?));
            }
            _ => return None,
        }
    }

    Some(segments)
}

/// Walk `payload` along `segments`; `None` on type mismatch or out-of-range index.
pub fn evaluate_path<'a>(
    payload: &'a Value,
    segments: &[PathSegment],
) -> Option<&'a Value> {
    segments.iter().try_fold(payload, |current, segment| match (segment, current) {
        (PathSegment::Key(k), Value::Object(map)) => map.get(k),
        (PathSegment::Index(i), Value::Array(items)) => items.get(*i),
        _ => None,
    })
}

/// If the whole string is a single expression, return the raw resolved value.
///
/// `Some(None)` means the string is an expression that resolved to nothing.
pub fn evaluate_expression(
    template: &str,
    payload: &Value,
) -> Option<Option<Value>> {
    let trimmed = template.trim();
    let caps = TEMPLATE_RE.captures(trimmed)?;
    let full = caps.get(0)?;
    if full.start() != 0 || full.end() != trimmed.len() {
        return None;
    }
    let segments = parse_path(&caps[1])?;
    Some(evaluate_path(payload, &segments).cloned())
}

/// Replace every expression in `template`; non-scalars render as compact JSON,
/// `null` and unresolved paths render as the empty string.
pub fn render_template(
    template: &str,
    payload: &Value,
) -> String {
    TEMPLATE_RE
        .replace_all(template, |caps: &regex::Captures| match parse_path(&caps[1]) {
            Some(segments) => stringify(evaluate_path(payload, &segments)),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Whether the string contains at least one expression.
pub fn has_template(s: &str) -> bool {
    TEMPLATE_RE.is_match(s)
}

/// Resolve expressions in a JSON value recursively.
///
/// A string consisting of exactly one expression is replaced by the raw value
/// it resolves to; other strings are rendered.
pub fn resolve_json_value(
    value: &Value,
    payload: &Value,
) -> Value {
    match value {
        Value::String(s) if has_template(s) => match evaluate_expression(s, payload) {
            Some(Some(raw)) if !raw.is_null() => raw,
            Some(_) => Value::String(String::new()),
            None => Value::String(render_template(s, payload)),
        },
        Value::Array(arr) => Value::Array(arr.iter().map(|v| resolve_json_value(v, payload)).collect()),
        Value::Object(obj) => Value::Object(obj.iter().map(|(k, v)| (k.clone(), resolve_json_value(v, payload))).collect()),
        _ => value.clone(),
    }
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload() -> Value {
        json!({
            "name": "Dante",
            "born": 1265,
            "alive": false,
            "empty": null,
            "aliases": ["Durante", "Dante Alighieri"],
            "works": [{ "title": "Commedia", "year": 1320 }]
        })
    }

    // ==================== parse_path tests ====================

    #[test]
    fn test_parse_path_segments() {
        assert_eq!(
            parse_path("$json.works[0].title"),
            Some(vec![PathSegment::Key("works".into()), PathSegment::Index(0), PathSegment::Key("title".into())])
        );
        assert_eq!(parse_path("$json"), Some(vec![]));
    }

    #[test]
    fn test_parse_path_rejects_invalid() {
        assert_eq!(parse_path("json.a"), None);
        assert_eq!(parse_path("$json..a"), None);
        assert_eq!(parse_path("$json.a[x]"), None);
        assert_eq!(parse_path("$jsonx"), None);
    }

    // ==================== evaluate tests ====================

    #[test]
    fn test_evaluate_path_mismatch_is_none() {
        let p = payload();
        assert_eq!(evaluate_path(&p, &parse_path("$json.name[0]").unwrap()), None);
        assert_eq!(evaluate_path(&p, &parse_path("$json.aliases[5]").unwrap()), None);
        assert_eq!(evaluate_path(&p, &parse_path("$json.aliases.first").unwrap()), None);
        assert_eq!(evaluate_path(&p, &parse_path("$json.aliases[1]").unwrap()), Some(&json!("Dante Alighieri")));
    }

    #[test]
    fn test_evaluate_expression_full_string() {
        let p = payload();
        assert_eq!(evaluate_expression("{{ $json.born }}", &p), Some(Some(json!(1265))));
        assert_eq!(evaluate_expression("{{$json.works[0]}}", &p), Some(Some(json!({"title": "Commedia", "year": 1320}))));
        assert_eq!(evaluate_expression("{{ $json.missing }}", &p), Some(None));
        assert_eq!(evaluate_expression("born {{ $json.born }}", &p), None);
    }

    // ==================== render_template tests ====================

    #[test]
    fn test_render_template_scalars() {
        let p = payload();
        assert_eq!(render_template("{{ $json.name }} ({{ $json.born }})", &p), "Dante (1265)");
        assert_eq!(render_template("alive: {{ $json.alive }}", &p), "alive: false");
    }

    #[test]
    fn test_render_template_null_and_missing_are_empty() {
        let p = payload();
        assert_eq!(render_template("[{{ $json.empty }}][{{ $json.nope.deeper }}]", &p), "[][]");
    }

    #[test]
    fn test_render_template_non_scalar_as_compact_json() {
        let p = payload();
        assert_eq!(render_template("{{ $json.aliases }}", &p), r#"["Durante","Dante Alighieri"]"#);
    }

    #[test]
    fn test_render_template_plain_text_untouched() {
        assert_eq!(render_template("no templates {{ here }}", &payload()), "no templates {{ here }}");
    }

    // ==================== resolve_json_value tests ====================

    #[test]
    fn test_resolve_json_value_nested() {
        let p = payload();
        let config = json!({
            "property": "author",
            "value": "{{ $json.name }}",
            "year": "{{ $json.works[0].year }}",
            "label": "by {{ $json.name }}",
            "list": ["{{ $json.aliases[0] }}", 3],
            "missing": "{{ $json.nope }}"
        });
        assert_eq!(
            resolve_json_value(&config, &p),
            json!({
                "property": "author",
                "value": "Dante",
                "year": 1320,
                "label": "by Dante",
                "list": ["Durante", 3],
                "missing": ""
            })
        );
    }
}

//! Label selector evaluation and rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

pub const OP_IN: &str = "In";
pub const OP_NOT_IN: &str = "NotIn";
pub const OP_EXISTS: &str = "Exists";
pub const OP_DOES_NOT_EXIST: &str = "DoesNotExist";

pub fn exists(key: &str) -> LabelSelectorRequirement {
    LabelSelectorRequirement { key: key.to_string(), operator: OP_EXISTS.to_string(), values: None }
}

fn requirement_matches(req: &LabelSelectorRequirement, labels: Option<&BTreeMap<String, String>>) -> bool {
    let got = labels.and_then(|l| l.get(&req.key));
    let values = req.values.as_deref().unwrap_or(&[]);
    match req.operator.as_str() {
        OP_IN => got.map(|v| values.contains(v)).unwrap_or(false),
        OP_NOT_IN => got.map(|v| !values.contains(v)).unwrap_or(true),
        OP_EXISTS => got.is_some(),
        OP_DOES_NOT_EXIST => got.is_none(),
        // unknown operators select nothing
        _ => false,
    }
}

/// Whether `labels` satisfy every term of `sel`. An empty selector matches everything.
pub fn selector_matches(sel: &LabelSelector, labels: Option<&BTreeMap<String, String>>) -> bool {
    if let Some(want) = &sel.match_labels {
        for (k, v) in want {
            if labels.and_then(|l| l.get(k)) != Some(v) {
                return false;
            }
        }
    }
    sel.match_expressions
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .all(|r| requirement_matches(r, labels))
}

/// Render in the API server's `labelSelector` query syntax, for `ListParams`.
pub fn selector_to_string(sel: &LabelSelector) -> String {
    let mut out = String::new();
    let sep = |out: &mut String| {
        if !out.is_empty() {
            out.push(',');
        }
    };
    if let Some(ml) = &sel.match_labels {
        for (k, v) in ml {
            sep(&mut out);
            let _ = write!(out, "{}={}", k, v);
        }
    }
    for r in sel.match_expressions.as_deref().unwrap_or(&[]) {
        sep(&mut out);
        let values = r.values.as_deref().unwrap_or(&[]).join(",");
        let _ = match r.operator.as_str() {
            OP_IN => write!(out, "{} in ({})", r.key, values),
            OP_NOT_IN => write!(out, "{} notin ({})", r.key, values),
            OP_DOES_NOT_EXIST => write!(out, "!{}", r.key),
            _ => write!(out, "{}", r.key),
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn match_labels_and_expressions() {
        let sel = LabelSelector {
            match_labels: Some(labels(&[("app", "llm")])),
            match_expressions: Some(vec![
                exists("tier"),
                LabelSelectorRequirement { key: "zone".into(), operator: OP_NOT_IN.into(), values: Some(vec!["b".into()]) },
            ]),
        };
        assert!(selector_matches(&sel, Some(&labels(&[("app", "llm"), ("tier", "x")]))));
        assert!(selector_matches(&sel, Some(&labels(&[("app", "llm"), ("tier", "x"), ("zone", "a")]))));
        assert!(!selector_matches(&sel, Some(&labels(&[("app", "llm"), ("tier", "x"), ("zone", "b")]))));
        assert!(!selector_matches(&sel, Some(&labels(&[("app", "llm")]))));
        assert!(!selector_matches(&sel, None));
        assert!(selector_matches(&LabelSelector::default(), None));
    }

    #[test]
    fn renders_query_syntax() {
        let sel = LabelSelector {
            match_labels: Some(labels(&[("a", "1"), ("b", "2")])),
            match_expressions: Some(vec![
                exists("c"),
                LabelSelectorRequirement { key: "d".into(), operator: OP_IN.into(), values: Some(vec!["x".into(), "y".into()]) },
                LabelSelectorRequirement { key: "e".into(), operator: OP_DOES_NOT_EXIST.into(), values: None },
            ]),
        };
        assert_eq!(selector_to_string(&sel), "a=1,b=2,c,d in (x,y),!e");
    }
}

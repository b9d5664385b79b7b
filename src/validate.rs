//! Config validation (friendly errors)
//!
//! Runs on the untyped JSON before typed loading, so each issue can name the exact
//! location and carry a hint. Typed loading still has the final word: an Error here
//! usually means the typed loader will refuse the entry too.

use std::collections::BTreeSet;

use pandelirium_engine::operator::BUILTIN_OPERATORS;
use serde_json::Value;

use crate::{logi, loge, logw};

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    pub path: String,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    Warn,
    Error,
}

impl ValidationIssue {
    pub fn warn(path: impl Into<String>, message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            level: IssueLevel::Warn,
            path: path.into(),
            message: message.into(),
            hint,
        }
    }

    pub fn error(
        path: impl Into<String>,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        Self {
            level: IssueLevel::Error,
            path: path.into(),
            message: message.into(),
            hint,
        }
    }
}

pub fn emit_issues(tag: &str, issues: &[ValidationIssue]) {
    for it in issues {
        let hint = it.hint.as_deref().map(|h| format!(" (hint: {h})")).unwrap_or_default();
        match it.level {
            IssueLevel::Warn => logw!(tag, "{}: {}{}", it.path, it.message, hint),
            IssueLevel::Error => loge!(tag, "{}: {}{}", it.path, it.message, hint),
        }
    }
}

/// One summary line even when there are zero issues, so the log shows validation ran.
pub fn emit_summary(tag: &str, label: &str, issues: &[ValidationIssue]) {
    let warns = issues.iter().filter(|i| i.level == IssueLevel::Warn).count();
    let errs = issues.iter().filter(|i| i.level == IssueLevel::Error).count();
    if errs == 0 && warns == 0 {
        logi!(tag, "validation: {label} OK (0 issues)");
    } else {
        logw!(tag, "validation: {label} issues found (errors={errs} warnings={warns})");
    }
}

/// session.json:
/// - duplicate or unnamed params, rates outside (0, 1]
/// - threshold outside [0, 1], zero tick period, bad MIDI channel
/// - triggers that target unknown params, empty int ranges, degenerate option sets
pub fn validate_session_json(v: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if let Some(t) = v.get("threshold") {
        match t.as_f64() {
            Some(t) if (0.0..=1.0).contains(&t) => {}
            _ => issues.push(ValidationIssue::error(
                "session.json:/threshold",
                format!("threshold {t} must be a number in [0, 1]"),
                Some("samples are normalized; the live sets use 0.7".into()),
            )),
        }
    }

    if let Some(ms) = v.get("tick_ms") {
        if ms.as_u64().map_or(true, |ms| ms == 0) {
            issues.push(ValidationIssue::error(
                "session.json:/tick_ms",
                format!("tick_ms {ms} must be a positive integer"),
                Some("16 gives roughly 60 ticks per second".into()),
            ));
        }
    }

    if let Some(ch) = v.get("midi").and_then(|m| m.get("channel")) {
        let ok = match ch {
            Value::String(s) => {
                s.trim() == "*" || s.trim().parse::<u8>().map_or(false, |n| n <= 16)
            }
            Value::Number(n) => n.as_u64().map_or(false, |n| n <= 16),
            _ => false,
        };
        if !ok {
            issues.push(ValidationIssue::error(
                "session.json:/midi/channel",
                format!("invalid MIDI channel {ch}"),
                Some("use \"*\" for any channel, or 1..16".into()),
            ));
        }
    }

    let mut names = BTreeSet::new();
    match v.get("params").and_then(|p| p.as_array()) {
        Some(arr) => {
            for (i, p) in arr.iter().enumerate() {
                let base = format!("session.json:/params/{i}");
                match p.get("name").and_then(|n| n.as_str()) {
                    Some(n) => {
                        if !names.insert(n.to_string()) {
                            issues.push(ValidationIssue::error(
                                format!("{base}/name"),
                                format!("duplicate param name '{n}'"),
                                Some(
                                    "param names must be unique; triggers address params by name"
                                        .into(),
                                ),
                            ));
                        }
                    }
                    None => issues.push(ValidationIssue::error(
                        format!("{base}/name"),
                        "missing or non-string param name",
                        None,
                    )),
                }
                match p.get("rate").and_then(|r| r.as_f64()) {
                    Some(r) if r > 0.0 && r <= 1.0 => {}
                    _ => issues.push(ValidationIssue::error(
                        format!("{base}/rate"),
                        "rate must be a number in (0, 1]",
                        Some(
                            "fraction of the remaining distance covered per tick, e.g. 0.05"
                                .into(),
                        ),
                    )),
                }
            }
        }
        None => {
            if v.get("params").is_some() {
                issues.push(ValidationIssue::error(
                    "session.json:/params",
                    "'params' must be an array",
                    None,
                ));
            } else {
                issues.push(ValidationIssue::warn(
                    "session.json:/params",
                    "no params declared",
                    Some("omit the file entirely to get the built-in kaleidoscope set".into()),
                ));
            }
        }
    }

    if let Some(arr) = v.get("triggers").and_then(|t| t.as_array()) {
        for (i, t) in arr.iter().enumerate() {
            validate_trigger(&format!("session.json:/triggers/{i}"), t, &names, &mut issues);
        }
    }

    issues
}

fn validate_trigger(
    base: &str,
    t: &Value,
    names: &BTreeSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    if t.get("cc").and_then(|c| c.as_u64()).map_or(true, |c| c > 127) {
        issues.push(ValidationIssue::error(
            format!("{base}/cc"),
            "cc must be an integer in 0..127",
            None,
        ));
    }

    let Some(action) = t.get("action") else {
        issues.push(ValidationIssue::error(format!("{base}/action"), "missing action", None));
        return;
    };

    let kind = action.get("kind").and_then(|k| k.as_str()).unwrap_or("");
    match kind {
        "vibrant_color" => match action.get("targets").and_then(|t| t.as_array()) {
            Some(ts) if ts.len() == 3 => {
                for (j, name) in ts.iter().enumerate() {
                    let path = format!("{base}/action/targets/{j}");
                    check_target(issues, names, path, name.as_str());
                }
            }
            _ => issues.push(ValidationIssue::error(
                format!("{base}/action/targets"),
                "vibrant_color needs exactly three targets",
                Some("[red, green, blue] param names".into()),
            )),
        },
        "int_range" => {
            let target = action.get("target").and_then(|t| t.as_str());
            check_target(issues, names, format!("{base}/action/target"), target);
            let min = action.get("min").and_then(|m| m.as_i64());
            let max = action.get("max").and_then(|m| m.as_i64());
            match (min, max) {
                (Some(a), Some(b)) if a <= b => {}
                _ => issues.push(ValidationIssue::error(
                    format!("{base}/action"),
                    "int_range needs integer min <= max",
                    None,
                )),
            }
        }
        "choice" => {
            let target = action.get("target").and_then(|t| t.as_str());
            check_target(issues, names, format!("{base}/action/target"), target);
            let options: Vec<f64> = action
                .get("options")
                .and_then(|o| o.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_f64()).collect())
                .unwrap_or_default();
            let first = options.first().copied();
            if !first.map_or(false, |f| options.iter().any(|o| *o != f)) {
                issues.push(ValidationIssue::error(
                    format!("{base}/action/options"),
                    "choice needs at least two distinct numeric options",
                    Some("with fewer there is nothing to switch to".into()),
                ));
            }
        }
        other => issues.push(ValidationIssue::error(
            format!("{base}/action/kind"),
            format!("unknown action kind '{other}'"),
            Some("one of: vibrant_color, int_range, choice".into()),
        )),
    }
}

/// operators.json:
/// - names that are missing, repeated, or reserved by built-ins
/// - unknown categories, missing or doubled bodies, duplicate inputs
pub fn validate_operators_json(v: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let Some(arr) = v.get("operators").and_then(|o| o.as_array()) else {
        issues.push(ValidationIssue::error(
            "operators.json:/operators",
            "missing or non-array 'operators'",
            Some(
                "expected: { \"operators\": [ {\"name\": \"fisheye\", \"type\": \"coord\", ...} ] }"
                    .into(),
            ),
        ));
        return issues;
    };

    let mut seen = BTreeSet::new();
    for (i, op) in arr.iter().enumerate() {
        let base = format!("operators.json:/operators/{i}");

        match op.get("name").and_then(|n| n.as_str()) {
            Some(n) if BUILTIN_OPERATORS.contains(&n) => issues.push(ValidationIssue::error(
                format!("{base}/name"),
                format!("'{n}' is a built-in operator"),
                Some("pick another name; built-ins cannot be replaced".into()),
            )),
            Some(n) => {
                if !seen.insert(n.to_string()) {
                    issues.push(ValidationIssue::warn(
                        format!("{base}/name"),
                        format!("operator '{n}' defined more than once"),
                        Some("the later definition replaces the earlier one".into()),
                    ));
                }
            }
            None => issues.push(ValidationIssue::error(
                format!("{base}/name"),
                "missing or non-string name",
                None,
            )),
        }

        let ty = op.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if !matches!(ty, "src" | "coord" | "color" | "combine" | "combineCoord") {
            issues.push(ValidationIssue::error(
                format!("{base}/type"),
                format!("unknown operator type '{ty}'"),
                Some("one of: src, coord, color, combine, combineCoord".into()),
            ));
        }

        let has_glsl = op.get("glsl").is_some();
        let has_file = op.get("glsl_file").is_some();
        match (has_glsl, has_file) {
            (false, false) => issues.push(ValidationIssue::error(
                base.clone(),
                "missing body: set 'glsl' or 'glsl_file'",
                None,
            )),
            (true, true) => issues.push(ValidationIssue::warn(
                base.clone(),
                "both 'glsl' and 'glsl_file' set",
                Some("glsl_file wins; drop one to avoid confusion".into()),
            )),
            _ => {}
        }

        let mut inputs = BTreeSet::new();
        if let Some(ins) = op.get("inputs").and_then(|i| i.as_array()) {
            for (j, input) in ins.iter().enumerate() {
                if let Some(n) = input.get("name").and_then(|n| n.as_str()) {
                    if !inputs.insert(n) {
                        issues.push(ValidationIssue::error(
                            format!("{base}/inputs/{j}/name"),
                            format!("duplicate input '{n}'"),
                            None,
                        ));
                    }
                }
            }
        }
    }

    issues
}

fn check_target(
    issues: &mut Vec<ValidationIssue>,
    names: &BTreeSet<String>,
    path: String,
    target: Option<&str>,
) {
    match target {
        Some(name) if names.contains(name) => {}
        Some(name) => issues.push(ValidationIssue::error(
            path,
            format!("trigger targets unknown param '{name}'"),
            Some(format!("declared params: {}", join_set(names))),
        )),
        None => issues.push(ValidationIssue::error(path, "missing target", None)),
    }
}

fn join_set(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn messages(issues: &[ValidationIssue]) -> Vec<String> {
        issues.iter().map(|i| format!("{}: {}", i.path, i.message)).collect()
    }

    #[test]
    fn clean_session_has_no_issues() {
        let v = json!({
            "threshold": 0.7,
            "tick_ms": 16,
            "midi": { "channel": "*" },
            "params": [ { "name": "scale", "initial": 1.0, "rate": 0.1 } ],
            "triggers": [
                { "cc": 6, "action": { "kind": "choice", "target": "scale", "options": [0.05, 0.2, 1.0, 5.0] } }
            ]
        });
        assert!(validate_session_json(&v).is_empty());
    }

    #[test]
    fn session_defects_are_reported_with_paths() {
        let v = json!({
            "threshold": 1.5,
            "midi": { "channel": 17 },
            "params": [
                { "name": "k", "initial": 3.0, "rate": 0.0 },
                { "name": "k", "initial": 3.0, "rate": 0.1 }
            ],
            "triggers": [
                { "cc": 5, "action": { "kind": "int_range", "target": "nope", "min": 3, "max": 11 } },
                { "cc": 6, "action": { "kind": "choice", "target": "k", "options": [1.0, 1.0] } },
                { "cc": 7, "action": { "kind": "wobble" } }
            ]
        });
        let issues = validate_session_json(&v);
        let msgs = messages(&issues);
        assert!(issues.iter().all(|i| i.level == IssueLevel::Error), "{msgs:?}");
        for want in [
            "session.json:/threshold",
            "session.json:/midi/channel",
            "session.json:/params/0/rate",
            "session.json:/params/1/name",
            "session.json:/triggers/0/action/target",
            "session.json:/triggers/1/action/options",
            "session.json:/triggers/2/action/kind",
        ] {
            assert!(msgs.iter().any(|m| m.starts_with(want)), "missing {want} in {msgs:?}");
        }
    }

    #[test]
    fn operator_defects_are_reported() {
        let v = json!({
            "operators": [
                { "name": "fisheye", "type": "coord", "inputs": [], "glsl": "return _st;" },
                { "name": "fisheye", "type": "coord", "inputs": [], "glsl": "return _st;" },
                { "name": "kaleid", "type": "coord", "inputs": [], "glsl": "return _st;" },
                { "name": "warp", "type": "wobble", "inputs": [
                    { "type": "float", "name": "a", "default": 0 },
                    { "type": "float", "name": "a", "default": 1 }
                ] }
            ]
        });
        let issues = validate_operators_json(&v);
        let msgs = messages(&issues);
        assert_eq!(issues[0].level, IssueLevel::Warn, "{msgs:?}");
        assert!(msgs[0].starts_with("operators.json:/operators/1/name"));
        assert!(msgs.iter().any(|m| m.contains("'kaleid' is a built-in")));
        assert!(msgs.iter().any(|m| m.contains("unknown operator type 'wobble'")));
        assert!(msgs.iter().any(|m| m.contains("missing body")));
        assert!(msgs.iter().any(|m| m.contains("duplicate input 'a'")));
    }

    #[test]
    fn missing_operator_list_is_an_error() {
        let issues = validate_operators_json(&json!({ "version": 1 }));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, IssueLevel::Error);
    }
}

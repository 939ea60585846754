use once_cell::sync::Lazy;
use regex::Regex;

/// Characters that are not safe inside a per-instance file name
static NAME_SANITIZER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\-_.]").expect("Invalid regex pattern"));

static SEPARATOR_RUN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-_]{2,}").expect("Invalid regex pattern"));

/// Sanitizes one component of an instance file stem (app name, user name):
/// - Only alphanumeric characters, dashes, dots and underscores
/// - Spaces become underscores
/// - Runs of separators collapse to the first one
/// - Never empty
pub fn sanitize_instance_component(raw: &str) -> String {
    let replaced = raw.trim().replace(' ', "_");
    let sanitized = NAME_SANITIZER_REGEX.replace_all(&replaced, "");
    let collapsed = SEPARATOR_RUN_REGEX.replace_all(&sanitized, |caps: &regex::Captures| {
        caps[0].chars().next().map(String::from).unwrap_or_default()
    });
    let trimmed = collapsed.trim_matches(&['-', '_', '.'][..]);

    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

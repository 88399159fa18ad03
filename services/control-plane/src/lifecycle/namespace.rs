//! Namespace identifier derivation.
//!
//! Namespace names follow DNS-1123 label rules: at most 63 characters of
//! lowercase alphanumerics and hyphens, with no hyphen at either edge.
//! Names that do not fit are rejected rather than silently truncated, so
//! the name a caller asked for is always recognizable in the namespace.

use crate::errors::CoreError;

pub const MAX_NAMESPACE_LEN: usize = 63;

/// Derive the namespace identifier for a project from its team's name and
/// the requested project name.
pub fn namespace_name(team_name: &str, project_name: &str) -> Result<String, CoreError> {
    let sanitized = sanitize(&format!("{team_name}-{project_name}"));

    if sanitized.is_empty() {
        return Err(CoreError::validation(format!(
            "project name '{project_name}' yields an empty namespace identifier"
        )));
    }
    if sanitized.len() > MAX_NAMESPACE_LEN {
        return Err(CoreError::validation(format!(
            "derived namespace '{sanitized}' is {} characters long; the limit is {MAX_NAMESPACE_LEN}",
            sanitized.len()
        )));
    }

    Ok(sanitized)
}

/// Lowercase, map every run of non [a-z0-9] characters to a single
/// hyphen, and strip hyphens from both edges.
fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_hyphen = false;

    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            out.push(c);
            pending_hyphen = false;
        } else {
            pending_hyphen = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_team_and_project_names() {
        assert_eq!(
            namespace_name("platform-eng", "api-gateway").expect("valid"),
            "platform-eng-api-gateway"
        );
    }

    #[test]
    fn lowercases_and_replaces_punctuation() {
        assert_eq!(
            namespace_name("Data Science", "Model_Serving v2").expect("valid"),
            "data-science-model-serving-v2"
        );
    }

    #[test]
    fn collapses_runs_and_strips_edges() {
        assert_eq!(
            namespace_name("--ops--", "__cache!!").expect("valid"),
            "ops-cache"
        );
    }

    #[test]
    fn empty_result_is_rejected() {
        let err = namespace_name("***", "///").expect_err("nothing survives sanitizing");
        assert!(err.to_string().contains("empty namespace identifier"));
    }

    #[test]
    fn too_long_is_rejected_not_truncated() {
        let team = "t".repeat(40);
        let project = "p".repeat(40);
        let err = namespace_name(&team, &project).expect_err("81 characters must not fit");
        assert!(err.to_string().contains("limit is 63"));
    }

    #[test]
    fn exactly_63_characters_is_accepted() {
        let team = "t".repeat(31);
        let project = "p".repeat(31);
        let name = namespace_name(&team, &project).expect("63 characters fit");
        assert_eq!(name.len(), 63);
    }
}

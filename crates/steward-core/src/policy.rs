//! Approval policy matching.
//!
//! Evaluates action descriptors against policy matchers. Supported forms:
//!
//! - `*` matches every action
//! - `Bash` matches a tool by exact name
//! - `mcp__*` matches a tool-name prefix
//! - `Bash(git push*)` matches a tool plus a glob on its primary argument
//! - `re:^Web.*` matches the tool name against a regular expression

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Lowest accepted policy priority.
pub const MIN_PRIORITY: i64 = 0;
/// Highest accepted policy priority.
pub const MAX_PRIORITY: i64 = 1000;
/// Maximum policy name length (chars).
pub const MAX_NAME_LEN: usize = 100;
/// Maximum matcher length (chars).
pub const MAX_MATCHER_LEN: usize = 500;
/// Maximum description length (chars).
pub const MAX_DESCRIPTION_LEN: usize = 1000;

/// Input keys inspected, in order, for an action's primary argument.
const PRIMARY_ARG_KEYS: &[&str] = &[
    "command",
    "file_path",
    "notebook_path",
    "path",
    "url",
    "pattern",
    "query",
    "prompt",
];

/// Action taken when a policy matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyAction {
    /// Allow without prompting.
    AutoApprove,
    /// Deny without prompting.
    AutoDeny,
    /// Hold the action until a human decides.
    Queue,
}

impl PolicyAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutoApprove => "auto-approve",
            Self::AutoDeny => "auto-deny",
            Self::Queue => "queue",
        }
    }
}

impl std::fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto-approve" => Ok(Self::AutoApprove),
            "auto-deny" => Ok(Self::AutoDeny),
            "queue" => Ok(Self::Queue),
            other => Err(Error::Policy(format!("unknown policy action: {other}"))),
        }
    }
}

/// Optional structured conditions that narrow a policy beyond its matcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConditions {
    /// Only applies to actions in projects under this path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path_prefix: Option<String>,
    /// Only applies when the serialized tool input contains this text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_contains: Option<String>,
    /// Only applies when the estimated cost is at least this much.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_estimated_cost_usd: Option<f64>,
}

impl PolicyConditions {
    pub const fn is_empty(&self) -> bool {
        self.project_path_prefix.is_none()
            && self.input_contains.is_none()
            && self.min_estimated_cost_usd.is_none()
    }

    /// Check the conditions against a descriptor.
    pub fn matches(&self, action: &ActionDescriptor) -> bool {
        if let Some(prefix) = &self.project_path_prefix {
            match &action.project_path {
                Some(path) if Path::new(path).starts_with(prefix) => {}
                _ => return false,
            }
        }
        if let Some(needle) = &self.input_contains
            && !action.tool_input.to_string().contains(needle.as_str())
        {
            return false;
        }
        if let Some(min) = self.min_estimated_cost_usd
            && action.estimated_cost_usd.unwrap_or(0.0) < min
        {
            return false;
        }
        true
    }

    fn validate(&self) -> Result<()> {
        if let Some(min) = self.min_estimated_cost_usd
            && !(min.is_finite() && min >= 0.0)
        {
            return Err(Error::Policy(
                "minEstimatedCostUsd must be a non-negative number".to_string(),
            ));
        }
        if self
            .project_path_prefix
            .as_ref()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(Error::Policy(
                "projectPathPrefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// The action a policy is evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub session_id: String,
    /// Kind of request, e.g. `"tool_use"`.
    pub request_type: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
}

impl ActionDescriptor {
    /// Descriptor for a tool invocation.
    pub fn tool_use(session_id: &str, tool_name: &str, tool_input: Value) -> Self {
        Self {
            session_id: session_id.to_string(),
            request_type: "tool_use".to_string(),
            tool_name: tool_name.to_string(),
            tool_input,
            project_path: None,
            estimated_cost_usd: None,
        }
    }

    /// The argument a `Tool(arg)` matcher is compared with.
    pub fn primary_argument(&self) -> Option<&str> {
        match &self.tool_input {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => PRIMARY_ARG_KEYS
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str)),
            _ => None,
        }
    }
}

/// Parsed policy matcher.
#[derive(Debug, Clone)]
pub enum PolicyMatcher {
    Any,
    Exact(String),
    Prefix(String),
    WithArgument { tool: String, argument: String },
    Regex(Regex),
}

impl PolicyMatcher {
    /// Parse a matcher string, rejecting malformed patterns.
    pub fn parse(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(Error::Policy("matcher must not be empty".to_string()));
        }
        if pattern == "*" {
            return Ok(Self::Any);
        }
        if let Some(expr) = pattern.strip_prefix("re:") {
            return Regex::new(expr)
                .map(Self::Regex)
                .map_err(|e| Error::Policy(format!("invalid matcher regex: {e}")));
        }
        if let Some(open) = pattern.find('(') {
            let Some(inner) = pattern[open + 1..].strip_suffix(')') else {
                return Err(Error::Policy(format!(
                    "matcher {pattern:?} has an unterminated argument"
                )));
            };
            let tool = &pattern[..open];
            if tool.is_empty() || !is_tool_name(tool) {
                return Err(Error::Policy(format!(
                    "matcher {pattern:?} has an invalid tool name"
                )));
            }
            if inner.is_empty() {
                return Err(Error::Policy(format!(
                    "matcher {pattern:?} has an empty argument"
                )));
            }
            return Ok(Self::WithArgument {
                tool: tool.to_string(),
                argument: inner.to_string(),
            });
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            if !is_tool_name(prefix) {
                return Err(Error::Policy(format!(
                    "matcher {pattern:?} has an invalid prefix"
                )));
            }
            return Ok(Self::Prefix(prefix.to_string()));
        }
        if !is_tool_name(pattern) {
            return Err(Error::Policy(format!(
                "matcher {pattern:?} is not a tool name"
            )));
        }
        Ok(Self::Exact(pattern.to_string()))
    }

    /// Check whether the matcher applies to an action.
    pub fn matches(&self, action: &ActionDescriptor) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(tool) => tool == &action.tool_name,
            Self::Prefix(prefix) => action.tool_name.starts_with(prefix.as_str()),
            Self::WithArgument { tool, argument } => {
                tool == &action.tool_name
                    && action
                        .primary_argument()
                        .is_some_and(|arg| matches_glob(argument, arg))
            }
            Self::Regex(re) => re.is_match(&action.tool_name),
        }
    }
}

fn is_tool_name(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Glob match where `*` matches any run of characters (including `/`).
fn matches_glob(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == value;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !value.starts_with(first) || value.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &value[first.len()..];
    for middle in &parts[1..parts.len() - 1] {
        if middle.is_empty() {
            continue;
        }
        match rest.find(middle) {
            Some(idx) => rest = &rest[idx + middle.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Validate the user-provided parts of a policy before any state changes.
pub fn validate_policy_fields(
    name: &str,
    matcher: &str,
    description: Option<&str>,
    priority: i64,
    conditions: &PolicyConditions,
) -> Result<PolicyMatcher> {
    if name.trim().is_empty() {
        return Err(Error::Policy("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::Policy(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if matcher.chars().count() > MAX_MATCHER_LEN {
        return Err(Error::Policy(format!(
            "matcher must be at most {MAX_MATCHER_LEN} characters"
        )));
    }
    if description.is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN) {
        return Err(Error::Policy(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(Error::Policy(format!(
            "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}"
        )));
    }
    conditions.validate()?;
    PolicyMatcher::parse(matcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bash(command: &str) -> ActionDescriptor {
        ActionDescriptor::tool_use("s1", "Bash", json!({ "command": command }))
    }

    #[test]
    fn matches_exact_tool() {
        let m = PolicyMatcher::parse("Bash").unwrap();
        assert!(m.matches(&bash("ls")));
        assert!(!m.matches(&ActionDescriptor::tool_use("s1", "Read", json!({}))));
    }

    #[test]
    fn matches_wildcard_tool() {
        let m = PolicyMatcher::parse("mcp__*").unwrap();
        assert!(m.matches(&ActionDescriptor::tool_use(
            "s1",
            "mcp__github__create_pr",
            json!({})
        )));
        assert!(!m.matches(&bash("ls")));
    }

    #[test]
    fn matches_star_all() {
        let m = PolicyMatcher::parse("*").unwrap();
        assert!(m.matches(&ActionDescriptor::tool_use("s1", "anything", Value::Null)));
    }

    #[test]
    fn matches_tool_argument_glob() {
        let m = PolicyMatcher::parse("Bash(git push*)").unwrap();
        assert!(m.matches(&bash("git push origin main")));
        assert!(!m.matches(&bash("git status")));

        let m = PolicyMatcher::parse("Write(*/.env)").unwrap();
        let write = ActionDescriptor::tool_use("s1", "Write", json!({"file_path": "/repo/.env"}));
        assert!(m.matches(&write));
    }

    #[test]
    fn matches_regex() {
        let m = PolicyMatcher::parse("re:^Web(Fetch|Search)$").unwrap();
        assert!(m.matches(&ActionDescriptor::tool_use("s1", "WebFetch", json!({}))));
        assert!(!m.matches(&ActionDescriptor::tool_use("s1", "Web", json!({}))));
    }

    #[test]
    fn rejects_malformed_matchers() {
        assert!(PolicyMatcher::parse("").is_err());
        assert!(PolicyMatcher::parse("Bash(ls").is_err());
        assert!(PolicyMatcher::parse("Bash()").is_err());
        assert!(PolicyMatcher::parse("re:(").is_err());
        assert!(PolicyMatcher::parse("two words").is_err());
    }

    #[test]
    fn glob_handles_middle_wildcards() {
        assert!(matches_glob("rm -rf *", "rm -rf /tmp/x"));
        assert!(matches_glob("*secret*", "cat my-secret-file"));
        assert!(!matches_glob("a*b*c", "acb"));
        assert!(matches_glob("a*a", "aa"));
        assert!(!matches_glob("ab*ba", "aba"));
    }

    #[test]
    fn conditions_narrow_matches() {
        let conditions = PolicyConditions {
            project_path_prefix: Some("/work/prod".to_string()),
            input_contains: Some("--force".to_string()),
            min_estimated_cost_usd: None,
        };
        let mut action = bash("git push --force");
        assert!(!conditions.matches(&action));

        action.project_path = Some("/work/prod/api".to_string());
        assert!(conditions.matches(&action));

        action.project_path = Some("/work/production".to_string());
        assert!(!conditions.matches(&action));
    }

    #[test]
    fn validation_bounds_priority_and_lengths() {
        let none = PolicyConditions::default();
        assert!(validate_policy_fields("ok", "Bash", None, 10, &none).is_ok());
        assert!(validate_policy_fields(" ", "Bash", None, 10, &none).is_err());
        assert!(validate_policy_fields("ok", "Bash", None, 1001, &none).is_err());
        assert!(validate_policy_fields("ok", "Bash", None, -1, &none).is_err());
        let long = "n".repeat(MAX_NAME_LEN + 1);
        assert!(validate_policy_fields(&long, "Bash", None, 1, &none).is_err());
    }

    #[test]
    fn action_round_trips_through_str() {
        for action in [
            PolicyAction::AutoApprove,
            PolicyAction::AutoDeny,
            PolicyAction::Queue,
        ] {
            assert_eq!(action.as_str().parse::<PolicyAction>().unwrap(), action);
        }
    }
}

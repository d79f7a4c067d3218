//! Cost estimation and model pricing.
//!
//! Estimates are derived from a static per-category token baseline adjusted
//! by the size of the tool input (roughly four characters per token). Actual
//! costs price the serialized request/response sizes, or the explicit
//! `usage` block when the response carries one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Characters per token used by the size heuristic.
pub const CHARS_PER_TOKEN: usize = 4;

/// Multiplier applied to the base input rate for cache-write tokens.
pub const CACHE_WRITE_MULTIPLIER: f64 = 1.25;

/// Multiplier applied to the base input rate for cache-read tokens.
pub const CACHE_READ_MULTIPLIER: f64 = 0.10;

/// Inputs above this many tokens make the estimate less trustworthy.
const LARGE_INPUT_TOKENS: u64 = 40_000;

/// Input keys whose string values count as measurable content.
const CONTENT_KEYS: &[&str] = &[
    "content",
    "new_string",
    "old_string",
    "command",
    "prompt",
    "query",
    "pattern",
    "url",
    "new_source",
    "edits",
];

/// Broad classification of a tool for cost purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    FileRead,
    FileWrite,
    Search,
    Shell,
    Web,
    Agent,
    Mcp,
    Other,
}

/// Token baseline for a tool category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBaseline {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ToolCategory {
    /// Classify a tool by name.
    pub fn classify(tool_name: &str) -> Self {
        match tool_name {
            "Read" | "NotebookRead" => Self::FileRead,
            "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => Self::FileWrite,
            "Glob" | "Grep" | "LS" => Self::Search,
            "Bash" | "BashOutput" | "KillShell" => Self::Shell,
            "WebFetch" | "WebSearch" => Self::Web,
            "Task" | "Agent" => Self::Agent,
            name if name.starts_with("mcp__") => Self::Mcp,
            _ => Self::Other,
        }
    }

    /// Static token baseline. `Other` is the documented fallback
    /// (1 000 input / 500 output tokens).
    pub const fn baseline(self) -> TokenBaseline {
        let (input_tokens, output_tokens) = match self {
            Self::FileRead => (1_500, 300),
            Self::FileWrite => (800, 400),
            Self::Search => (600, 300),
            Self::Shell => (500, 400),
            Self::Web => (3_000, 800),
            Self::Agent => (8_000, 3_000),
            Self::Mcp => (1_200, 600),
            Self::Other => (1_000, 500),
        };
        TokenBaseline {
            input_tokens,
            output_tokens,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileRead => "file_read",
            Self::FileWrite => "file_write",
            Self::Search => "search",
            Self::Shell => "shell",
            Self::Web => "web",
            Self::Agent => "agent",
            Self::Mcp => "mcp",
            Self::Other => "other",
        }
    }

    /// Starting confidence before input-size adjustments.
    const fn base_confidence(self) -> Confidence {
        match self {
            Self::FileRead
            | Self::FileWrite
            | Self::Search
            | Self::Shell
            | Self::Web
            | Self::Mcp => Confidence::Medium,
            Self::Agent | Self::Other => Confidence::Low,
        }
    }

    /// Whether a measured input makes the estimate reliable.
    const fn is_deterministic(self) -> bool {
        matches!(self, Self::FileWrite | Self::Search | Self::Shell)
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much an estimate can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    const fn lower(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }
}

/// Pre-execution cost estimate. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub tool_category: ToolCategory,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
    pub confidence: Confidence,
}

/// Post-execution cost. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualCost {
    pub tool_category: ToolCategory,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
}

/// Per-million-token prices for a model family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

const OPUS: ModelPricing = ModelPricing {
    input_per_mtok: 15.0,
    output_per_mtok: 75.0,
};
const SONNET: ModelPricing = ModelPricing {
    input_per_mtok: 3.0,
    output_per_mtok: 15.0,
};
const HAIKU: ModelPricing = ModelPricing {
    input_per_mtok: 0.80,
    output_per_mtok: 4.0,
};

/// Rate used for models not in the table.
pub const DEFAULT_PRICING: ModelPricing = SONNET;

impl ModelPricing {
    /// Look up pricing by model id; unknown models use [`DEFAULT_PRICING`].
    pub fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("opus") {
            OPUS
        } else if model.contains("haiku") {
            HAIKU
        } else if model.contains("sonnet") {
            SONNET
        } else {
            DEFAULT_PRICING
        }
    }

    /// Price a token mix in USD.
    pub fn price(&self, usage: &TokenUsage) -> f64 {
        let per_token_in = self.input_per_mtok / 1_000_000.0;
        let per_token_out = self.output_per_mtok / 1_000_000.0;
        usage.input_tokens as f64 * per_token_in
            + usage.output_tokens as f64 * per_token_out
            + usage.cache_write_tokens as f64 * per_token_in * CACHE_WRITE_MULTIPLIER
            + usage.cache_read_tokens as f64 * per_token_in * CACHE_READ_MULTIPLIER
    }
}

/// Token counts for one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    /// Read an explicit `usage` block (Anthropic field names).
    fn from_usage_block(usage: &Value) -> Option<Self> {
        let obj = usage.as_object()?;
        let field = |name: &str| obj.get(name).and_then(Value::as_u64).unwrap_or(0);
        if !obj.contains_key("input_tokens") && !obj.contains_key("output_tokens") {
            return None;
        }
        Some(Self {
            input_tokens: field("input_tokens"),
            output_tokens: field("output_tokens"),
            cache_write_tokens: field("cache_creation_input_tokens"),
            cache_read_tokens: field("cache_read_input_tokens"),
        })
    }
}

/// Approximate token count for a number of characters (rounded up).
pub const fn tokens_for_chars(chars: usize) -> u64 {
    chars.div_ceil(CHARS_PER_TOKEN) as u64
}

/// Serialized length of a JSON payload; `null` counts as empty.
fn payload_len(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.len(),
        other => other.to_string().len(),
    }
}

fn measurable_content_len(tool_input: &Value) -> Option<usize> {
    let obj = tool_input.as_object()?;
    let mut total = 0usize;
    let mut found = false;
    for key in CONTENT_KEYS {
        if let Some(value) = obj.get(*key) {
            found = true;
            total += payload_len(value);
        }
    }
    found.then_some(total)
}

/// Estimate the cost of a tool invocation before it runs.
///
/// Never fails: unknown tools fall back to the `other` baseline.
pub fn estimate_cost(tool_name: &str, tool_input: &Value, model: &str) -> CostEstimate {
    let category = ToolCategory::classify(tool_name);
    let baseline = category.baseline();
    let mut confidence = category.base_confidence();

    let content_tokens = measurable_content_len(tool_input).map(tokens_for_chars);
    if content_tokens.is_some() && category.is_deterministic() {
        confidence = Confidence::High;
    }
    let content_tokens = content_tokens.unwrap_or(0);
    if content_tokens > LARGE_INPUT_TOKENS {
        confidence = confidence.lower();
    }

    let usage = TokenUsage {
        input_tokens: baseline.input_tokens + content_tokens,
        output_tokens: baseline.output_tokens,
        ..TokenUsage::default()
    };

    CostEstimate {
        tool_category: category,
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        estimated_cost_usd: ModelPricing::for_model(model).price(&usage),
        confidence,
    }
}

/// Compute the cost of a completed tool invocation.
///
/// Token counts come from the response's `usage` block when present,
/// otherwise from serialized payload lengths.
pub fn calculate_actual_cost(
    tool_name: &str,
    tool_input: &Value,
    tool_response: &Value,
    model: &str,
) -> ActualCost {
    let usage = tool_response
        .get("usage")
        .and_then(TokenUsage::from_usage_block)
        .unwrap_or_else(|| TokenUsage {
            input_tokens: tokens_for_chars(payload_len(tool_input)),
            output_tokens: tokens_for_chars(payload_len(tool_response)),
            ..TokenUsage::default()
        });

    ActualCost {
        tool_category: ToolCategory::classify(tool_name),
        model: model.to_string(),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_write_tokens: usage.cache_write_tokens,
        cache_read_tokens: usage.cache_read_tokens,
        cost_usd: ModelPricing::for_model(model).price(&usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn classifies_builtin_tools() {
        assert_eq!(ToolCategory::classify("Read"), ToolCategory::FileRead);
        assert_eq!(ToolCategory::classify("MultiEdit"), ToolCategory::FileWrite);
        assert_eq!(ToolCategory::classify("Bash"), ToolCategory::Shell);
        assert_eq!(
            ToolCategory::classify("mcp__github__create_pr"),
            ToolCategory::Mcp
        );
        assert_eq!(ToolCategory::classify("Frobnicate"), ToolCategory::Other);
    }

    #[test]
    fn unknown_tool_uses_default_baseline() {
        let estimate = estimate_cost("Frobnicate", &json!({}), "claude-sonnet-4");
        assert_eq!(estimate.input_tokens, 1_000);
        assert_eq!(estimate.output_tokens, 500);
        assert_eq!(estimate.confidence, Confidence::Low);
        // 1000 * 3/1M + 500 * 15/1M
        assert!(approx(estimate.estimated_cost_usd, 0.0105));
    }

    #[test]
    fn write_content_adds_tokens_and_confidence() {
        let content = "x".repeat(4_000);
        let estimate = estimate_cost("Write", &json!({"content": content}), "claude-sonnet-4");
        assert_eq!(estimate.input_tokens, 800 + 1_000);
        assert_eq!(estimate.confidence, Confidence::High);
    }

    #[test]
    fn huge_input_lowers_confidence() {
        let content = "x".repeat(400_000);
        let estimate = estimate_cost("Write", &json!({"content": content}), "claude-sonnet-4");
        assert_eq!(estimate.confidence, Confidence::Medium);
    }

    #[test]
    fn unknown_model_priced_as_sonnet() {
        assert_eq!(ModelPricing::for_model("mystery-model"), DEFAULT_PRICING);
        assert_eq!(ModelPricing::for_model("claude-opus-4-1"), OPUS);
    }

    #[test]
    fn actual_cost_uses_payload_lengths() {
        let input = json!("a".repeat(400));
        let response = json!("b".repeat(800));
        let cost = calculate_actual_cost("Bash", &input, &response, "claude-3-5-haiku");
        assert_eq!(cost.input_tokens, 100);
        assert_eq!(cost.output_tokens, 200);
        assert!(approx(cost.cost_usd, 100.0 * 0.8e-6 + 200.0 * 4.0e-6));
    }

    #[test]
    fn cache_tokens_use_multipliers() {
        let response = json!({
            "usage": {
                "input_tokens": 0,
                "output_tokens": 0,
                "cache_creation_input_tokens": 1_000_000,
                "cache_read_input_tokens": 1_000_000
            }
        });
        let cost = calculate_actual_cost("Task", &Value::Null, &response, "claude-sonnet-4");
        assert_eq!(cost.cache_write_tokens, 1_000_000);
        // 3.00 * 1.25 + 3.00 * 0.10
        assert!((cost.cost_usd - 4.05).abs() < 1e-9);
    }
}

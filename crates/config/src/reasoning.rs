//! Reasoning knobs shared by the normalizer and the translators.

use serde::{Deserialize, Serialize};

/// Reasoning effort requested from the upstream model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Shortest possible reasoning. Only some model families accept it.
    Minimal,
    /// Low effort.
    Low,
    /// The default effort.
    #[default]
    Medium,
    /// High effort.
    High,
    /// Extra-high effort. Only the newest families accept it.
    Xhigh,
}

impl ReasoningEffort {
    /// The wire value sent upstream.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Xhigh => "xhigh",
        }
    }

    /// Parse a wire value, e.g. from a model-name effort suffix.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "minimal" => Some(Self::Minimal),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "xhigh" => Some(Self::Xhigh),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasoning summary verbosity requested from the upstream model.
///
/// `None` is represented by omitting the field on the upstream payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    /// Let the model pick.
    #[default]
    Auto,
    /// Short summaries.
    Concise,
    /// Long summaries.
    Detailed,
    /// No summaries at all.
    None,
}

impl ReasoningSummary {
    /// The wire value sent upstream, or `None` when summaries are off.
    pub fn as_wire(&self) -> Option<&'static str> {
        match self {
            Self::Auto => Some("auto"),
            Self::Concise => Some("concise"),
            Self::Detailed => Some("detailed"),
            Self::None => None,
        }
    }
}

/// How reasoning deltas are surfaced to clients whose dialect has no
/// native reasoning channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReasoningCompat {
    /// Wrap the reasoning stream in literal `<think>…</think>` text
    /// injected into the visible content stream.
    #[default]
    ThinkTags,
    /// Emit reasoning in a separate structured `reasoning` field.
    O3,
    /// Emit reasoning into `reasoning_summary` / `reasoning` string
    /// fields on the delta.
    Legacy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effort_parses_wire_values() {
        assert_eq!(ReasoningEffort::parse("xhigh"), Some(ReasoningEffort::Xhigh));
        assert_eq!(ReasoningEffort::parse("medium"), Some(ReasoningEffort::Medium));
        assert_eq!(ReasoningEffort::parse("extreme"), None);
    }

    #[test]
    fn summary_none_has_no_wire_value() {
        assert_eq!(ReasoningSummary::None.as_wire(), None);
        assert_eq!(ReasoningSummary::Detailed.as_wire(), Some("detailed"));
    }

    #[test]
    fn compat_deserializes_kebab_case() {
        let compat: ReasoningCompat = serde_json::from_str(r#""think-tags""#).unwrap();
        assert_eq!(compat, ReasoningCompat::ThinkTags);
    }
}

//! Full embedded text: prompt, optional negative prompt, parameter block
//!
//! ```text
//! <prompt>
//! Negative prompt: <negative>
//! Steps: 20, Sampler: Euler a, Seed: 42
//! ```

use super::Params;
use std::fmt;

const STEPS_MARKER: &str = "\nSteps:";
const NEGATIVE_MARKER: &str = "\nNegative";

/// Prompt text plus parameter block, as stored in `UserComment` / `PNG:parameters`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embedded {
    pub prompt: String,
    pub negative_prompt: String,
    pub params: Params,
}

impl Embedded {
    pub fn new(prompt: impl Into<String>, negative_prompt: impl Into<String>, params: Params) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: negative_prompt.into(),
            params,
        }
    }

    /// Split text at the last `\nSteps:` and then at the last `\nNegative`
    pub fn parse(text: &str) -> Self {
        let mut text = text;
        let mut params = Params::new();
        if let Some(split) = text.rfind(STEPS_MARKER) {
            params = Params::parse(&text[split + 1..]);
            text = &text[..split];
        }

        let mut negative_prompt = String::new();
        if let Some(split) = text.rfind(NEGATIVE_MARKER) {
            let line = &text[split + 1..];
            text = &text[..split];
            negative_prompt = match line.find(':') {
                Some(colon) if colon > 0 => line[colon + 1..].trim().to_string(),
                _ => line.to_string(),
            };
        }

        Self {
            prompt: text.to_string(),
            negative_prompt,
            params,
        }
    }

    /// True when a prompt or a non-empty parameter block was found
    pub fn has_data(&self) -> bool {
        !self.prompt.is_empty() || !self.params.is_empty()
    }

    /// Serialize with an optional per-image seed stamped over `Seed`
    pub fn to_text(&self, seed_override: Option<&str>) -> String {
        compose(&self.prompt, &self.negative_prompt, &self.params, seed_override)
    }
}

/// Join prompt, negative prompt and parameter block into embedded text
pub fn compose(prompt: &str, negative_prompt: &str, params: &Params, seed_override: Option<&str>) -> String {
    let mut result = prompt.to_string();
    if !negative_prompt.is_empty() {
        result.push_str("\nNegative prompt: ");
        result.push_str(negative_prompt);
    }
    let params = params.to_param_string(seed_override);
    if !params.is_empty() {
        result.push('\n');
        result.push_str(&params);
    }
    result
}

impl fmt::Display for Embedded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Embedded {
        let mut params = Params::new();
        params.set("Steps", 20i64);
        params.set("Seed", 42i64);
        Embedded::new("cat", "dog", params)
    }

    #[test]
    fn test_serialize_sample() {
        assert_eq!(sample().to_text(None), "cat\nNegative prompt: dog\nSteps: 20, Seed: 42");
    }

    #[test]
    fn test_parse_sample_round_trip() {
        let parsed = Embedded::parse("cat\nNegative prompt: dog\nSteps: 20, Seed: 42");
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_multiline_prompt_without_negative() {
        let parsed = Embedded::parse("a castle\nBREAK\nat dusk\nSteps: fast, Seed: 5");
        assert_eq!(parsed.prompt, "a castle\nBREAK\nat dusk");
        assert_eq!(parsed.negative_prompt, "");
        assert_eq!(parsed.params.get_str("Steps"), Some("fast"));
    }

    #[test]
    fn test_prompt_only() {
        let parsed = Embedded::parse("just words");
        assert_eq!(parsed.prompt, "just words");
        assert!(parsed.params.is_empty());
        assert_eq!(parsed.to_text(None), "just words");
    }

    #[test]
    fn test_last_steps_marker_wins() {
        // A prompt containing the marker is split at the final occurrence
        let parsed = Embedded::parse("x\nSteps: in prompt\nSteps: 10, Seed: 1");
        assert_eq!(parsed.prompt, "x\nSteps: in prompt");
        assert_eq!(parsed.params.get_str("Steps"), Some("10"));
    }

    #[test]
    fn test_seed_override_in_text() {
        assert_eq!(
            sample().to_text(Some("1234")),
            "cat\nNegative prompt: dog\nSteps: 20, Seed: 1234"
        );
    }

    #[test]
    fn test_has_data() {
        assert!(!Embedded::default().has_data());
        assert!(sample().has_data());
    }
}

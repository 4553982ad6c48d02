//! Request factory (C14): model-id normalization, input-budget truncation,
//! and model-specific parameter shaping.
//!
//! Grounded in the teacher's `llm::simple_external::SimpleExternalProvider`
//! request-body construction (`openai_compatible_generate`,
//! `openai_stream`), narrowed to the spec's GPT-5/reasoning-model budget
//! rules.

use crate::chunking::{count_tokens, keep_last_tokens};

const GPT5_REASONING_TOKEN_BUDGET: usize = 7_000;
const DEFAULT_TOKEN_BUDGET: usize = 100_000;
const GPT5_MAX_OUTPUT_TOKENS: u32 = 4_000;

const TRUNCATION_NOTICE_PREFIX: &str = "[earlier content truncated to fit the model's input budget]\n\n";

fn normalize_model_id(model: &str) -> String {
    model.trim().to_ascii_lowercase()
}

fn is_gpt5_family(normalized_model: &str) -> bool {
    normalized_model.starts_with("gpt-5")
}

fn is_reasoning_model(normalized_model: &str) -> bool {
    normalized_model.starts_with('o')
}

fn token_budget(normalized_model: &str) -> usize {
    if is_gpt5_family(normalized_model) || is_reasoning_model(normalized_model) {
        GPT5_REASONING_TOKEN_BUDGET
    } else {
        DEFAULT_TOKEN_BUDGET
    }
}

/// The shaped request parameters a provider call sends over the wire,
/// per §4.12 and §6's LLM wire protocol.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub prompt: String,
    pub max_output_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub temperature: Option<f32>,
}

pub struct RequestFactory {
    default_reasoning_effort: Option<String>,
    default_max_output_tokens: u32,
}

impl RequestFactory {
    pub fn new(default_reasoning_effort: Option<String>, default_max_output_tokens: u32) -> Self {
        Self { default_reasoning_effort, default_max_output_tokens }
    }

    /// Builds a provider-shaped request: normalizes the model id, truncates
    /// the prompt to its input-character budget (keeping the last N tokens
    /// and prefixing a truncation notice when truncation occurred), and
    /// sets model-specific parameters.
    pub fn build(&self, model: &str, prompt: &str, temperature: f32) -> ModelRequest {
        let normalized_model = normalize_model_id(model);
        let budget = token_budget(&normalized_model);

        let truncated_prompt = if count_tokens(prompt) > budget {
            format!("{TRUNCATION_NOTICE_PREFIX}{}", keep_last_tokens(prompt, budget))
        } else {
            prompt.to_string()
        };

        if is_gpt5_family(&normalized_model) {
            ModelRequest {
                model: normalized_model,
                prompt: truncated_prompt,
                max_output_tokens: Some(self.default_max_output_tokens.max(GPT5_MAX_OUTPUT_TOKENS)),
                reasoning_effort: self.default_reasoning_effort.clone(),
                temperature: None,
            }
        } else {
            ModelRequest {
                model: normalized_model,
                prompt: truncated_prompt,
                max_output_tokens: None,
                reasoning_effort: None,
                temperature: temperature.is_finite().then_some(temperature),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> RequestFactory {
        RequestFactory::new(Some("medium".to_string()), 4000)
    }

    #[test]
    fn model_id_is_lowercased() {
        let req = factory().build("GPT-4O", "hi", 0.7);
        assert_eq!(req.model, "gpt-4o");
    }

    #[test]
    fn gpt5_family_omits_temperature_and_sets_output_budget() {
        let req = factory().build("gpt-5-mini", "hi", 0.7);
        assert_eq!(req.temperature, None);
        assert_eq!(req.max_output_tokens, Some(4000));
        assert_eq!(req.reasoning_effort.as_deref(), Some("medium"));
    }

    #[test]
    fn reasoning_model_prefix_o_gets_small_budget() {
        let huge_prompt: String = (0..10_000).map(|i| format!("w{i} ")).collect();
        let req = factory().build("o1-preview", &huge_prompt, 0.5);
        assert!(req.prompt.starts_with(TRUNCATION_NOTICE_PREFIX));
        assert!(count_tokens(&req.prompt) <= GPT5_REASONING_TOKEN_BUDGET + 50);
    }

    #[test]
    fn non_reasoning_model_passes_through_finite_temperature() {
        let req = factory().build("llama-3-70b", "hi", 0.9);
        assert_eq!(req.temperature, Some(0.9));
        assert_eq!(req.max_output_tokens, None);
    }

    #[test]
    fn non_finite_temperature_is_omitted() {
        let req = factory().build("llama-3-70b", "hi", f32::NAN);
        assert_eq!(req.temperature, None);
    }

    #[test]
    fn short_prompt_under_budget_is_untouched() {
        let req = factory().build("llama-3-70b", "hello world", 0.5);
        assert_eq!(req.prompt, "hello world");
    }
}

//! Provider and model metadata: context windows, capability flags, pricing.
//!
//! Model strings are qualified as `provider/model`; a bare provider name
//! resolves to that provider's recommended model. Unknown models get fallback
//! metadata so a conversation never fails just because the table is stale.

use once_cell::sync::Lazy;

use crate::llm::Usage;

/// A supported LLM backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAI,
    Azure,
    OpenRouter,
    Gemini,
    Groq,
    XAI,
    DeepSeek,
    Nvidia,
    /// Local OpenAI-compatible server (base URL from `OPENAI_BASE_URL`).
    Local,
    Anthropic,
    /// User-configured OpenAI-compatible endpoint from `[[providers]]`.
    Custom(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Azure => "azure",
            Provider::OpenRouter => "openrouter",
            Provider::Gemini => "gemini",
            Provider::Groq => "groq",
            Provider::XAI => "xai",
            Provider::DeepSeek => "deepseek",
            Provider::Nvidia => "nvidia",
            Provider::Local => "local",
            Provider::Anthropic => "anthropic",
            Provider::Custom(name) => name,
        }
    }

    /// Parses a provider name; unknown names become [`Provider::Custom`].
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "azure" => Provider::Azure,
            "openrouter" => Provider::OpenRouter,
            "gemini" => Provider::Gemini,
            "groq" => Provider::Groq,
            "xai" => Provider::XAI,
            "deepseek" => Provider::DeepSeek,
            "nvidia" => Provider::Nvidia,
            "local" => Provider::Local,
            "anthropic" => Provider::Anthropic,
            other => Provider::Custom(other.to_string()),
        }
    }

    /// True for every provider spoken through the OpenAI-compatible adapter.
    pub fn is_openai_family(&self) -> bool {
        !matches!(self, Provider::Anthropic)
    }

    /// Environment variable carrying the API key.
    pub fn api_key_env(&self) -> Option<&'static str> {
        Some(match self {
            Provider::OpenAI | Provider::Local => "OPENAI_API_KEY",
            Provider::Azure => "AZURE_OPENAI_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
            Provider::XAI => "XAI_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::Nvidia => "NVIDIA_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Custom(_) => return None,
        })
    }

    /// Default API base URL; `None` where the URL must come from config/env
    /// (Azure endpoints, local servers, custom providers).
    pub fn default_base_url(&self) -> Option<&'static str> {
        Some(match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::XAI => "https://api.x.ai/v1",
            Provider::DeepSeek => "https://api.deepseek.com",
            Provider::Nvidia => "https://integrate.api.nvidia.com/v1",
            Provider::Anthropic => "https://api.anthropic.com/v1",
            Provider::Azure | Provider::Local | Provider::Custom(_) => return None,
        })
    }

    /// Hardcoded recommended model when only a provider name is given.
    pub fn recommended_model(&self) -> &'static str {
        match self {
            Provider::OpenAI | Provider::Azure => "gpt-5",
            Provider::OpenRouter => "meta-llama/llama-3.1-405b-instruct",
            Provider::Gemini => "gemini-2.5-pro",
            Provider::Anthropic => "claude-sonnet-4-5",
            Provider::XAI => "grok-4",
            Provider::DeepSeek => "deepseek-chat",
            Provider::Groq => "llama-3.3-70b-versatile",
            Provider::Nvidia | Provider::Local | Provider::Custom(_) => "gpt-4o-mini",
        }
    }

    /// Cheaper/faster model for summaries and auto-naming; `None` means
    /// "use the conversation model".
    pub fn summary_model(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI | Provider::Azure => Some("gpt-5-mini"),
            Provider::OpenRouter => Some("meta-llama/llama-3.1-8b-instruct"),
            Provider::Gemini => Some("gemini-2.5-flash"),
            Provider::Anthropic => Some("claude-haiku-4-5"),
            Provider::DeepSeek => Some("deepseek-chat"),
            Provider::XAI => Some("grok-4-fast"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable metadata for one model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelMeta {
    pub provider: Provider,
    pub name: String,
    pub context: u64,
    pub max_output: u64,
    pub supports_streaming: bool,
    pub supports_vision: bool,
    pub supports_reasoning: bool,
    /// USD per 1M input tokens.
    pub price_input: f64,
    /// USD per 1M output tokens.
    pub price_output: f64,
}

impl ModelMeta {
    fn new(provider: Provider, name: &str, context: u64, max_output: u64) -> Self {
        Self {
            provider,
            name: name.to_string(),
            context,
            max_output,
            supports_streaming: true,
            supports_vision: false,
            supports_reasoning: false,
            price_input: 0.0,
            price_output: 0.0,
        }
    }

    fn priced(mut self, input: f64, output: f64) -> Self {
        self.price_input = input;
        self.price_output = output;
        self
    }

    fn vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }

    fn reasoning(mut self) -> Self {
        self.supports_reasoning = true;
        self
    }

    /// Qualified `provider/model` string.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.provider, self.name)
    }
}

static MODELS: Lazy<Vec<ModelMeta>> = Lazy::new(|| {
    use Provider::*;
    vec![
        // openai
        ModelMeta::new(OpenAI, "gpt-5", 272_000, 128_000)
            .priced(1.25, 10.0)
            .vision()
            .reasoning(),
        ModelMeta::new(OpenAI, "gpt-5-mini", 272_000, 128_000)
            .priced(0.25, 2.0)
            .vision()
            .reasoning(),
        ModelMeta::new(OpenAI, "gpt-4o", 128_000, 16_384)
            .priced(2.5, 10.0)
            .vision(),
        ModelMeta::new(OpenAI, "gpt-4o-mini", 128_000, 16_384)
            .priced(0.15, 0.6)
            .vision(),
        ModelMeta::new(OpenAI, "o1", 200_000, 100_000)
            .priced(15.0, 60.0)
            .reasoning(),
        ModelMeta::new(OpenAI, "o3-mini", 200_000, 100_000)
            .priced(1.1, 4.4)
            .reasoning(),
        // anthropic
        ModelMeta::new(Anthropic, "claude-opus-4-5", 200_000, 64_000)
            .priced(5.0, 25.0)
            .vision()
            .reasoning(),
        ModelMeta::new(Anthropic, "claude-sonnet-4-5", 200_000, 64_000)
            .priced(3.0, 15.0)
            .vision()
            .reasoning(),
        ModelMeta::new(Anthropic, "claude-haiku-4-5", 200_000, 64_000)
            .priced(1.0, 5.0)
            .vision()
            .reasoning(),
        ModelMeta::new(Anthropic, "claude-sonnet-4-20250514", 200_000, 64_000)
            .priced(3.0, 15.0)
            .vision()
            .reasoning(),
        ModelMeta::new(Anthropic, "claude-3-5-haiku-20241022", 200_000, 8_192)
            .priced(1.0, 5.0)
            .vision(),
        // gemini
        ModelMeta::new(Gemini, "gemini-2.5-pro", 1_048_576, 8_192)
            .priced(1.25, 10.0)
            .vision(),
        ModelMeta::new(Gemini, "gemini-2.5-flash", 1_048_576, 8_192)
            .priced(0.15, 0.6)
            .vision(),
        // deepseek
        ModelMeta::new(DeepSeek, "deepseek-chat", 128_000, 8_192).priced(0.14, 1.1),
        ModelMeta::new(DeepSeek, "deepseek-reasoner", 128_000, 8_192)
            .priced(0.55, 2.19)
            .reasoning(),
        // groq
        ModelMeta::new(Groq, "llama-3.3-70b-versatile", 128_000, 32_768).priced(0.59, 0.79),
        // xai
        ModelMeta::new(XAI, "grok-4", 256_000, 256_000)
            .priced(3.0, 15.0)
            .vision()
            .reasoning(),
        ModelMeta::new(XAI, "grok-4-fast", 2_000_000, 30_000)
            .priced(0.2, 0.5)
            .vision()
            .reasoning(),
        // openrouter
        ModelMeta::new(OpenRouter, "meta-llama/llama-3.1-405b-instruct", 128_000, 32_768)
            .priced(0.8, 0.8),
        ModelMeta::new(OpenRouter, "meta-llama/llama-3.1-8b-instruct", 128_000, 32_768)
            .priced(0.03, 0.05),
        ModelMeta::new(OpenRouter, "moonshotai/kimi-k2", 262_144, 262_144)
            .priced(0.38, 1.52)
            .vision(),
        ModelMeta::new(OpenRouter, "mistralai/magistral-medium-2506", 41_000, 40_000)
            .priced(2.0, 5.0)
            .reasoning(),
    ]
});

/// Splits a qualified model string into provider and model name.
/// A bare provider name maps to its recommended model.
pub fn split_model_string(s: &str) -> (Provider, String) {
    if let Some((prov, model)) = s.split_once('/') {
        let provider = Provider::parse(prov);
        // openrouter model names themselves contain slashes
        if matches!(provider, Provider::Custom(_)) && !is_known_provider(prov) {
            // not a provider prefix we know; treat the whole string as a custom provider's model
            return (Provider::Custom(prov.to_string()), model.to_string());
        }
        return (provider, model.to_string());
    }
    let provider = Provider::parse(s);
    if is_known_provider(s) {
        let model = provider.recommended_model().to_string();
        (provider, model)
    } else {
        // bare model name with no provider: assume local
        (Provider::Local, s.to_string())
    }
}

fn is_known_provider(s: &str) -> bool {
    matches!(
        s.to_lowercase().as_str(),
        "openai"
            | "azure"
            | "openrouter"
            | "gemini"
            | "groq"
            | "xai"
            | "deepseek"
            | "nvidia"
            | "local"
            | "anthropic"
    )
}

/// Resolves model metadata for a qualified (or bare-provider) model string.
/// Unknown models get fallback metadata with a 128k context.
pub fn get_model(qualified: &str) -> ModelMeta {
    let (provider, name) = split_model_string(qualified);
    if let Some(meta) = MODELS
        .iter()
        .find(|m| m.provider == provider && m.name == name)
    {
        return meta.clone();
    }
    tracing::debug!("unknown model {}, using fallback metadata", qualified);
    ModelMeta::new(provider, &name, 128_000, 8_192)
}

/// Picks a default model from whichever provider has an API key in the
/// environment, in preference order. `None` when no key is set.
pub fn default_model_from_env() -> Option<String> {
    use Provider::*;
    for provider in [Anthropic, OpenAI, OpenRouter, Gemini, Groq, XAI, DeepSeek] {
        let has_key = provider
            .api_key_env()
            .map(|var| std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false))
            .unwrap_or(false);
        if has_key {
            return Some(format!("{}/{}", provider, provider.recommended_model()));
        }
    }
    if std::env::var("OPENAI_BASE_URL").is_ok() {
        return Some("local".to_string());
    }
    None
}

/// Cost in USD for one request, following per-provider cache pricing:
/// Anthropic charges 1.25x input price for cache writes and 0.1x output price
/// for cache reads; OpenAI charges 0.5x output price for cache reads.
pub fn compute_cost(meta: &ModelMeta, usage: &Usage) -> f64 {
    let price_in = meta.price_input / 1e6;
    let price_out = meta.price_output / 1e6;
    let mut cost =
        usage.input_tokens as f64 * price_in + usage.output_tokens as f64 * price_out;
    match meta.provider {
        Provider::Anthropic => {
            cost += 0.1 * price_out * usage.cache_read_tokens as f64;
            cost += 1.25 * price_in * usage.cache_creation_tokens as f64;
        }
        Provider::OpenAI | Provider::Azure => {
            cost += 0.5 * price_out * usage.cache_read_tokens as f64;
        }
        _ => {}
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_string_resolves() {
        let meta = get_model("anthropic/claude-sonnet-4-5");
        assert_eq!(meta.provider, Provider::Anthropic);
        assert_eq!(meta.name, "claude-sonnet-4-5");
        assert!(meta.supports_reasoning);
        assert_eq!(meta.price_input, 3.0);
    }

    #[test]
    fn bare_provider_resolves_to_recommended() {
        let meta = get_model("anthropic");
        assert_eq!(meta.name, "claude-sonnet-4-5");
        let meta = get_model("openai");
        assert_eq!(meta.name, "gpt-5");
    }

    #[test]
    fn openrouter_models_keep_their_slash() {
        let (provider, name) = split_model_string("openrouter/moonshotai/kimi-k2");
        assert_eq!(provider, Provider::OpenRouter);
        assert_eq!(name, "moonshotai/kimi-k2");
        let meta = get_model("openrouter/moonshotai/kimi-k2");
        assert_eq!(meta.price_input, 0.38);
    }

    #[test]
    fn unknown_model_gets_fallback() {
        let meta = get_model("openai/gpt-imaginary");
        assert_eq!(meta.provider, Provider::OpenAI);
        assert_eq!(meta.context, 128_000);
        assert_eq!(meta.price_input, 0.0);
    }

    #[test]
    fn anthropic_cache_pricing() {
        let meta = get_model("anthropic/claude-sonnet-4-5");
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 0,
            cache_read_tokens: 1_000_000,
            cache_creation_tokens: 1_000_000,
            total_tokens: None,
        };
        let cost = compute_cost(&meta, &usage);
        // input 3.0 + cache read 0.1*15.0 + cache write 1.25*3.0
        assert!((cost - (3.0 + 1.5 + 3.75)).abs() < 1e-9);
    }

    #[test]
    fn openai_cache_pricing_reads_only() {
        let meta = get_model("openai/gpt-4o");
        let usage = Usage {
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 1_000_000,
            cache_creation_tokens: 1_000_000,
            total_tokens: None,
        };
        let cost = compute_cost(&meta, &usage);
        // cache read 0.5 * 10.0; writes free
        assert!((cost - 5.0).abs() < 1e-9);
    }

    #[test]
    fn full_name_is_qualified() {
        let meta = get_model("groq/llama-3.3-70b-versatile");
        assert_eq!(meta.full_name(), "groq/llama-3.3-70b-versatile");
    }
}

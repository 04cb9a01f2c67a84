use crate::model::{ModelInfo, ProviderKind};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

pub const DEFAULT_TOKEN_SIZE: u32 = 2048;

const FALLBACK_MODELS: &[&str] = &["llama3", "llama3.1", "mistral", "codellama", "phi3", "gemma2"];

/// Endpoint to use when a profile is created without one.
pub fn default_url(kind: &ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::Ollama => Some(DEFAULT_OLLAMA_URL),
        ProviderKind::OpenAi => Some(DEFAULT_OPENAI_URL),
        ProviderKind::Anthropic => Some(DEFAULT_ANTHROPIC_URL),
        ProviderKind::Custom(_) => None,
    }
}

/// Shown when model discovery is unavailable.
pub fn fallback_models() -> Vec<ModelInfo> {
    FALLBACK_MODELS.iter().map(|name| ModelInfo::named(name)).collect()
}

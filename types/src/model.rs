//! Public model names and the upstream modes they select.

/// Upstream request modes derived from the caller's model choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelModes {
    /// Ask the upstream for reasoning ("thinking") output.
    pub thinking: bool,
    /// Ask the upstream to run web search.
    pub search: bool,
}

/// Resolve a caller-facing model name to its upstream modes.
///
/// Returns `None` for names this gateway does not expose; the OpenAI-style
/// surface turns that into a model-unavailable error while the Claude-style
/// surface falls back to plain chat.
#[must_use]
pub fn resolve_model(model: &str) -> Option<ModelModes> {
    match model.to_lowercase().as_str() {
        "deepseek-v3" | "deepseek-chat" => Some(ModelModes {
            thinking: false,
            search: false,
        }),
        "deepseek-r1" | "deepseek-reasoner" => Some(ModelModes {
            thinking: true,
            search: false,
        }),
        "deepseek-v3-search" | "deepseek-chat-search" => Some(ModelModes {
            thinking: false,
            search: true,
        }),
        "deepseek-r1-search" | "deepseek-reasoner-search" => Some(ModelModes {
            thinking: true,
            search: true,
        }),
        _ => None,
    }
}

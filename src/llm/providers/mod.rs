mod gemini;
mod openrouter;

pub use gemini::GeminiProvider;
pub use openrouter::OpenRouterProvider;

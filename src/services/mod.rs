pub mod prompt;

pub use prompt::{PromptResultHandler, PromptService};

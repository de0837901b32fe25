//! Answer Module
//!
//! Prompt assembly and answer generation over retrieved context.

pub mod engine;
pub mod prompt;

pub use engine::{Answer, AnswerEngine, ChatModel, GenerationError};
pub use prompt::{ChatMessage, ChatPrompt, PromptAssembler, Role, CONFIDENCE_THRESHOLD, NOT_AVAILABLE};

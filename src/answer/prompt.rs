//! Prompt Assembly
//!
//! Renders the fixed system instruction and the context + question template
//! that carry the answering contract:
//! - answer only from the supplied context
//! - reproduce an exact answer verbatim
//! - refuse with [`NOT_AVAILABLE`] when confidence is below
//!   [`CONFIDENCE_THRESHOLD`]
//! - reply in plain text

use serde::{Deserialize, Serialize};

use crate::documents::Chunk;

/// Sentinel answer for low-confidence questions
pub const NOT_AVAILABLE: &str = "Data Not Available";

/// Confidence below which the model must answer [`NOT_AVAILABLE`]
pub const CONFIDENCE_THRESHOLD: f32 = 0.15;

/// Separator between retrieved chunks in the rendered context
const CONTEXT_SEPARATOR: &str = "\n\n";

pub const SYSTEM_TEMPLATE: &str =
    "You're a document assistant. You help the user to answer questions from a document.";

const HUMAN_TEMPLATE: &str = "I have extracted text from a document, which includes specific context and a related question. \
I require an accurate answer based on this context. Please adhere to the following guidelines:

1. Carefully read the provided context and the question.
2. Provide an answer derived solely from the given context.
3. If the context contains the exact answer, replicate it verbatim.
4. Compute a confidence score for every answer.
5. If the confidence score is below {threshold}, simply respond with \"{sentinel}\". Avoid elaborating or guessing.

Context:
{context}

Question:
{question}

Please provide the answer as plain text, focusing on precision and adherence to these instructions.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Model-ready prompt: one system turn and one user turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

impl ChatPrompt {
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage { role: Role::System, content: self.system.clone() },
            ChatMessage { role: Role::User, content: self.user.clone() },
        ]
    }
}

/// Pure renderer; makes no model calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble<'a, I>(&self, chunks: I, question: &str) -> ChatPrompt
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let context = render_context(chunks);
        let threshold = CONFIDENCE_THRESHOLD.to_string();
        let user = fill_template(
            HUMAN_TEMPLATE,
            &[
                ("threshold", threshold.as_str()),
                ("sentinel", NOT_AVAILABLE),
                ("context", context.as_str()),
                ("question", question),
            ],
        );

        ChatPrompt {
            system: SYSTEM_TEMPLATE.to_string(),
            user,
        }
    }
}

/// Substitute `{name}` placeholders in a single left-to-right pass.
///
/// Substituted values are never rescanned, so braces inside the context or
/// the question reach the model untouched. Unknown `{...}` sequences are kept.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + values.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let placeholder = values.iter().find(|(name, _)| {
            tail.starts_with(name) && tail[name.len()..].starts_with('}')
        });
        match placeholder {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Concatenate chunk texts in retrieval order
pub fn render_context<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = &'a Chunk>,
{
    chunks.into_iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::Document;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            document: Document::new("doc.txt", "").id().clone(),
            text: text.to_string(),
            start: 0,
            end: text.len(),
            token_count: 0,
        }
    }

    #[test]
    fn test_prompt_contains_context_and_question() {
        let chunks = vec![chunk(0, "The capital of France is Paris."), chunk(1, "Paris has 2 million people.")];
        let prompt = PromptAssembler::new().assemble(&chunks, "What is the capital of France?");

        assert_eq!(prompt.system, SYSTEM_TEMPLATE);
        assert!(prompt.user.contains("Context:\nThe capital of France is Paris.\n\nParis has 2 million people.\n"));
        assert!(prompt.user.contains("Question:\nWhat is the capital of France?\n"));
    }

    #[test]
    fn test_prompt_encodes_contract() {
        let prompt = PromptAssembler::new().assemble(Vec::<&Chunk>::new(), "anything");
        assert!(prompt.user.contains("solely from the given context"));
        assert!(prompt.user.contains("replicate it verbatim"));
        assert!(prompt.user.contains("below 0.15"));
        assert!(prompt.user.contains("\"Data Not Available\""));
        assert!(prompt.user.contains("plain text"));
    }

    #[test]
    fn test_no_placeholders_left() {
        let prompt = PromptAssembler::new().assemble(&[chunk(0, "text")], "question");
        for placeholder in ["{threshold}", "{sentinel}", "{context}", "{question}"] {
            assert!(!prompt.user.contains(placeholder), "{} was not rendered", placeholder);
        }
    }

    #[test]
    fn test_placeholder_text_in_context_is_kept_verbatim() {
        let text = "Template syntax: write {question} to insert the user's text, or {context} for the passage.";
        let prompt = PromptAssembler::new().assemble(&[chunk(0, text)], "Who won?");

        assert!(prompt.user.contains(text));
        assert!(prompt.user.contains("Question:\nWho won?\n"));
    }

    #[test]
    fn test_braces_in_question_are_not_expanded() {
        let prompt = PromptAssembler::new().assemble(&[chunk(0, "Paris.")], "What does {context} mean?");
        assert!(prompt.user.contains("Context:\nParis.\n"));
        assert!(prompt.user.contains("Question:\nWhat does {context} mean?\n"));
    }

    #[test]
    fn test_fill_template_single_pass() {
        let filled = fill_template("{a}-{b}-{c}-{", &[("a", "{b}"), ("b", "x")]);
        assert_eq!(filled, "{b}-x-{c}-{");
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let chunks = vec![chunk(0, "a"), chunk(1, "b")];
        let assembler = PromptAssembler::new();
        assert_eq!(assembler.assemble(&chunks, "q"), assembler.assemble(&chunks, "q"));
    }

    #[test]
    fn test_context_order_follows_retrieval_order() {
        let chunks = vec![chunk(4, "second in document"), chunk(1, "first in document")];
        assert_eq!(render_context(&chunks), "second in document\n\nfirst in document");
    }

    #[test]
    fn test_messages_roles() {
        let messages = PromptAssembler::new().assemble(Vec::<&Chunk>::new(), "q").messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(serde_json::to_value(&messages[0]).unwrap()["role"], "system");
    }
}

//! Answer composition: retrieved chunks in, generated text out.
//!
//! The prompt lists the user's question and one snippet per retrieved chunk
//! (`From '<title>':` followed by the chunk text). Each snippet is cut to
//! `max_chunk_chars`, and snippets stop being added once the context would
//! pass `max_context_chars`; the closest chunk is always kept.
//!
//! With nothing retrieved the composer answers [`NO_CONTEXT_ANSWER`]
//! without calling the model.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::GenerationConfig;
use crate::error::AnswerError;
use crate::generation::Generator;
use crate::models::RetrievedChunk;

/// Reply used when retrieval finds no context.
pub const NO_CONTEXT_ANSWER: &str = "No relevant information found.";

/// A generated answer and the chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

impl Answer {
    /// True when no context was found and the fallback text was returned.
    pub fn is_fallback(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Cut `text` to at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Build the context block from `chunks`, closest first.
pub fn build_context(
    chunks: &[RetrievedChunk],
    max_chunk_chars: usize,
    max_context_chars: usize,
) -> String {
    let mut context = String::new();
    let mut used = 0usize;

    for (i, chunk) in chunks.iter().enumerate() {
        let snippet = format!(
            "From '{}':\n{}",
            chunk.metadata.title,
            truncate_chars(&chunk.metadata.text, max_chunk_chars)
        );
        let separator = if i == 0 { 0 } else { 2 };
        let len = snippet.chars().count() + separator;

        if i > 0 && used + len > max_context_chars {
            debug!(kept = i, dropped = chunks.len() - i, "context budget reached");
            break;
        }
        if i > 0 {
            context.push_str("\n\n");
        }
        context.push_str(&snippet);
        used += len;
    }

    context
}

pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are an assistant helping users with knowledge-based queries.\n\n\
         User question:\n{}\n\n\
         Document snippets:\n{}\n\n\
         Give a helpful answer based on the information above:",
        query, context
    )
}

pub struct AnswerComposer {
    generator: Arc<dyn Generator>,
    max_chunk_chars: usize,
    max_context_chars: usize,
}

impl AnswerComposer {
    pub fn new(config: &GenerationConfig, generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            max_chunk_chars: config.max_chunk_chars,
            max_context_chars: config.max_context_chars,
        }
    }

    /// Answer `query` from `chunks`, returning the model's text verbatim.
    ///
    /// # Errors
    ///
    /// [`AnswerError::GenerationFailed`] when the model call fails. The call
    /// is not retried.
    pub async fn compose(
        &self,
        query: &str,
        chunks: Vec<RetrievedChunk>,
    ) -> Result<Answer, AnswerError> {
        if chunks.is_empty() {
            info!("no context retrieved, returning fallback answer");
            return Ok(Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                sources: chunks,
            });
        }

        let context = build_context(&chunks, self.max_chunk_chars, self.max_context_chars);
        let prompt = build_prompt(query.trim(), &context);
        debug!(
            model = self.generator.model_name(),
            prompt_chars = prompt.len(),
            "generating answer"
        );

        let text = self.generator.generate(&prompt).await?;
        Ok(Answer {
            text,
            sources: chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
        reply: Result<String, String>,
    }

    impl RecordingGenerator {
        fn replying(reply: &str) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                reply: Ok(reply.to_string()),
            }
        }
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn generate(&self, prompt: &str) -> Result<String, AnswerError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(AnswerError::GenerationFailed)
        }
    }

    fn hit(title: &str, text: &str, distance: f32) -> RetrievedChunk {
        RetrievedChunk {
            metadata: ChunkMetadata {
                document_id: title.to_lowercase(),
                title: title.to_string(),
                chunk_index: 0,
                start: 0,
                text: text.to_string(),
                content_hash: "h".into(),
                author: None,
                tags: Vec::new(),
                category: None,
            },
            distance,
        }
    }

    #[test]
    fn test_prompt_layout() {
        let context = build_context(
            &[hit("Auth", "Use tokens.", 0.1), hit("Deploy", "Run make.", 0.2)],
            3000,
            12000,
        );
        assert_eq!(context, "From 'Auth':\nUse tokens.\n\nFrom 'Deploy':\nRun make.");
        let prompt = build_prompt("How do I log in?", &context);
        assert!(prompt.starts_with(
            "You are an assistant helping users with knowledge-based queries.\n\n\
             User question:\nHow do I log in?\n\nDocument snippets:\nFrom 'Auth':"
        ));
        assert!(
            prompt.ends_with("Run make.\n\nGive a helpful answer based on the information above:")
        );
    }

    #[test]
    fn test_truncates_each_chunk_on_char_boundary() {
        let context = build_context(&[hit("T", "ééééé", 0.0)], 3, 12000);
        assert_eq!(context, "From 'T':\nééé");
    }

    #[test]
    fn test_context_budget_keeps_first() {
        let long = "x".repeat(100);
        let chunks = vec![hit("A", &long, 0.0), hit("B", &long, 0.1), hit("C", &long, 0.2)];
        let context = build_context(&chunks, 3000, 50);
        assert!(context.starts_with("From 'A':"));
        assert!(!context.contains("From 'B':"));

        let context = build_context(&chunks, 3000, 230);
        assert!(context.contains("From 'B':"));
        assert!(!context.contains("From 'C':"));
    }

    #[tokio::test]
    async fn test_fallback_skips_model() {
        let generator = Arc::new(RecordingGenerator::replying("unused"));
        let composer = AnswerComposer::new(&GenerationConfig::default(), generator.clone());
        let answer = composer.compose("anything", Vec::new()).await.unwrap();
        assert_eq!(answer.text, NO_CONTEXT_ANSWER);
        assert!(answer.is_fallback());
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_returns_model_text_verbatim() {
        let generator = Arc::new(RecordingGenerator::replying("  Use tokens.\n"));
        let composer = AnswerComposer::new(&GenerationConfig::default(), generator.clone());
        let answer = composer
            .compose("login?", vec![hit("Auth", "Use tokens.", 0.1)])
            .await
            .unwrap();
        assert_eq!(answer.text, "  Use tokens.\n");
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_surfaces() {
        let generator = Arc::new(RecordingGenerator {
            prompts: Mutex::new(Vec::new()),
            reply: Err("quota exceeded".into()),
        });
        let composer = AnswerComposer::new(&GenerationConfig::default(), generator.clone());
        let err = composer
            .compose("login?", vec![hit("Auth", "Use tokens.", 0.1)])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }
}

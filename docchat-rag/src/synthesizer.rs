//! Grounded answer synthesis.

use std::sync::Arc;

use tracing::debug;

use crate::conversation::Conversation;
use crate::document::SearchResult;
use crate::error::Result;
use crate::llm::{LanguageModel, TextStream};
use crate::retry::RetryPolicy;

/// Builds the grounded prompt and asks the language model for an answer.
///
/// The model only sees the conversation so far, the retrieved chunk texts in
/// ranked order, and the question, and is told to say it does not know when
/// the context does not contain the answer. Transient model failures are
/// retried before any text is produced.
pub struct AnswerSynthesizer {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl AnswerSynthesizer {
    /// Create a synthesizer over `llm` with the default retry policy.
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm, retry: RetryPolicy::default() }
    }

    /// Set the retry policy for model calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Assemble the prompt sent to the model.
    pub fn build_prompt(
        history: &Conversation,
        context: &[SearchResult],
        question: &str,
    ) -> String {
        let context =
            context.iter().map(|r| r.chunk.text.as_str()).collect::<Vec<_>>().join("\n\n");
        format!(
            "You are a helpful assistant.\n\
             Use the conversation history and the provided document context to answer.\n\
             Answer ONLY from the provided document context.\n\
             If the context is insufficient, just say you don't know.\n\
             \n\
             Conversation so far:\n\
             {history}\n\
             Context from documents:\n\
             {context}\n\
             \n\
             Now answer the latest question:\n\
             {question}\n",
            history = history.render(),
        )
    }

    /// Return the complete answer.
    pub async fn synthesize(
        &self,
        history: &Conversation,
        context: &[SearchResult],
        question: &str,
    ) -> Result<String> {
        let prompt = Self::build_prompt(history, context, question);
        debug!(
            model = self.llm.name(),
            context_chunks = context.len(),
            prompt_len = prompt.len(),
            "synthesizing answer"
        );
        self.retry.run("synthesize", || self.llm.complete(&prompt)).await
    }

    /// Return the answer as fragments in generation order.
    ///
    /// Only opening the stream is retried; a fragment that fails mid-stream ends it.
    pub async fn synthesize_stream(
        &self,
        history: &Conversation,
        context: &[SearchResult],
        question: &str,
    ) -> Result<TextStream> {
        let prompt = Self::build_prompt(history, context, question);
        debug!(
            model = self.llm.name(),
            context_chunks = context.len(),
            prompt_len = prompt.len(),
            "streaming answer"
        );
        self.retry.run("synthesize_stream", || self.llm.stream(&prompt)).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::conversation::ConversationTurn;
    use crate::document::Chunk;

    fn hit(index: usize, text: &str) -> SearchResult {
        SearchResult { chunk: Chunk::new(index, text, HashMap::new()), score: 1.0 }
    }

    #[test]
    fn prompt_holds_history_context_and_question_in_order() {
        let mut history = Conversation::new();
        history.push(ConversationTurn::user("Who wrote it?"));
        history.push(ConversationTurn::assistant("Ada."));

        let prompt = AnswerSynthesizer::build_prompt(
            &history,
            &[hit(1, "First chunk."), hit(0, "Second chunk.")],
            "When?",
        );

        let history_at = prompt.find("User: Who wrote it?\nAssistant: Ada.\n").unwrap();
        let context_at = prompt.find("First chunk.\n\nSecond chunk.").unwrap();
        let question_at = prompt.find("latest question:\nWhen?").unwrap();
        assert!(history_at < context_at && context_at < question_at);
        assert!(prompt.contains("say you don't know"));
    }

    #[test]
    fn empty_history_and_context_still_form_a_prompt() {
        let prompt = AnswerSynthesizer::build_prompt(&Conversation::new(), &[], "Anything?");
        assert!(prompt.contains("Conversation so far:\n\nContext from documents:\n\n"));
    }
}

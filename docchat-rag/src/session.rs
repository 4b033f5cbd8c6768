//! One user's conversation over a shared pipeline.

use std::sync::Arc;

use tracing::warn;

use crate::conversation::{Conversation, ConversationStats, ConversationTurn};
use crate::error::Result;
use crate::pipeline::{Answer, RagPipeline};

/// A chat session: a private conversation history over a shared [`RagPipeline`].
///
/// A question and its answer are recorded together, and only once the answer
/// is complete. A failed or abandoned question leaves the history untouched.
pub struct ChatSession {
    pipeline: Arc<RagPipeline>,
    conversation: Conversation,
}

impl ChatSession {
    /// Start an empty session.
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        Self { pipeline, conversation: Conversation::new() }
    }

    /// Ask a question and wait for the full answer.
    pub async fn ask(&mut self, question: &str) -> Result<Answer> {
        let answer = self.pipeline.answer(&self.conversation, question).await.inspect_err(|e| {
            warn!(error = %e, "question failed, history unchanged");
        })?;
        self.record(question, &answer.text);
        Ok(answer)
    }

    /// Ask a question, passing each response fragment to `on_fragment` as it arrives.
    ///
    /// Dropping the returned future stops consuming fragments.
    pub async fn ask_streaming<F>(&mut self, question: &str, on_fragment: F) -> Result<Answer>
    where
        F: FnMut(&str),
    {
        let result = match self.pipeline.answer_stream(&self.conversation, question).await {
            Ok(streaming) => streaming.collect_with(on_fragment).await,
            Err(e) => Err(e),
        };
        let answer = result.inspect_err(|e| {
            warn!(error = %e, "question failed, history unchanged");
        })?;
        self.record(question, &answer.text);
        Ok(answer)
    }

    /// Forget every recorded turn.
    pub fn clear(&mut self) {
        self.conversation.clear();
    }

    /// The recorded conversation.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Total and user message counts.
    pub fn stats(&self) -> ConversationStats {
        self.conversation.stats()
    }

    /// The pipeline this session asks.
    pub fn pipeline(&self) -> &Arc<RagPipeline> {
        &self.pipeline
    }

    fn record(&mut self, question: &str, answer: &str) {
        self.conversation.push(ConversationTurn::user(question));
        self.conversation.push(ConversationTurn::assistant(answer));
    }
}

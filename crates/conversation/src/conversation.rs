use std::{collections::VecDeque, sync::Arc};

use {
    palaver_common::{Event, User},
    serde_json::{Map, Value},
    tracing::{debug, info, trace},
    uuid::Uuid,
};

use crate::{
    error::{Error, Result},
    question::{Answer, Exchange, Question},
    sink::ConversationSink,
};

/// Default limit for handler-driven `advance`/`respond` nesting.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Where a conversation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Nothing asked yet, or the last dequeued question was a setup.
    Idle,
    /// A prompt was sent and its answer has not arrived.
    AwaitingInput,
    /// A handler is running.
    Processing,
    /// `end` was called; further input is ignored.
    Ended,
}

/// One user's question queue, working memory, and transcript.
pub struct Conversation {
    id: Uuid,
    source: Event,
    queue: VecDeque<Question>,
    memory: Map<String, Value>,
    responses: Vec<Exchange>,
    level: usize,
    active: Option<Question>,
    is_active: bool,
    sink: Arc<dyn ConversationSink>,
    depth: usize,
    max_depth: usize,
}

impl Conversation {
    /// Start a conversation with the user who sent `source`.
    pub fn new(source: Event, sink: Arc<dyn ConversationSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            queue: VecDeque::new(),
            memory: Map::new(),
            responses: Vec::new(),
            level: 1,
            active: None,
            is_active: true,
            sink,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> &User {
        &self.source.user
    }

    pub fn user_id(&self) -> &str {
        &self.source.user.id
    }

    /// The event that started the conversation.
    pub fn source(&self) -> &Event {
        &self.source
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Working memory accumulated through [`save`](Self::save).
    pub fn memory(&self) -> &Map<String, Value> {
        &self.memory
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.memory.get(key)
    }

    /// Question/answer transcript, oldest first.
    pub fn responses(&self) -> &[Exchange] {
        &self.responses
    }

    /// Questions waiting to be asked, in queue order.
    pub fn pending(&self) -> impl Iterator<Item = &Question> {
        self.queue.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_question(&self) -> Option<&Question> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn state(&self) -> ConversationState {
        if !self.is_active {
            ConversationState::Ended
        } else if self.depth > 0 {
            ConversationState::Processing
        } else if matches!(self.active, Some(Question::Prompt { .. })) {
            ConversationState::AwaitingInput
        } else {
            ConversationState::Idle
        }
    }

    // ── Building the queue ───────────────────────────────────────────────

    /// Queue `prompt` at the current level; `handler` runs on its answer.
    pub fn ask<F>(&mut self, prompt: impl Into<Value>, handler: F) -> &mut Self
    where
        F: Fn(Answer, &mut Conversation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let question = Question::Prompt {
            prompt: prompt.into(),
            handler: Arc::new(handler),
            level: self.level,
        };
        self.enqueue(question)
    }

    /// Queue a setup step at the current level. When `advance` reaches it the
    /// level goes up by one and `setup` runs; questions it asks belong to
    /// that deeper level.
    pub fn ask_with<F>(&mut self, setup: F) -> &mut Self
    where
        F: Fn(&mut Conversation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let question = Question::Setup {
            handler: Arc::new(setup),
            level: self.level,
        };
        self.enqueue(question)
    }

    fn enqueue(&mut self, question: Question) -> &mut Self {
        if !self.is_active {
            debug!(conversation_id = %self.id, "ask on ended conversation ignored");
            return self;
        }
        trace!(
            conversation_id = %self.id,
            level = question.level(),
            setup = question.is_setup(),
            "question queued"
        );
        self.queue.push_back(question);
        self
    }

    /// Put the active question back at the front of the queue unchanged.
    pub fn repeat(&mut self) -> &mut Self {
        self.requeue_active(None)
    }

    /// Put the active question back at the front with `amendment` as its new
    /// prompt.
    pub fn repeat_with(&mut self, amendment: impl Into<Value>) -> &mut Self {
        self.requeue_active(Some(amendment.into()))
    }

    fn requeue_active(&mut self, amendment: Option<Value>) -> &mut Self {
        let Some(active) = self.active.as_mut() else {
            return self;
        };
        if let (Some(amendment), Question::Prompt { prompt, .. }) = (amendment, &mut *active) {
            *prompt = amendment;
        }
        let question = active.clone();
        self.queue.push_front(question);
        self
    }

    // ── Memory and output ────────────────────────────────────────────────

    /// Merge `data` into working memory; keys already present are overwritten.
    /// A non-object value is stored under `"value"`.
    pub fn save(&mut self, data: Value) -> &mut Self {
        match data {
            Value::Object(map) => self.memory.extend(map),
            other => {
                self.memory.insert("value".to_string(), other);
            },
        }
        self
    }

    /// Hand `payload` to the host for delivery.
    pub fn say(&mut self, payload: impl Into<Value>) -> &mut Self {
        if self.is_active {
            self.sink.say(self, payload.into());
        } else {
            debug!(conversation_id = %self.id, "say on ended conversation ignored");
        }
        self
    }

    // ── Driving the conversation ─────────────────────────────────────────

    /// Ask the next question.
    ///
    /// Questions at the current level go first, oldest first. When none are
    /// left at this level the oldest pending question wins and its level
    /// becomes current. Prompts are sent; setup steps run immediately one
    /// level deeper. When a same-level question was picked while siblings
    /// remain, the level drops by one afterwards (never below 1) so the
    /// answer lands back at this level. An empty queue finishes the
    /// conversation.
    pub fn advance(&mut self) -> Result<()> {
        self.reentrant(Self::advance_inner)
    }

    fn advance_inner(&mut self) -> Result<()> {
        if !self.is_active {
            trace!(conversation_id = %self.id, "advance on ended conversation ignored");
            return Ok(());
        }

        let level = self.level;
        let same_level = self.queue.iter().filter(|q| q.level() == level).count();

        let (question, siblings) = match self.queue.iter().position(|q| q.level() == level) {
            Some(index) => (self.queue.remove(index), same_level - 1),
            None => {
                let question = self.queue.pop_front();
                if let Some(q) = &question {
                    self.level = q.level();
                }
                (question, 0)
            },
        };

        let Some(question) = question else {
            info!(
                conversation_id = %self.id,
                user_id = %self.source.user.id,
                answered = self.responses.len(),
                "conversation finished"
            );
            let sink = Arc::clone(&self.sink);
            sink.conversation_done(self);
            self.end();
            return Ok(());
        };

        self.active = Some(question.clone());

        match question {
            Question::Prompt { prompt, level, .. } => {
                debug!(conversation_id = %self.id, level, "asking question");
                self.say(prompt);
            },
            Question::Setup { handler, level } => {
                debug!(conversation_id = %self.id, level, "running setup question");
                self.level += 1;
                handler(self).map_err(Error::from_handler)?;
            },
        }

        if siblings > 0 && self.level > 1 {
            self.level -= 1;
        }

        Ok(())
    }

    /// Feed the user's answer to the active question's handler.
    ///
    /// Records the exchange and raises the level by one before the handler
    /// runs. The handler decides what happens next; nothing advances on its
    /// own. Ignored once the conversation ended or when no prompt is active.
    pub fn respond(&mut self, answer: Answer) -> Result<()> {
        self.reentrant(move |conv| conv.respond_inner(answer))
    }

    fn respond_inner(&mut self, answer: Answer) -> Result<()> {
        if !self.is_active {
            trace!(conversation_id = %self.id, "answer after end ignored");
            return Ok(());
        }

        let Some(Question::Prompt {
            prompt, handler, ..
        }) = self.active.as_ref()
        else {
            trace!(conversation_id = %self.id, "no prompt awaiting an answer");
            return Ok(());
        };
        let (prompt, handler) = (prompt.clone(), Arc::clone(handler));

        self.level += 1;
        self.responses.push(Exchange {
            question: prompt,
            answer: answer.clone(),
        });
        debug!(conversation_id = %self.id, level = self.level, "handling answer");

        handler(answer, self).map_err(Error::from_handler)
    }

    /// Finish the conversation. Only the first call has any effect.
    pub fn end(&mut self) {
        if !self.is_active {
            return;
        }
        self.is_active = false;
        self.active = None;
        let dropped = self.queue.len();
        self.queue.clear();

        info!(
            conversation_id = %self.id,
            user_id = %self.source.user.id,
            dropped,
            "conversation ended"
        );
        let sink = Arc::clone(&self.sink);
        sink.conversation_ended(self);
    }

    /// Run `f` one nesting level deeper, refusing past `max_depth`.
    fn reentrant<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if self.depth >= self.max_depth {
            return Err(Error::RecursionLimit {
                depth: self.max_depth,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("user", &self.source.user.id)
            .field("level", &self.level)
            .field("pending", &self.queue.len())
            .field("active", &self.active)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

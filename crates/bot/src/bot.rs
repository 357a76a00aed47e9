use std::{
    future::Future,
    sync::{
        Arc, Mutex, RwLock, TryLockError,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    palaver_common::{Event, MessageProcessor, OutboundMessage, TextProcessor},
    palaver_config::{PalaverConfig, Severity, validate},
    palaver_conversation::{Answer, Conversation},
    palaver_middleware::{
        ChainOutcome, Middleware, MiddlewareChain, Next, Terminal, from_fn, terminal_fn,
    },
    palaver_threads::{MessageSender, SchedulerSettings, ThreadScheduler},
    serde_json::Value,
    tokio::{sync::broadcast, task::JoinHandle},
    tracing::{debug, info, trace, warn},
    uuid::Uuid,
};

#[cfg(feature = "metrics")]
use palaver_metrics::{
    conversation as conversation_metrics, counter, dispatch as dispatch_metrics, gauge, labels,
};

use crate::{
    error::{Error, Result},
    events::BotEvent,
    sink::BotSink,
    stage::{EventTypeFilter, Stage},
};

/// Shared, lockable conversation as stored in the bot's registry.
pub type ConversationHandle = Arc<Mutex<Conversation>>;

/// What every middleware layer receives.
#[derive(Debug, Clone)]
pub struct BotContext {
    pub bot: Bot,
    pub event: Event,
}

impl BotContext {
    /// Queue `message` for the user who sent this event.
    pub fn reply(&self, message: impl Into<Value>) -> &Self {
        self.bot.reply(&self.event, message);
        self
    }
}

#[derive(Clone)]
pub(crate) struct ConversationEntry {
    pub(crate) id: Uuid,
    pub(crate) conversation: ConversationHandle,
    end_requested: Arc<AtomicBool>,
}

impl ConversationEntry {
    fn new(id: Uuid, conversation: ConversationHandle) -> Self {
        Self {
            id,
            conversation,
            end_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Lock the conversation for `f`, then carry out any end requested while
    /// it was held.
    fn with<R>(&self, f: impl FnOnce(&mut Conversation) -> R) -> R {
        let mut conversation = self.conversation.lock().unwrap_or_else(|e| e.into_inner());
        let out = f(&mut conversation);
        if self.end_requested.swap(false, Ordering::AcqRel) {
            conversation.end();
        }
        out
    }

    /// End the conversation without waiting on its lock. If a handler holds
    /// it, the end runs as soon as that handler's turn is over.
    fn request_end(&self) {
        self.end_requested.store(true, Ordering::Release);
        let mut conversation = match self.conversation.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!(conversation_id = %self.id, "conversation busy, end deferred");
                return;
            },
        };
        if self.end_requested.swap(false, Ordering::AcqRel) {
            conversation.end();
        }
    }
}

#[derive(Clone, Default)]
struct Chains {
    inbound: MiddlewareChain<BotContext>,
    outbound: MiddlewareChain<BotContext>,
    dispatch: MiddlewareChain<BotContext>,
}

pub(crate) struct BotInner {
    pub(crate) config: PalaverConfig,
    pub(crate) started: AtomicBool,
    pub(crate) ticker: Mutex<Option<JoinHandle<()>>>,
    chains: RwLock<Chains>,
    pub(crate) scheduler: ThreadScheduler,
    pub(crate) conversations: DashMap<String, ConversationEntry>,
    events: broadcast::Sender<BotEvent>,
    processor: Arc<dyn MessageProcessor>,
}

impl Drop for BotInner {
    fn drop(&mut self) {
        let ticker = self.ticker.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Assembles a [`Bot`] from config plus host-supplied capabilities.
#[derive(Default)]
pub struct BotBuilder {
    config: PalaverConfig,
    sender: Option<Arc<dyn MessageSender>>,
    processor: Option<Arc<dyn MessageProcessor>>,
}

impl BotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: PalaverConfig) -> Self {
        self.config = config;
        self
    }

    /// Delivery capability for outbound threads.
    #[must_use]
    pub fn sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Replace the default [`TextProcessor`] normalization.
    #[must_use]
    pub fn processor(mut self, processor: Arc<dyn MessageProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Validate the config and build the bot, starting the tick loop when
    /// `scheduler.autostart` is set.
    pub fn build(self) -> Result<Bot> {
        let report = validate(&self.config);
        for diagnostic in &report.diagnostics {
            if diagnostic.severity == Severity::Warning {
                warn!(path = diagnostic.path, "{}", diagnostic.message);
            }
        }
        if report.has_errors() {
            let message = report
                .diagnostics
                .iter()
                .filter(|d| d.severity == Severity::Error)
                .map(|d| format!("{}: {}", d.path, d.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::configuration(message));
        }

        let scheduler = ThreadScheduler::new(SchedulerSettings::from(&self.config.scheduler));
        if let Some(sender) = self.sender {
            scheduler.set_sender(sender);
        }
        let (events, _) = broadcast::channel(self.config.events.capacity);
        let autostart = self.config.scheduler.autostart;

        let bot = Bot {
            inner: Arc::new(BotInner {
                config: self.config,
                started: AtomicBool::new(false),
                ticker: Mutex::new(None),
                chains: RwLock::new(Chains::default()),
                scheduler,
                conversations: DashMap::new(),
                events,
                processor: self.processor.unwrap_or_else(|| Arc::new(TextProcessor)),
            }),
        };

        if autostart {
            bot.start()?;
        }
        Ok(bot)
    }
}

// ── Bot ─────────────────────────────────────────────────────────────────────

/// Cheap-to-clone handle to a dispatcher.
#[derive(Clone)]
pub struct Bot {
    pub(crate) inner: Arc<BotInner>,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("started", &self.is_started())
            .field("conversations", &self.inner.conversations.len())
            .field("threads", &self.inner.scheduler.thread_count())
            .finish_non_exhaustive()
    }
}

impl Bot {
    pub fn new(config: PalaverConfig) -> Result<Self> {
        BotBuilder::new().config(config).build()
    }

    pub fn builder() -> BotBuilder {
        BotBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<BotInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &PalaverConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &ThreadScheduler {
        &self.inner.scheduler
    }

    pub fn set_sender(&self, sender: Arc<dyn MessageSender>) -> &Self {
        self.inner.scheduler.set_sender(sender);
        self
    }

    /// Hand the bot to `extension` for wiring (middleware, listeners,
    /// transports) and return it.
    pub fn extend<F>(&self, extension: F) -> &Self
    where
        F: FnOnce(&Bot),
    {
        extension(self);
        self
    }

    /// Receive lifecycle notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: BotEvent) {
        trace!(?event, "lifecycle event");
        if self.inner.events.send(event).is_err() {
            trace!("no lifecycle subscribers");
        }
    }

    // ── Middleware ───────────────────────────────────────────────────────

    /// Attach `layer` to a chain. Layers on an event-type stage join the
    /// dispatch chain and only see events of that type.
    pub fn use_middleware(
        &self,
        stage: impl Into<Stage>,
        layer: Arc<dyn Middleware<BotContext>>,
    ) -> Result<&Self> {
        let stage = stage.into();
        let layer: Arc<dyn Middleware<BotContext>> = match &stage {
            Stage::Event(name) if name.is_empty() => {
                return Err(Error::configuration(
                    "middleware event type must not be empty",
                ));
            },
            Stage::Event(name) => Arc::new(EventTypeFilter::new(name.clone(), layer)),
            _ => layer,
        };

        let mut chains = self.inner.chains.write().unwrap_or_else(|e| e.into_inner());
        let chain = match &stage {
            Stage::Inbound => &mut chains.inbound,
            Stage::Outbound => &mut chains.outbound,
            Stage::Dispatch | Stage::Event(_) => &mut chains.dispatch,
        };
        chain.use_layer(layer);
        debug!(stage = %stage, layers = chain.len(), "middleware registered");
        Ok(self)
    }

    /// [`use_middleware`](Self::use_middleware) for a plain async closure.
    pub fn use_fn<F, Fut>(&self, stage: impl Into<Stage>, f: F) -> Result<&Self>
    where
        F: Fn(BotContext, Next<BotContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.use_middleware(stage, from_fn(f))
    }

    fn chains(&self) -> Chains {
        self.inner
            .chains
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run `event` through the inbound chain, then `next`. Does nothing
    /// before [`start`](Self::start).
    pub async fn inbound<F, Fut>(&self, event: Event, next: F) -> Result<ChainOutcome>
    where
        F: Fn(BotContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.pass_started("inbound", self.chains().inbound, event, terminal_fn(next))
            .await
    }

    /// Run `event` through the outbound chain, then `next`. Does nothing
    /// before [`start`](Self::start).
    pub async fn outbound<F, Fut>(&self, event: Event, next: F) -> Result<ChainOutcome>
    where
        F: Fn(BotContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.pass_started("outbound", self.chains().outbound, event, terminal_fn(next))
            .await
    }

    async fn pass_started(
        &self,
        stage: &'static str,
        chain: MiddlewareChain<BotContext>,
        event: Event,
        terminal: Terminal<BotContext>,
    ) -> Result<ChainOutcome> {
        if !self.is_started() {
            debug!(stage, user_id = %event.user.id, "bot not started, event dropped");
            #[cfg(feature = "metrics")]
            counter!(dispatch_metrics::DROPPED_NOT_STARTED_TOTAL, labels::STAGE => stage)
                .increment(1);
            return Ok(ChainOutcome::Stopped);
        }
        self.pass(stage, chain, event, terminal).await
    }

    async fn pass(
        &self,
        stage: &'static str,
        chain: MiddlewareChain<BotContext>,
        event: Event,
        terminal: Terminal<BotContext>,
    ) -> Result<ChainOutcome> {
        let ctx = BotContext {
            bot: self.clone(),
            event,
        };
        match chain.run_with(ctx, terminal).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(stage, error = %e, "middleware chain failed");
                #[cfg(feature = "metrics")]
                counter!(dispatch_metrics::CHAIN_ERRORS_TOTAL, labels::STAGE => stage)
                    .increment(1);
                Err(e.into())
            },
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    /// Tag `event` with `event_type` and run it through the dispatch chain.
    ///
    /// At the end of the chain a chat-enabled event from a user with an
    /// active conversation becomes that conversation's answer; anything
    /// else is broadcast as [`BotEvent::Dispatched`].
    pub async fn dispatch(
        &self,
        event_type: impl Into<String>,
        mut event: Event,
    ) -> Result<ChainOutcome> {
        let event_type = event_type.into();
        debug!(event_type = %event_type, user_id = %event.user.id, "dispatching event");
        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::EVENTS_TOTAL, labels::EVENT_TYPE => event_type.clone())
            .increment(1);

        event.event_type = Some(event_type);
        let terminal = terminal_fn(|ctx: BotContext| async move { ctx.bot.route(ctx.event) });
        self.pass("dispatch", self.chains().dispatch, event, terminal)
            .await
    }

    fn route(&self, event: Event) -> anyhow::Result<()> {
        let entry = if event.chat_enabled {
            self.entry(event.user_id())
        } else {
            None
        };

        let Some(entry) = entry else {
            let event_type = event.event_type.clone().unwrap_or_default();
            #[cfg(feature = "metrics")]
            counter!(dispatch_metrics::BROADCAST_TOTAL, labels::EVENT_TYPE => event_type.clone())
                .increment(1);
            self.emit(BotEvent::Dispatched { event_type, event });
            return Ok(());
        };

        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::ROUTED_TO_CONVERSATION_TOTAL).increment(1);
        trace!(user_id = %event.user.id, "routing event into conversation");

        let answer = Answer {
            message: event.message,
            event_type: event.event_type,
        };
        entry.with(|conversation| conversation.respond(answer))?;
        Ok(())
    }

    // ── Conversations ────────────────────────────────────────────────────

    /// Start a conversation with the sender of `event` and hand it to
    /// `callback` to ask its first questions.
    ///
    /// Fails with [`Error::Conflict`] if the user already has one; the
    /// existing conversation is left alone. If `callback` fails the new
    /// conversation is ended before the error is returned.
    pub fn chat<F>(&self, event: Event, callback: F) -> Result<ConversationHandle>
    where
        F: FnOnce(&mut Conversation) -> anyhow::Result<()>,
    {
        let user_id = event.user.id.clone();
        let sink = Arc::new(BotSink::new(Arc::downgrade(&self.inner)));
        let conversation = Conversation::new(event, sink)
            .with_max_depth(self.inner.config.conversation.max_depth);
        let conversation_id = conversation.id();
        let handle: ConversationHandle = Arc::new(Mutex::new(conversation));
        let entry = ConversationEntry::new(conversation_id, Arc::clone(&handle));

        match self.inner.conversations.entry(user_id.clone()) {
            Entry::Occupied(_) => {
                warn!(user_id = %user_id, "conversation already active");
                #[cfg(feature = "metrics")]
                counter!(conversation_metrics::CONFLICTS_TOTAL).increment(1);
                return Err(Error::conflict(user_id));
            },
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
            },
        }

        info!(user_id = %user_id, conversation_id = %conversation_id, "conversation started");
        #[cfg(feature = "metrics")]
        {
            counter!(conversation_metrics::STARTED_TOTAL).increment(1);
            gauge!(conversation_metrics::ACTIVE).set(self.inner.conversations.len() as f64);
        }
        self.emit(BotEvent::ConversationStarted {
            user_id,
            conversation_id,
        });

        entry
            .with(|conversation| {
                let result = callback(conversation);
                if result.is_err() {
                    conversation.end();
                }
                result
            })
            .map_err(Error::from_handler)?;
        Ok(handle)
    }

    /// The user's active conversation.
    ///
    /// Do not lock the returned handle from inside one of that
    /// conversation's own handlers; the engine already holds it. Use
    /// [`end_conversation`](Self::end_conversation) or
    /// [`remove_thread`](Self::remove_thread) there instead.
    pub fn conversation(&self, user_id: &str) -> Option<ConversationHandle> {
        self.entry(user_id).map(|entry| entry.conversation)
    }

    fn entry(&self, user_id: &str) -> Option<ConversationEntry> {
        self.inner
            .conversations
            .get(user_id)
            .map(|entry| entry.value().clone())
    }

    pub fn has_conversation(&self, user_id: &str) -> bool {
        self.inner.conversations.contains_key(user_id)
    }

    pub fn conversation_count(&self) -> usize {
        self.inner.conversations.len()
    }

    /// End the user's conversation, if any. Returns whether one was active.
    ///
    /// Never blocks: called while the conversation is busy (for instance
    /// from one of its own handlers) the end happens once the running
    /// handler returns.
    pub fn end_conversation(&self, user_id: &str) -> bool {
        let Some(entry) = self.entry(user_id) else {
            return false;
        };
        entry.request_end();
        true
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    /// Normalize `message` and queue it for the sender of `event`.
    pub fn reply(&self, event: &Event, message: impl Into<Value>) -> &Self {
        let message = self.inner.processor.process(message.into());
        self.inner
            .scheduler
            .enqueue(OutboundMessage::new(event.user.clone(), message));
        self
    }

    /// End the user's conversation and drop their queued output. Safe to
    /// call from the user's own conversation handlers.
    pub fn remove_thread(&self, user_id: &str) -> bool {
        self.end_conversation(user_id);
        self.inner.scheduler.remove(user_id)
    }
}

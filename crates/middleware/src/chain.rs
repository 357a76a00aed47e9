use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    futures::{FutureExt, future::BoxFuture},
    tracing::{debug, trace},
};

use crate::error::{Error, Result};

/// Handler invoked once every layer has proceeded.
pub type Terminal<C> = Arc<dyn Fn(C) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

// ── Middleware trait ────────────────────────────────────────────────────────

/// One layer of a [`MiddlewareChain`].
#[async_trait]
pub trait Middleware<C>: Send + Sync {
    /// A human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Handle `ctx`. Call `next.run(ctx)` to proceed; return without calling
    /// it to stop the chain here. `next` may also be moved into a task and
    /// fired later.
    async fn handle(&self, ctx: C, next: Next<C>) -> anyhow::Result<()>;
}

// ── Next ────────────────────────────────────────────────────────────────────

/// The continuation handed to each layer.
///
/// Every `Next` owns its own position in the layer list, so concurrent runs
/// of one chain never share an index. `run` consumes the continuation: a
/// layer can proceed at most once.
pub struct Next<C> {
    layers: Arc<[Arc<dyn Middleware<C>>]>,
    index: usize,
    terminal: Terminal<C>,
}

impl<C: Send + 'static> Next<C> {
    /// Proceed to the next layer, or to the terminal when none remain.
    pub async fn run(self, ctx: C) -> anyhow::Result<()> {
        let Some(layer) = self.layers.get(self.index).map(Arc::clone) else {
            return (self.terminal)(ctx).await;
        };

        let next = Next {
            layers: self.layers,
            index: self.index + 1,
            terminal: self.terminal,
        };
        layer.handle(ctx, next).await
    }

    /// Layers still ahead of this continuation (the terminal not counted).
    pub fn remaining(&self) -> usize {
        self.layers.len().saturating_sub(self.index)
    }
}

impl<C> fmt::Debug for Next<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("layers", &self.layers.len())
            .finish()
    }
}

// ── MiddlewareChain ─────────────────────────────────────────────────────────

/// How a run ended from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// The terminal handler ran before `run` returned.
    Completed,
    /// The terminal had not run when `run` returned: a layer either stopped
    /// the chain or deferred its continuation to a later task.
    Stopped,
}

/// Ordered layers plus an optional terminal handler.
///
/// Cloning is cheap (two `Arc`s); a chain holds no per-run state.
pub struct MiddlewareChain<C> {
    layers: Arc<[Arc<dyn Middleware<C>>]>,
    terminal: Option<Terminal<C>>,
}

impl<C> Clone for MiddlewareChain<C> {
    fn clone(&self) -> Self {
        Self {
            layers: Arc::clone(&self.layers),
            terminal: self.terminal.clone(),
        }
    }
}

impl<C: Send + 'static> Default for MiddlewareChain<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for MiddlewareChain<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("layers", &self.layers.len())
            .field("terminal", &self.terminal.is_some())
            .finish()
    }
}

impl<C: Send + 'static> MiddlewareChain<C> {
    pub fn new() -> Self {
        Self {
            layers: Arc::from(Vec::new()),
            terminal: None,
        }
    }

    /// Append one layer.
    pub fn use_layer(&mut self, layer: Arc<dyn Middleware<C>>) -> &mut Self {
        self.extend([layer]);
        self
    }

    /// Append every layer of `other`, flattened, keeping their order.
    /// `other`'s terminal is ignored.
    pub fn use_chain(&mut self, other: &MiddlewareChain<C>) -> &mut Self {
        self.extend(other.layers.iter().cloned());
        self
    }

    /// Set the terminal handler.
    pub fn set_terminal(&mut self, terminal: Terminal<C>) -> &mut Self {
        self.terminal = Some(terminal);
        self
    }

    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name().to_string()).collect()
    }

    /// Run `ctx` through every layer, ending in the configured terminal.
    ///
    /// Fails with [`Error::NoTerminal`] before any layer runs when no terminal
    /// is set.
    pub async fn run(&self, ctx: C) -> Result<ChainOutcome> {
        let terminal = self.terminal.clone().ok_or(Error::NoTerminal)?;
        self.run_with(ctx, terminal).await
    }

    /// Run `ctx` through every layer, ending in `terminal` instead of the
    /// configured one. Concurrent callers each bring their own terminal.
    pub async fn run_with(&self, ctx: C, terminal: Terminal<C>) -> Result<ChainOutcome> {
        let reached = Arc::new(AtomicBool::new(false));
        let tracked: Terminal<C> = {
            let reached = Arc::clone(&reached);
            Arc::new(move |ctx: C| {
                reached.store(true, Ordering::Release);
                terminal(ctx)
            })
        };

        debug!(layers = self.layers.len(), "running middleware chain");

        let next = Next {
            layers: Arc::clone(&self.layers),
            index: 0,
            terminal: tracked,
        };
        next.run(ctx).await?;

        if reached.load(Ordering::Acquire) {
            Ok(ChainOutcome::Completed)
        } else {
            trace!(layers = self.layers.len(), "middleware chain stopped before terminal");
            Ok(ChainOutcome::Stopped)
        }
    }
}

impl<C: Send + 'static> Extend<Arc<dyn Middleware<C>>> for MiddlewareChain<C> {
    fn extend<I: IntoIterator<Item = Arc<dyn Middleware<C>>>>(&mut self, iter: I) {
        let mut layers = self.layers.to_vec();
        layers.extend(iter);
        self.layers = Arc::from(layers);
    }
}

impl<C: Send + 'static> FromIterator<Arc<dyn Middleware<C>>> for MiddlewareChain<C> {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Middleware<C>>>>(iter: I) -> Self {
        let mut chain = Self::new();
        chain.extend(iter);
        chain
    }
}

// ── Closure adapters ────────────────────────────────────────────────────────

struct FnMiddleware<F> {
    f: F,
}

#[async_trait]
impl<C, F, Fut> Middleware<C> for FnMiddleware<F>
where
    C: Send + 'static,
    F: Fn(C, Next<C>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        std::any::type_name::<F>()
    }

    async fn handle(&self, ctx: C, next: Next<C>) -> anyhow::Result<()> {
        (self.f)(ctx, next).await
    }
}

/// Build a layer from an async closure.
pub fn from_fn<C, F, Fut>(f: F) -> Arc<dyn Middleware<C>>
where
    C: Send + 'static,
    F: Fn(C, Next<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnMiddleware { f })
}

/// Build a terminal handler from an async closure.
pub fn terminal_fn<C, F, Fut>(f: F) -> Terminal<C>
where
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{
            sync::{Mutex, atomic::AtomicUsize},
            time::Duration,
        },
        tokio::sync::oneshot,
    };

    type Trail = Vec<&'static str>;

    fn push(tag: &'static str) -> Arc<dyn Middleware<Trail>> {
        from_fn(move |mut trail: Trail, next: Next<Trail>| async move {
            trail.push(tag);
            next.run(trail).await
        })
    }

    fn capture() -> (Terminal<Trail>, Arc<Mutex<Vec<Trail>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let terminal = terminal_fn(move |trail: Trail| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(trail);
                anyhow::Ok(())
            }
        });
        (terminal, seen)
    }

    #[tokio::test]
    async fn runs_layers_in_registration_order() {
        let (terminal, seen) = capture();
        let mut chain = MiddlewareChain::new();
        chain
            .use_layer(push("one"))
            .use_layer(push("two"))
            .use_layer(push("three"))
            .set_terminal(terminal);

        let outcome = chain.run(vec!["start"]).await.unwrap();

        assert_eq!(outcome, ChainOutcome::Completed);
        assert_eq!(*seen.lock().unwrap(), vec![vec![
            "start", "one", "two", "three"
        ]]);
    }

    #[tokio::test]
    async fn empty_chain_goes_straight_to_terminal() {
        let (terminal, seen) = capture();
        let mut chain = MiddlewareChain::new();
        chain.set_terminal(terminal);

        chain.run(vec!["only"]).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![vec!["only"]]);
    }

    #[tokio::test]
    async fn layer_that_does_not_proceed_stops_the_chain() {
        let (terminal, seen) = capture();
        let after = Arc::new(AtomicUsize::new(0));
        let after_count = Arc::clone(&after);

        let mut chain = MiddlewareChain::new();
        chain
            .use_layer(push("one"))
            .use_layer(from_fn(|_trail: Trail, _next: Next<Trail>| async {
                anyhow::Ok(())
            }))
            .use_layer(from_fn(move |trail: Trail, next: Next<Trail>| {
                after_count.fetch_add(1, Ordering::SeqCst);
                next.run(trail)
            }))
            .set_terminal(terminal);

        let outcome = chain.run(Vec::new()).await.unwrap();

        assert_eq!(outcome, ChainOutcome::Stopped);
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_terminal_fails_before_any_layer() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let mut chain = MiddlewareChain::new();
        chain.use_layer(from_fn(move |trail: Trail, next: Next<Trail>| {
            counter.fetch_add(1, Ordering::SeqCst);
            next.run(trail)
        }));

        let err = chain.run(Vec::new()).await.unwrap_err();

        assert!(matches!(err, Error::NoTerminal));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deferred_continuation_resumes_exactly_once() {
        let (done_tx, done_rx) = oneshot::channel::<Trail>();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));
        let calls = Arc::new(AtomicUsize::new(0));

        let terminal = {
            let calls = Arc::clone(&calls);
            terminal_fn(move |trail: Trail| {
                calls.fetch_add(1, Ordering::SeqCst);
                let tx = done_tx.lock().unwrap().take();
                async move {
                    if let Some(tx) = tx {
                        let _ = tx.send(trail);
                    }
                    anyhow::Ok(())
                }
            })
        };

        let mut chain = MiddlewareChain::new();
        chain
            .use_layer(from_fn(|mut trail: Trail, next: Next<Trail>| async move {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    trail.push("deferred");
                    let _ = next.run(trail).await;
                });
                anyhow::Ok(())
            }))
            .use_layer(push("after"))
            .set_terminal(terminal);

        let outcome = chain.run(Vec::new()).await.unwrap();
        assert_eq!(outcome, ChainOutcome::Stopped);

        let trail = done_rx.await.unwrap();
        assert_eq!(trail, vec!["deferred", "after"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_runs_keep_independent_positions() {
        let (terminal, seen) = capture();
        let mut chain = MiddlewareChain::new();
        chain
            .use_layer(from_fn(|mut trail: Trail, next: Next<Trail>| async move {
                // Let the other run interleave between layers.
                tokio::task::yield_now().await;
                trail.push("a");
                next.run(trail).await
            }))
            .use_layer(push("b"))
            .set_terminal(terminal);

        let (left, right) = tokio::join!(chain.run(vec!["left"]), chain.run(vec!["right"]));
        left.unwrap();
        right.unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![vec!["left", "a", "b"], vec!["right", "a", "b"]]);
    }

    #[tokio::test]
    async fn run_with_overrides_configured_terminal() {
        let (configured, configured_seen) = capture();
        let (per_call, per_call_seen) = capture();
        let mut chain = MiddlewareChain::new();
        chain.use_layer(push("x")).set_terminal(configured);

        chain.run_with(Vec::new(), per_call).await.unwrap();

        assert!(configured_seen.lock().unwrap().is_empty());
        assert_eq!(*per_call_seen.lock().unwrap(), vec![vec!["x"]]);
    }

    #[tokio::test]
    async fn layer_errors_surface_as_handler_errors() {
        let (terminal, seen) = capture();
        let mut chain = MiddlewareChain::new();
        chain
            .use_layer(from_fn(|_trail: Trail, _next: Next<Trail>| async {
                Err::<(), _>(anyhow::anyhow!("rejected by policy"))
            }))
            .set_terminal(terminal);

        let err = chain.run(Vec::new()).await.unwrap_err();

        assert!(matches!(err, Error::Handler(_)));
        assert_eq!(err.to_string(), "rejected by policy");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn use_chain_flattens_layers() {
        let mut inner = MiddlewareChain::<Trail>::new();
        inner.use_layer(push("a")).use_layer(push("b"));

        let mut outer = MiddlewareChain::new();
        outer.use_layer(push("x")).use_chain(&inner).use_chain(&inner);

        assert_eq!(outer.len(), 5);
        assert!(!outer.has_terminal());

        let collected: MiddlewareChain<Trail> = [push("p"), push("q")].into_iter().collect();
        assert_eq!(collected.len(), 2);
    }

    #[test]
    fn next_reports_remaining_layers() {
        let chain: MiddlewareChain<Trail> = [push("a"), push("b")].into_iter().collect();
        let (terminal, _) = capture();
        let next = Next {
            layers: Arc::clone(&chain.layers),
            index: 1,
            terminal,
        };
        assert_eq!(next.remaining(), 1);
    }
}

use crate::channels::{is_slash_command, ChannelFacade, CommandHandler};
use crate::compaction::MessageCompactor;
use crate::errors::WaygateError;
use crate::heartbeat::Heartbeat;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::router::AgentRouter;
use crate::session::SessionStore;
use crate::subagent::{CompletionEvent, SubagentManager};
use crate::tools::{ExecutionContext, ToolRegistry};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tracing::warn;

const DEFAULT_SHUTDOWN_DRAIN_CAP: Duration = Duration::from_secs(30);
const RATE_LIMITED_REPLY: &str = "\u{23f1} you're sending messages too fast, please slow down and try again in a moment";

/// The pieces of coordinator state that change on hot reload, grouped so a
/// single write-lock acquisition swaps them all atomically relative to any
/// reader. Replaced wholesale rather than mutated in place.
struct HotState {
    router: Option<Arc<AgentRouter>>,
    compactor: Option<Arc<MessageCompactor>>,
    rate_limiter: Arc<RateLimiter>,
    command_handler: Arc<dyn CommandHandler>,
}

/// Minimal async waitgroup used by graceful shutdown to drain in-flight
/// requests. `tokio::sync::Semaphore` does not expose "wait until all
/// permits released with a cap", so this is a small counter plus `Notify`.
struct InFlight {
    count: std::sync::atomic::AtomicUsize,
    notify: Notify,
}

impl InFlight {
    fn new() -> Self {
        Self { count: std::sync::atomic::AtomicUsize::new(0), notify: Notify::new() }
    }

    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { inflight: self.clone() }
    }

    async fn wait_drained(&self, cap: Duration) {
        let drain = async {
            loop {
                if self.count.load(Ordering::SeqCst) == 0 {
                    return;
                }
                let notified = self.notify.notified();
                if self.count.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(cap, drain).await.is_err() {
            warn!(
                remaining = self.count.load(Ordering::SeqCst),
                "graceful shutdown drain cap reached with requests still in flight"
            );
        }
    }
}

struct InFlightGuard {
    inflight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inflight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inflight.notify.notify_waiters();
        }
    }
}

/// Everything the Coordinator needs that does not change on hot reload.
pub struct CoordinatorDeps {
    pub sessions: Arc<dyn SessionStore>,
    pub tools: Arc<ToolRegistry>,
    pub subagents: SubagentManager,
    pub heartbeat: Arc<Heartbeat>,
    pub channels: Arc<ChannelFacade>,
    pub metrics: Option<Arc<Metrics>>,
}

/// Drives the inbound message pipeline end to end, owns hot reload of the
/// Router/Compactor/RateLimiter/CommandHandler, and orchestrates graceful
/// shutdown. Built around a swappable Router/Compactor pair the config
/// layer can reconstruct on reload rather than a single hard-coded provider.
pub struct RequestCoordinator {
    hot: RwLock<HotState>,
    sessions: Arc<dyn SessionStore>,
    tools: Arc<ToolRegistry>,
    subagents: SubagentManager,
    heartbeat: Arc<Heartbeat>,
    channels: Arc<ChannelFacade>,
    metrics: Option<Arc<Metrics>>,
    shutdown: AtomicBool,
    inflight: Arc<InFlight>,
    last_message_at_millis: AtomicI64,
}

impl RequestCoordinator {
    pub fn new(
        deps: CoordinatorDeps,
        router: Option<Arc<AgentRouter>>,
        compactor: Option<Arc<MessageCompactor>>,
        rate_limiter: Arc<RateLimiter>,
        command_handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            hot: RwLock::new(HotState { router, compactor, rate_limiter, command_handler }),
            sessions: deps.sessions,
            tools: deps.tools,
            subagents: deps.subagents,
            heartbeat: deps.heartbeat,
            channels: deps.channels,
            metrics: deps.metrics,
            shutdown: AtomicBool::new(false),
            inflight: Arc::new(InFlight::new()),
            last_message_at_millis: AtomicI64::new(0),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Milliseconds since the Unix epoch of the last inbound message, or
    /// `None` if none has arrived yet. Surfaced on `GET /health`.
    pub fn last_message_at_millis(&self) -> Option<i64> {
        match self.last_message_at_millis.load(Ordering::SeqCst) {
            0 => None,
            millis => Some(millis),
        }
    }

    pub async fn active_sessions_count(&self) -> usize {
        self.sessions.active_sessions_count().await
    }

    pub async fn tool_count(&self) -> usize {
        self.tools.len().await
    }

    pub fn subagents(&self) -> &SubagentManager {
        &self.subagents
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Hot-swaps the Router, used when the agent/provider section of the
    /// config changes.
    pub async fn set_router(&self, router: Option<Arc<AgentRouter>>) {
        self.hot.write().await.router = router;
    }

    pub async fn set_compactor(&self, compactor: Option<Arc<MessageCompactor>>) {
        self.hot.write().await.compactor = compactor;
    }

    pub async fn set_rate_limiter(&self, rate_limiter: Arc<RateLimiter>) {
        self.hot.write().await.rate_limiter = rate_limiter;
    }

    pub async fn set_command_handler(&self, command_handler: Arc<dyn CommandHandler>) {
        self.hot.write().await.command_handler = command_handler;
    }

    /// Runs one message through the full pipeline, returning the reply to
    /// send back on whichever channel the message arrived on.
    ///
    /// Recorded in `DESIGN.md`: a rate-limited message is still appended to
    /// history even though admission is checked before the reply is
    /// generated. This implementation therefore appends the inbound message
    /// to the session
    /// unconditionally (steps "resolve session" happens before the
    /// rate-limiter's decision gates the reply), and only ever appends a
    /// bot reply to history on the happy path — shutdown, slash-command,
    /// rate-limit-denied, and not-configured replies are returned to the
    /// caller without a matching assistant turn in history.
    pub async fn process_message(&self, message: Message) -> Message {
        if self.is_shutting_down() {
            return Message::bot(message.channel.clone(), "the service is shutting down, please retry shortly");
        }
        let _guard = self.inflight.enter();

        self.last_message_at_millis.store(chrono::Utc::now().timestamp_millis(), Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.record_message(&message.channel);
        }

        let user_id = message.resolve_user_id();
        if self.heartbeat.is_enabled() {
            self.heartbeat.register(message.channel.clone(), user_id.clone()).await;
        }

        if is_slash_command(&message.text) {
            let handler = self.hot.read().await.command_handler.clone();
            if let Some(reply_text) = handler.handle(&message.channel, &user_id, &message.text).await {
                return Message::bot(message.channel.clone(), reply_text);
            }
        }

        let admitted = {
            let limiter = self.hot.read().await.rate_limiter.clone();
            limiter.admit(&user_id)
        };

        let session = match self.sessions.append_message(&message.channel, &user_id, message.clone()).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "failed to append inbound message to session");
                self.sessions.get_or_create(&message.channel, &user_id).await
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.set_active_sessions(self.sessions.active_sessions_count().await);
        }

        if !admitted {
            return Message::bot(message.channel.clone(), RATE_LIMITED_REPLY);
        }

        let (router, compactor) = {
            let hot = self.hot.read().await;
            (hot.router.clone(), hot.compactor.clone())
        };
        let Some(router) = router else {
            let err = WaygateError::ConfigurationMissing("no provider/router configured".to_string());
            return Message::bot(message.channel.clone(), err.user_message());
        };

        let mut history = session.messages.clone();
        if let Some(compactor) = &compactor {
            if compactor.needs_compaction(&history) {
                history = compactor.compact(&history).await;
                if let Err(e) = self.sessions.replace_history(&session.key, history.clone()).await {
                    warn!(error = %e, key = %session.key, "failed to persist compacted history");
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_compaction();
                }
            }
        }

        let ctx = ExecutionContext::new(message.channel.clone(), user_id.clone());
        let reply = self.run_router_isolated(router, history, ctx).await;

        if let (Some(input), Some(output)) = (reply.metadata.input_tokens, reply.metadata.output_tokens) {
            if let Some(metrics) = &self.metrics {
                metrics.record_tokens(input, output);
            }
        }

        if let Err(e) = self.sessions.append_message(&message.channel, &user_id, reply.clone()).await {
            warn!(error = %e, "failed to persist bot reply to session");
        }

        reply
    }

    /// Runs the Router's tool-calling loop on its own task so a panic
    /// anywhere in that loop (provider client, a buggy tool) cannot take
    /// down the caller's task, matching the isolation `ToolRegistry::execute`
    /// already applies at the single-tool level.
    async fn run_router_isolated(&self, router: Arc<AgentRouter>, history: Vec<Message>, ctx: ExecutionContext) -> Message {
        let channel = ctx.channel.clone();
        let handle = tokio::spawn(async move { router.process_with_history(&history, &ctx).await });
        match handle.await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(error = %e, "router failed to produce a reply");
                Message::bot(channel, WaygateError::ProviderFailure(e.to_string()).user_message())
            }
            Err(join_err) if join_err.is_panic() => {
                warn!("router task panicked");
                Message::bot(channel, WaygateError::PanicCaught("router".to_string()).user_message())
            }
            Err(_) => Message::bot(channel, "request was canceled"),
        }
    }

    /// Graceful shutdown: stops accepting new requests to the extent
    /// coordinator-owned surfaces can, drains in-flight work, and stops the
    /// heartbeat loop. The HTTP server and the config watcher are owned by
    /// the binary entrypoint and must be stopped by the caller before/after
    /// this returns.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.channels.stop().await;
        self.inflight.wait_drained(DEFAULT_SHUTDOWN_DRAIN_CAP).await;
        self.heartbeat.stop().await;
        if let Err(e) = self.sessions.save_all().await {
            warn!(error = %e, "failed to save all sessions during shutdown");
        }
    }

    /// Builds the callback passed to `SubagentManager::new` / reused across
    /// reloads: appends the sub-agent's result to its parent session as a
    /// bot message tagged `metadata.subagent_result = true`, then pushes a
    /// best-effort notification through the channel facade. Kept as a free
    /// function rather than a method on `RequestCoordinator` to avoid a
    /// cyclic `Arc<RequestCoordinator>` <-> `SubagentManager` ownership: the
    /// Manager only needs `SessionStore` and `ChannelFacade`, not the whole
    /// Coordinator.
    pub fn completion_callback(
        sessions: Arc<dyn SessionStore>,
        channels: Arc<ChannelFacade>,
    ) -> crate::subagent::CompletionCallback {
        Arc::new(move |event: CompletionEvent| {
            let sessions = sessions.clone();
            let channels = channels.clone();
            Box::pin(deliver_subagent_completion(sessions, channels, event))
        })
    }
}

async fn deliver_subagent_completion(
    sessions: Arc<dyn SessionStore>,
    channels: Arc<ChannelFacade>,
    event: CompletionEvent,
) {
    let Some((channel, user_id)) = crate::message::parse_session_key(&event.parent_session_key) else {
        warn!(key = %event.parent_session_key, "sub-agent completion with unparsable parent session key");
        return;
    };

    // Prefix format: `[Sub-agent "math" completed]`.
    let text = match (&event.result, &event.error) {
        (Some(result), _) => format!("[Sub-agent \"{}\" completed] {}", event.label, result),
        (None, Some(error)) => format!("[Sub-agent \"{}\" failed] {}", event.label, error),
        (None, None) => format!("[Sub-agent \"{}\" completed] (no output)", event.label),
    };

    let metadata = crate::message::Metadata::subagent(event.label.clone());
    let message = Message::bot(channel, text.clone()).with_metadata(metadata);

    if let Err(e) = sessions.append_message(channel, user_id, message).await {
        warn!(error = %e, key = %event.parent_session_key, "failed to deliver sub-agent result into parent session");
    }

    channels.push(channel, user_id, &text).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::DefaultCommandHandler;
    use crate::message::Message;
    use crate::providers::{ChatResponse, MockProvider};
    use crate::session::SessionManager;
    use crate::tools::ToolRegistry;
    use crate::subagent::{SubagentManagerConfig, SubagentRunner};

    fn no_complete() -> crate::subagent::CompletionCallback {
        Arc::new(|_event| Box::pin(async move {}))
    }

    struct EchoRunner;
    #[async_trait::async_trait]
    impl SubagentRunner for EchoRunner {
        async fn run(&self, task: &str, _system_prompt: &str, _tools: Arc<ToolRegistry>, _max_iterations: u32) -> anyhow::Result<String> {
            Ok(format!("done: {task}"))
        }
    }

    fn test_deps() -> CoordinatorDeps {
        let sessions: Arc<dyn SessionStore> = Arc::new(SessionManager::new(None));
        let tools = Arc::new(ToolRegistry::new());
        let subagents = SubagentManager::new(Arc::new(EchoRunner), tools.clone(), no_complete(), SubagentManagerConfig::default());
        CoordinatorDeps {
            sessions,
            tools,
            subagents,
            heartbeat: Arc::new(Heartbeat::new(false, Duration::from_secs(60))),
            channels: Arc::new(ChannelFacade::new()),
            metrics: None,
        }
    }

    fn coordinator_with_router(reply: &str) -> RequestCoordinator {
        let deps = test_deps();
        let provider = Arc::new(MockProvider::single_reply(reply.to_string()));
        let router = Arc::new(AgentRouter::new(provider, deps.tools.clone(), "be helpful"));
        let command_handler = Arc::new(DefaultCommandHandler::new(deps.subagents.clone()));
        RequestCoordinator::new(deps, Some(router), None, Arc::new(RateLimiter::new(0)), command_handler)
    }

    #[tokio::test]
    async fn happy_path_appends_inbound_and_one_reply() {
        let coordinator = coordinator_with_router("hi there");
        let reply = coordinator.process_message(Message::user("api", "1", "hello")).await;
        assert_eq!(reply.text, "hi there");
        assert!(reply.is_bot);

        let session = coordinator.sessions.get("api:1").await.unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].text, "hello");
        assert_eq!(session.messages[1].text, "hi there");
    }

    #[tokio::test]
    async fn shutdown_flag_short_circuits_without_touching_session() {
        let coordinator = coordinator_with_router("hi there");
        coordinator.shutdown.store(true, Ordering::SeqCst);
        let reply = coordinator.process_message(Message::user("api", "1", "hello")).await;
        assert!(reply.text.contains("shutting down"));
        assert!(coordinator.sessions.get("api:1").await.is_none());
    }

    #[tokio::test]
    async fn slash_command_bypasses_rate_limiter_and_session() {
        let deps = test_deps();
        let provider = Arc::new(MockProvider::single_reply("unused"));
        let router = Arc::new(AgentRouter::new(provider, deps.tools.clone(), "sys"));
        let command_handler = Arc::new(DefaultCommandHandler::new(deps.subagents.clone()));
        let coordinator =
            RequestCoordinator::new(deps, Some(router), None, Arc::new(RateLimiter::new(0)), command_handler);

        let reply = coordinator.process_message(Message::user("api", "1", "/help")).await;
        assert!(reply.text.contains("/help"));
        assert!(coordinator.sessions.get("api:1").await.is_none());
    }

    #[tokio::test]
    async fn rate_limited_message_is_recorded_but_reply_is_not() {
        let deps = test_deps();
        let provider = Arc::new(MockProvider::new(vec![
            ChatResponse { text: "reply one".into(), tool_calls: vec![], input_tokens: 1, output_tokens: 1 },
            ChatResponse { text: "reply two".into(), tool_calls: vec![], input_tokens: 1, output_tokens: 1 },
        ]));
        let router = Arc::new(AgentRouter::new(provider, deps.tools.clone(), "sys"));
        let command_handler = Arc::new(DefaultCommandHandler::new(deps.subagents.clone()));
        let sessions = deps.sessions.clone();
        let coordinator =
            RequestCoordinator::new(deps, Some(router), None, Arc::new(RateLimiter::new(2)), command_handler);

        let r1 = coordinator.process_message(Message::user("api", "1", "one")).await;
        let r2 = coordinator.process_message(Message::user("api", "1", "two")).await;
        let r3 = coordinator.process_message(Message::user("api", "1", "three")).await;

        assert_eq!(r1.text, "reply one");
        assert_eq!(r2.text, "reply two");
        assert!(r3.text.starts_with('\u{23f1}'));

        let session = sessions.get("api:1").await.unwrap();
        let inbound = session.messages.iter().filter(|m| !m.is_bot).count();
        let outbound = session.messages.iter().filter(|m| m.is_bot).count();
        assert_eq!(inbound, 3);
        assert_eq!(outbound, 2);
    }

    #[tokio::test]
    async fn router_not_configured_returns_friendly_reply() {
        let deps = test_deps();
        let command_handler = Arc::new(DefaultCommandHandler::new(deps.subagents.clone()));
        let coordinator = RequestCoordinator::new(deps, None, None, Arc::new(RateLimiter::new(0)), command_handler);
        let reply = coordinator.process_message(Message::user("api", "1", "hello")).await;
        assert!(reply.text.contains("not configured"));
    }

    #[tokio::test]
    async fn hot_swap_router_takes_effect_on_next_message() {
        let coordinator = coordinator_with_router("first");
        let r1 = coordinator.process_message(Message::user("api", "1", "a")).await;
        assert_eq!(r1.text, "first");

        let new_provider = Arc::new(MockProvider::single_reply("second"));
        let new_router = Arc::new(AgentRouter::new(new_provider, coordinator.tools.clone(), "sys"));
        coordinator.set_router(Some(new_router)).await;

        let r2 = coordinator.process_message(Message::user("api", "1", "b")).await;
        assert_eq!(r2.text, "second");
    }

    #[tokio::test]
    async fn shutdown_drains_inflight_and_saves_sessions() {
        let coordinator = coordinator_with_router("ok");
        coordinator.process_message(Message::user("api", "1", "hi")).await;
        coordinator.shutdown().await;
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn subagent_completion_appends_to_parent_session_and_notifies() {
        let sessions: Arc<dyn SessionStore> = Arc::new(SessionManager::new(None));
        let channels = Arc::new(ChannelFacade::new());
        let event = CompletionEvent {
            id: "abc123".into(),
            label: "research task".into(),
            result: Some("the answer is 42".into()),
            error: None,
            parent_session_key: "api:1".into(),
            duration: Duration::from_secs(1),
        };
        deliver_subagent_completion(sessions.clone(), channels, event).await;

        let session = sessions.get("api:1").await.unwrap();
        assert_eq!(session.messages.len(), 1);
        assert!(session.messages[0].text.starts_with("[Sub-agent \"research task\" completed]"));
        assert!(session.messages[0].text.contains("the answer is 42"));
        assert_eq!(session.messages[0].metadata.subagent_result, Some(true));
        assert_eq!(session.messages[0].metadata.subagent_label.as_deref(), Some("research task"));
    }
}

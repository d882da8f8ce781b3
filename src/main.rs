//! Binary entry point, runnable as `waygate serve`. Builds every
//! collaborator, starts the HTTP listener, and races it against a SIGINT
//! shutdown signal.
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{reload, EnvFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use waygate::channels::{ChannelFacade, DefaultCommandHandler};
use waygate::compaction::MessageCompactor;
use waygate::config::loader::{load_from_path, validate};
use waygate::config::schema::ConfigSnapshot;
use waygate::config::watcher::ConfigWatcher;
use waygate::coordinator::{CoordinatorDeps, RequestCoordinator};
use waygate::errors::WaygateError;
use waygate::gateway::{self, GatewayState};
use waygate::heartbeat::Heartbeat;
use waygate::message::Message;
use waygate::metrics::Metrics;
use waygate::providers::{AnthropicProvider, LLMProvider};
use waygate::ratelimit::RateLimiter;
use waygate::router::{AgentRouter, RouterSubagentRunner};
use waygate::session::SessionManager;
use waygate::skills::SkillsLoader;
use waygate::subagent::{SubagentManager, SubagentManagerConfig};
use waygate::tools::registry::ToolRegistry;
use waygate::tools::filesystem::{ListFilesTool, ReadFileTool, WriteFileTool};
use waygate::tools::shell::ExecTool;
use waygate::tools::skill_tool::ReadSkillTool;
use waygate::tools::subagent_tools::{AgentStatusTool, CancelAgentTool, SpawnAgentTool};
use waygate::tools::web::WebSearchTool;

const DEFAULT_SYSTEM_PROMPT: &str = "You are Waygate, a helpful multi-channel assistant. Use the available tools when they help answer the user's request.";
const HEARTBEAT_PROMPT: &str = "This is a scheduled self-check-in. Review anything pending for this conversation and follow up if needed; otherwise reply briefly that there's nothing to report.";

#[derive(Parser)]
#[command(name = "waygate", version = waygate::VERSION, about = "Multi-channel LLM gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the gateway: HTTP API, config watcher, heartbeat, sub-agents.
    Serve {
        #[arg(long, default_value = "waygate.toml")]
        config: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Loads and validates a config file, printing any errors/warnings, without starting the gateway.
    CheckConfig {
        #[arg(long, default_value = "waygate.toml")]
        config: PathBuf,
    },
}

/// Handle to the hot-reloadable `tracing` filter, updated from
/// `apply_hot_reload` whenever `log.level` changes on disk.
type LogReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let initial_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, reload_handle) = reload::Layer::new(initial_filter);
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, host, port } => serve(config, host, port, reload_handle).await,
        Commands::CheckConfig { config } => check_config(config).await,
    }
}

async fn check_config(path: PathBuf) -> anyhow::Result<()> {
    let config = load_from_path(&path)
        .await
        .map_err(|e| anyhow::anyhow!(WaygateError::Fatal(e)))?;
    let report = validate(&config);
    for warning in &report.warnings {
        warn!(%warning, "config warning");
    }
    for err in &report.errors {
        error!(error = %err, "config error");
    }
    if !report.is_valid() {
        anyhow::bail!(WaygateError::Fatal("config failed validation".to_string()));
    }
    info!("config is valid");
    Ok(())
}

/// Builds every collaborator and races the HTTP listener against SIGINT.
/// Fatal startup errors cause `main` to return `Err` and exit non-zero.
async fn serve(config_path: PathBuf, host: String, port: u16, log_reload: LogReloadHandle) -> anyhow::Result<()> {
    let config = load_from_path(&config_path)
        .await
        .map_err(|e| anyhow::anyhow!(WaygateError::Fatal(format!("startup config load: {e}"))))?;
    let report = validate(&config);
    for warning in &report.warnings {
        warn!(%warning, "config warning");
    }
    if !report.is_valid() {
        for err in &report.errors {
            error!(error = %err, "config error");
        }
        anyhow::bail!(WaygateError::Fatal("startup config failed validation".to_string()));
    }

    let metrics = if config.metrics.enabled {
        match Metrics::install() {
            Ok(metrics) => Some(Arc::new(metrics)),
            Err(e) => {
                warn!(error = %e, "failed to install metrics recorder, continuing without metrics");
                None
            }
        }
    } else {
        None
    };

    let workspace_root = resolve_workspace_root(&config);
    let tools = Arc::new(build_tool_registry(&config, &workspace_root, metrics.clone()).await);

    let persister = Arc::new(
        waygate::persistence::SqlitePersister::open(&workspace_root.join("waygate.sqlite3"))
            .context("failed to open sqlite persistence store")?,
    );
    let sessions: Arc<dyn waygate::session::SessionStore> =
        Arc::new(SessionManager::new(Some(persister.clone())));
    let channels = Arc::new(ChannelFacade::new());

    let provider = build_provider(&config);
    let subagent_runner: Arc<dyn waygate::subagent::SubagentRunner> = match &provider {
        Some(provider) => Arc::new(RouterSubagentRunner::new(provider.clone())),
        None => Arc::new(NoProviderRunner),
    };
    let completion_callback = RequestCoordinator::completion_callback(sessions.clone(), channels.clone());
    let subagents = SubagentManager::new(subagent_runner, tools.clone(), completion_callback, SubagentManagerConfig::default());
    subagents
        .set_persister(persister.clone())
        .await
        .context("failed to load persisted sub-agents")?;
    tools.register(Arc::new(SpawnAgentTool { manager: subagents.clone() })).await;
    tools.register(Arc::new(AgentStatusTool { manager: subagents.clone() })).await;
    tools.register(Arc::new(CancelAgentTool { manager: subagents.clone() })).await;

    let heartbeat = Arc::new(Heartbeat::new(
        config.heartbeat.enabled,
        Duration::from_secs(config.heartbeat.interval_seconds.unwrap_or(300)),
    ));

    let router = provider.as_ref().map(|provider| {
        let mut router = AgentRouter::new(provider.clone(), tools.clone(), DEFAULT_SYSTEM_PROMPT.to_string());
        if let Some(max_iterations) = config.agent.max_iterations {
            router = router.with_max_iterations(max_iterations);
        }
        Arc::new(router)
    });
    let compactor = provider.as_ref().and_then(|provider| {
        let max_context_tokens = config.agent.max_context_tokens?;
        Some(Arc::new(MessageCompactor::new(
            provider.clone(),
            max_context_tokens,
            config.agent.keep_last_n.unwrap_or(10),
        )))
    });
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute.unwrap_or(0)));
    let command_handler: Arc<dyn waygate::channels::CommandHandler> =
        Arc::new(DefaultCommandHandler::new(subagents.clone()));

    let deps = CoordinatorDeps {
        sessions: sessions.clone(),
        tools: tools.clone(),
        subagents,
        heartbeat: heartbeat.clone(),
        channels: channels.clone(),
        metrics: metrics.clone(),
    };
    let coordinator = Arc::new(RequestCoordinator::new(deps, router, compactor, rate_limiter, command_handler));

    let config = Arc::new(tokio::sync::RwLock::new(config));
    let state = GatewayState { coordinator: coordinator.clone(), config: config.clone(), metrics, started_at: std::time::Instant::now() };

    let http_task = gateway::start(&host, port, state.clone())
        .await
        .map_err(|e| anyhow::anyhow!(WaygateError::Fatal(format!("failed to bind gateway listener: {e}"))))?;

    let watcher_coordinator = coordinator.clone();
    let watcher_config = config.clone();
    let watcher_provider = provider.clone();
    let watcher_tools = tools.clone();
    let watcher_log_reload = log_reload.clone();
    let on_reload: waygate::config::watcher::ReloadCallback = Arc::new(move |new_config| {
        let coordinator = watcher_coordinator.clone();
        let config = watcher_config.clone();
        let provider = watcher_provider.clone();
        let tools = watcher_tools.clone();
        let log_reload = watcher_log_reload.clone();
        Box::pin(async move {
            apply_hot_reload(&coordinator, &config, &provider, &tools, &log_reload, new_config).await;
        })
    });
    let watcher_handle = ConfigWatcher::new(config_path).start(on_reload);

    let heartbeat_coordinator = coordinator.clone();
    let heartbeat_channels = channels.clone();
    heartbeat
        .start(Arc::new(move |channel: String, user_id: String| {
            let coordinator = heartbeat_coordinator.clone();
            let channels = heartbeat_channels.clone();
            Box::pin(async move {
                let prompt = Message::user(channel.clone(), user_id.clone(), HEARTBEAT_PROMPT);
                let reply = coordinator.process_message(prompt).await;
                channels.push(&channel, &user_id, &reply.text).await;
            })
        }))
        .await;

    info!(host, port, "waygate gateway started");

    tokio::signal::ctrl_c().await.context("failed to install ctrl-c handler")?;
    info!("shutdown requested, draining in-flight requests");
    watcher_handle.abort();
    coordinator.shutdown().await;
    http_task.abort();
    Ok(())
}

async fn apply_hot_reload(
    coordinator: &Arc<RequestCoordinator>,
    config: &Arc<tokio::sync::RwLock<ConfigSnapshot>>,
    provider: &Option<Arc<dyn LLMProvider>>,
    tools: &Arc<ToolRegistry>,
    log_reload: &LogReloadHandle,
    new_config: ConfigSnapshot,
) {
    if let Err(e) = log_reload.reload(EnvFilter::new(&new_config.log.level)) {
        warn!(error = %e, "failed to apply reloaded log level");
    }

    let rate_limiter = Arc::new(RateLimiter::new(new_config.rate_limit_per_minute.unwrap_or(0)));
    coordinator.set_rate_limiter(rate_limiter).await;

    // `exec`'s allow-list is not part of the Coordinator's hot-swappable
    // state; re-registering under the same name is how its registry entry
    // changes in place (`ToolRegistry::register` is last-writer-wins): an
    // in-flight call observes either the old or the new `ExecTool`, never a
    // torn one.
    if new_config.tools.exec.enabled {
        let timeout = Duration::from_secs(new_config.tools.exec.timeout_seconds.unwrap_or(30));
        tools
            .register(Arc::new(ExecTool::new(timeout, new_config.tools.exec.allowed_commands.clone())))
            .await;
    }

    if let Some(provider) = provider {
        let mut router = AgentRouter::new(provider.clone(), tools.clone(), DEFAULT_SYSTEM_PROMPT.to_string());
        if let Some(max_iterations) = new_config.agent.max_iterations {
            router = router.with_max_iterations(max_iterations);
        }
        coordinator.set_router(Some(Arc::new(router))).await;

        if let Some(max_context_tokens) = new_config.agent.max_context_tokens {
            let compactor = MessageCompactor::new(provider.clone(), max_context_tokens, new_config.agent.keep_last_n.unwrap_or(10));
            coordinator.set_compactor(Some(Arc::new(compactor))).await;
        }
    }

    *config.write().await = new_config;
    info!("config reloaded");
}

fn resolve_workspace_root(config: &ConfigSnapshot) -> PathBuf {
    let root = if !config.tools.file.workspace.is_empty() {
        config.tools.file.workspace.clone()
    } else if !config.workspace.root.is_empty() {
        config.workspace.root.clone()
    } else {
        "./workspace".to_string()
    };
    PathBuf::from(root)
}

async fn build_tool_registry(
    config: &ConfigSnapshot,
    workspace_root: &std::path::Path,
    metrics: Option<Arc<Metrics>>,
) -> ToolRegistry {
    let registry = match metrics {
        Some(metrics) => ToolRegistry::with_metrics(metrics),
        None => ToolRegistry::new(),
    };
    if config.tools.exec.enabled {
        let timeout = Duration::from_secs(config.tools.exec.timeout_seconds.unwrap_or(30));
        registry.register(Arc::new(ExecTool::new(timeout, config.tools.exec.allowed_commands.clone()))).await;
    }
    if config.tools.file.enabled {
        registry.register(Arc::new(ReadFileTool { workspace: workspace_root.to_path_buf() })).await;
        registry.register(Arc::new(WriteFileTool { workspace: workspace_root.to_path_buf() })).await;
        registry.register(Arc::new(ListFilesTool { workspace: workspace_root.to_path_buf() })).await;
    }
    registry.register(Arc::new(WebSearchTool::new())).await;
    let skills = Arc::new(SkillsLoader::new(workspace_root));
    registry.register(Arc::new(ReadSkillTool { loader: skills })).await;
    registry
}

/// Constructs the one concrete `LLMProvider` this crate ships
/// (`AnthropicProvider`), or `None` if `agent.provider` isn't configured or
/// its API key env var isn't set — the gateway then runs with no Router,
/// serving `/health` as degraded and replying "not configured" to inbound
/// messages, exactly as it does in tests where no
/// provider is wired at all. See `DESIGN.md` for why only Anthropic is
/// implemented.
fn build_provider(config: &ConfigSnapshot) -> Option<Arc<dyn LLMProvider>> {
    if config.agent.provider.is_empty() {
        return None;
    }
    if config.agent.provider != "anthropic" {
        warn!(provider = %config.agent.provider, "unsupported agent.provider, no concrete client for it; router disabled");
        return None;
    }
    let key_env = if config.agent.api_key_env.is_empty() { "ANTHROPIC_API_KEY" } else { config.agent.api_key_env.as_str() };
    match std::env::var(key_env) {
        Ok(api_key) => Some(Arc::new(AnthropicProvider::new(api_key, config.agent.model.clone())) as Arc<dyn LLMProvider>),
        Err(_) => {
            warn!(env = key_env, "agent.provider configured but its API key env var is unset; router disabled");
            None
        }
    }
}

/// Stand-in `SubagentRunner` for when no provider is configured: spawning a
/// sub-agent with no Router is a configuration error, reported the same way
/// `AgentRouter` failures are.
struct NoProviderRunner;

#[async_trait::async_trait]
impl waygate::subagent::SubagentRunner for NoProviderRunner {
    async fn run(
        &self,
        _task: &str,
        _system_prompt: &str,
        _tools: Arc<ToolRegistry>,
        _max_iterations: u32,
    ) -> anyhow::Result<String> {
        anyhow::bail!(WaygateError::ConfigurationMissing("no LLM provider is configured".to_string()))
    }
}

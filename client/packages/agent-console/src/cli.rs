use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use agent_console_error::ConsoleError;
use agent_console_settings::{
    AgentRole, AgentSettings, ConfigInfo, McpAgentConfig, ModelProvider, SettingsDraft,
    SettingsError,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::backend::SettingsBackend;
use crate::broker::AcquireMode;
use crate::connection::Connector;
use crate::context::ConsoleContext;
use crate::endpoint::StreamEndpoint;
use crate::events::{RunCommand, StreamEventKind};
use crate::http::HttpBackend;
use crate::location::PageLocation;
use crate::manager::{SessionManager, TeardownReason};
use crate::notify::{Notifier, TracingNotifier};
use crate::preferences::{FilePreferences, PreferenceStore, LOCATION_KEY};
use crate::run_status::RunStatus;
use crate::session::{Session, SessionId};
use crate::view::ChatView;
use crate::ws::WsConnector;

const DEFAULT_SERVER_URL: &str = "http://localhost:8081/api";
const DEFAULT_PAGE_URL: &str = "http://localhost:8081/";
const SERVER_URL_ENV: &str = "AGENT_CONSOLE_SERVER_URL";

#[derive(Parser, Debug)]
#[command(name = "agent-console", bin_name = "agent-console", version)]
#[command(about = "Manage agent sessions, run streams and agent settings")]
#[command(arg_required_else_help = true)]
pub struct AgentConsoleCli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Backend API base URL. Falls back to AGENT_CONSOLE_SERVER_URL.
    #[arg(long, short = 's', global = true)]
    server_url: Option<String>,

    /// Address the console is served from; decides ws vs wss and the host for relative server URLs.
    #[arg(long, global = true)]
    page_url: Option<String>,

    #[arg(long, short = 't', global = true)]
    token: Option<String>,

    /// Overrides the stored user identity.
    #[arg(long, short = 'u', global = true)]
    user: Option<String>,

    #[arg(long, global = true)]
    preferences: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List, select and edit sessions.
    Sessions(SessionsArgs),
    /// Stream a run for a session until it finishes or Ctrl-C.
    Watch(WatchArgs),
    /// Show and edit agent model settings.
    Settings(SettingsArgs),
    #[command(name = "mcp-agents")]
    /// Manage MCP agents.
    McpAgents(McpAgentsArgs),
    /// Navigation panel preference.
    Nav(NavArgs),
}

#[derive(Args, Debug)]
pub struct SessionsArgs {
    #[command(subcommand)]
    command: SessionsCommand,
}

#[derive(Subcommand, Debug)]
pub enum SessionsCommand {
    List,
    Current,
    Create {
        #[arg(long, short = 'n')]
        name: Option<String>,
    },
    Select {
        id: SessionId,
    },
    /// Rename unconditionally.
    Rename {
        id: SessionId,
        #[arg(long, short = 'n')]
        name: String,
    },
    /// Rename only while the session still has its default name.
    Save {
        id: SessionId,
        #[arg(long, short = 'n')]
        name: String,
    },
    Delete {
        id: SessionId,
    },
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[arg(long)]
    session: Option<SessionId>,
    #[arg(long, short = 'r')]
    run: String,
    /// Replace any existing connection for the session.
    #[arg(long, short = 'f')]
    fresh: bool,
    /// Start the run with this task.
    #[arg(long)]
    task: Option<String>,
}

#[derive(Args, Debug)]
pub struct SettingsArgs {
    #[command(subcommand)]
    command: SettingsCommand,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    #[command(name = "config-info")]
    ConfigInfo,
    /// Print the JSON schema of the settings document.
    Schema,
    Advanced {
        #[arg(value_enum)]
        state: Toggle,
    },
    #[command(name = "set-model")]
    /// Set one agent's model, or every agent's when no role is given.
    SetModel(SetModelArgs),
}

#[derive(Args, Debug)]
pub struct SetModelArgs {
    #[arg(long, short = 'r')]
    role: Option<String>,
    #[arg(long, short = 'p')]
    provider: String,
    #[arg(long)]
    preset: Option<String>,
    #[arg(long, short = 'm')]
    model: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Args, Debug)]
pub struct McpAgentsArgs {
    #[command(subcommand)]
    command: McpAgentsCommand,
}

#[derive(Subcommand, Debug)]
pub enum McpAgentsCommand {
    List,
    /// Add an agent from a JSON file, or replace the one at --index.
    Add {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        index: Option<usize>,
    },
    Remove {
        index: usize,
    },
}

#[derive(Args, Debug)]
pub struct NavArgs {
    #[command(subcommand)]
    command: NavCommand,
}

#[derive(Subcommand, Debug)]
pub enum NavCommand {
    Toggle,
    Show,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Console(#[from] ConsoleError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn run_agent_console() -> Result<(), CliError> {
    let cli = AgentConsoleCli::parse();
    init_logging();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run_command(&cli.command, &cli.global));
    if let Err(CliError::Console(err)) = &result {
        let problem = serde_json::to_string_pretty(&err.to_problem_details())?;
        write_stderr_line(&problem)?;
    }
    result
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .init();
}

pub async fn run_command(command: &Command, global: &GlobalArgs) -> Result<(), CliError> {
    let mut env = ConsoleEnv::new(global)?;
    match command {
        Command::Sessions(args) => run_sessions(&mut env, &args.command).await,
        Command::Watch(args) => run_watch(&mut env, args).await,
        Command::Settings(args) => run_settings(&env, &args.command).await,
        Command::McpAgents(args) => run_mcp_agents(&env, &args.command).await,
        Command::Nav(args) => run_nav(&mut env, &args.command),
    }
}

/// Everything a command needs: backend client, preferences, identity and
/// the page location restored from the last run.
struct ConsoleEnv {
    server_url: String,
    backend: HttpBackend,
    preferences: FilePreferences,
    user_id: String,
    location: PageLocation,
    notifier: Arc<dyn Notifier>,
}

impl ConsoleEnv {
    fn new(global: &GlobalArgs) -> Result<Self, CliError> {
        let server_url = global
            .server_url
            .clone()
            .or_else(|| std::env::var(SERVER_URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let backend = HttpBackend::new(&server_url, global.token.clone())?;

        let path = match &global.preferences {
            Some(path) => path.clone(),
            None => FilePreferences::default_path().ok_or_else(|| {
                ConsoleError::storage("no configuration directory; pass --preferences")
            })?,
        };
        let mut preferences = FilePreferences::load(path)?;
        let user_id = match &global.user {
            Some(user) => user.clone(),
            None => preferences.user_email()?,
        };
        let page_url = global
            .page_url
            .clone()
            .or_else(|| preferences.location())
            .unwrap_or_else(|| DEFAULT_PAGE_URL.to_string());
        let location = PageLocation::parse(&page_url)?;

        Ok(Self {
            server_url,
            backend,
            preferences,
            user_id,
            location,
            notifier: Arc::new(TracingNotifier),
        })
    }

    fn manager<K: Connector>(&self, connector: K) -> SessionManager<HttpBackend, K> {
        let endpoint = StreamEndpoint::new(self.server_url.clone(), self.location.current().clone());
        SessionManager::new(
            self.backend.clone(),
            ConsoleContext::new(connector, endpoint),
            self.notifier.clone(),
            self.user_id.clone(),
            self.location.clone(),
        )
    }

    fn remember_location(&mut self, location: &PageLocation) -> Result<(), CliError> {
        self.location = location.clone();
        self.preferences
            .set(LOCATION_KEY, Value::from(location.current().as_str()))?;
        Ok(())
    }
}

#[derive(Serialize)]
struct SessionRow<'a> {
    #[serde(flatten)]
    session: &'a Session,
    current: bool,
}

async fn run_sessions(env: &mut ConsoleEnv, command: &SessionsCommand) -> Result<(), CliError> {
    let (connector, _events) = WsConnector::channel();
    let mut manager = env.manager(connector);
    manager.start().await?;

    match command {
        SessionsCommand::List => {
            let current = manager.directory().current_id();
            let rows: Vec<_> = manager
                .directory()
                .sessions()
                .iter()
                .map(|session| SessionRow {
                    session,
                    current: session.id.is_some() && session.id == current,
                })
                .collect();
            print_json(&rows)?;
        }
        SessionsCommand::Current => {
            print_json(&manager.directory().current())?;
        }
        SessionsCommand::Create { name } => {
            let created = manager.create().await?.clone();
            let session = match name {
                Some(name) => manager
                    .save(Session {
                        name: name.clone(),
                        ..created
                    })
                    .await?
                    .clone(),
                None => created,
            };
            print_json(&session)?;
        }
        SessionsCommand::Select { id } => {
            manager.select(*id).await?;
            print_json(&manager.directory().current())?;
        }
        SessionsCommand::Rename { id, name } => {
            let existing = manager
                .directory()
                .find(*id)
                .cloned()
                .ok_or(ConsoleError::SessionNotFound { session_id: id.0 })?;
            let updated = manager
                .save(Session {
                    name: name.clone(),
                    ..existing
                })
                .await?
                .clone();
            print_json(&updated)?;
        }
        SessionsCommand::Save { id, name } => {
            let renamed = manager.rename_if_default(*id, name).await?;
            print_json(&json!({ "session_id": id, "renamed": renamed }))?;
        }
        SessionsCommand::Delete { id } => {
            manager.delete(*id).await?;
            print_json(&json!({ "deleted": id, "current": manager.directory().current_id() }))?;
        }
    }

    let location = manager.directory().location().clone();
    env.remember_location(&location)
}

#[derive(Serialize)]
struct ViewRow {
    session_id: Option<SessionId>,
    name: String,
    visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<RunStatus>,
}

impl From<ChatView> for ViewRow {
    fn from(view: ChatView) -> Self {
        Self {
            session_id: view.session.id,
            name: view.session.name,
            visible: view.visible,
            status: view.status,
        }
    }
}

async fn run_watch(env: &mut ConsoleEnv, args: &WatchArgs) -> Result<(), CliError> {
    let (connector, events) = WsConnector::channel();
    let mut manager = env.manager(connector);
    manager.start().await?;

    let session_id = match args.session {
        Some(id) => {
            manager.select(id).await?;
            id
        }
        None => manager
            .directory()
            .current_id()
            .ok_or_else(|| ConsoleError::invalid_request("no current session"))?,
    };

    let mode = AcquireMode::from_flags(args.fresh, false);
    let connection = manager
        .acquire(session_id, &args.run, mode)?
        .ok_or_else(|| ConsoleError::stream("no connection available"))?;
    if let Some(task) = &args.task {
        connection.send(&RunCommand::start(args.run.clone(), task.clone()))?;
    }

    let mut events = UnboundedReceiverStream::new(events);
    let reason = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break TeardownReason::Unload,
            event = events.next() => {
                let Some(event) = event else {
                    break TeardownReason::Unmount;
                };
                if let StreamEventKind::Failed(message) = &event.kind {
                    warn!(session_id = %event.session_id, run_id = %event.run_id, error = %message, "run stream error");
                }
                let ours = event.session_id == session_id && event.run_id == args.run;
                if let Some(status) = manager.apply_stream_event(&event) {
                    let views: Vec<ViewRow> = manager.views().into_iter().map(ViewRow::from).collect();
                    print_json(&json!({
                        "session_id": event.session_id,
                        "run_id": event.run_id,
                        "status": status,
                        "views": views,
                    }))?;
                    if ours && status.is_finished() {
                        break TeardownReason::Unmount;
                    }
                }
                if ours && event.kind == StreamEventKind::Closed {
                    break TeardownReason::Unmount;
                }
            }
        }
    };

    for failure in manager.teardown(reason) {
        warn!(error = %failure, "connection close failed");
    }
    let location = manager.directory().location().clone();
    env.remember_location(&location)
}

async fn run_settings(env: &ConsoleEnv, command: &SettingsCommand) -> Result<(), CliError> {
    match command {
        SettingsCommand::Show => {
            let settings = env.backend.get_settings(&env.user_id).await?;
            let presets: serde_json::Map<String, Value> = AgentRole::all()
                .iter()
                .map(|role| {
                    let model = settings.role_model(*role);
                    (role.to_string(), Value::from(model.detect_preset()))
                })
                .collect();
            print_json(&json!({
                "settings": settings,
                "default_model": settings.initial_default_model(),
                "presets": presets,
                "model_usage": settings.model_usage_stats(),
            }))?;
        }
        SettingsCommand::ConfigInfo => {
            let info = env.backend.config_info().await?.unwrap_or_else(ConfigInfo::default);
            if info.overrides_models() {
                warn!(
                    path = info.config_file_path.as_deref().unwrap_or_default(),
                    "model settings are overridden by the LLM config file"
                );
            }
            print_json(&info)?;
        }
        SettingsCommand::Schema => {
            print_json(&AgentSettings::json_schema())?;
        }
        SettingsCommand::Advanced { state } => {
            let enabled = matches!(state, Toggle::On);
            edit_settings(env, |settings| {
                settings.set_advanced(enabled);
                Ok(())
            })
            .await?;
        }
        SettingsCommand::SetModel(args) => {
            let provider = ModelProvider::parse(&args.provider)
                .ok_or_else(|| SettingsError::UnknownProvider(args.provider.clone()))?;
            let mut model = match &args.preset {
                Some(preset) => provider.preset(preset).ok_or_else(|| SettingsError::UnknownPreset {
                    provider: provider.label().to_string(),
                    preset: preset.clone(),
                })?,
                None => provider.default_config(),
            };
            if let Some(name) = &args.model {
                model = model.with_model(name.clone());
            }
            let issues = model.validate();
            if !issues.is_empty() {
                let details: Vec<String> = issues.iter().map(ToString::to_string).collect();
                return Err(ConsoleError::invalid_request(details.join(", ")).into());
            }
            let role = match &args.role {
                Some(role) => Some(
                    AgentRole::parse(role).ok_or_else(|| SettingsError::UnknownRole(role.clone()))?,
                ),
                None => None,
            };
            edit_settings(env, |settings| {
                match role {
                    Some(role) => settings.set_role_model(role, model),
                    None => settings.apply_default_model(model),
                }
                Ok(())
            })
            .await?;
        }
    }
    Ok(())
}

async fn run_mcp_agents(env: &ConsoleEnv, command: &McpAgentsCommand) -> Result<(), CliError> {
    match command {
        McpAgentsCommand::List => {
            let settings = env.backend.get_settings(&env.user_id).await?;
            let rows: Vec<Value> = settings
                .mcp_agent_configs
                .iter()
                .enumerate()
                .map(|(index, agent)| {
                    json!({
                        "index": index,
                        "name": agent.name,
                        "description": agent.description,
                        "servers": agent.mcp_servers.len(),
                        "model": agent.model_client.model(),
                    })
                })
                .collect();
            print_json(&rows)?;
        }
        McpAgentsCommand::Add { file, index } => {
            let contents = std::fs::read_to_string(file)?;
            let agent: McpAgentConfig = serde_json::from_str(&contents)?;
            let index = *index;
            edit_settings(env, move |settings| settings.save_mcp_agent(agent, index)).await?;
        }
        McpAgentsCommand::Remove { index } => {
            let index = *index;
            edit_settings(env, move |settings| settings.remove_mcp_agent(index).map(|_| ())).await?;
        }
    }
    Ok(())
}

/// Loads settings, applies `change` and saves them back.
async fn edit_settings(
    env: &ConsoleEnv,
    change: impl FnOnce(&mut AgentSettings) -> Result<(), SettingsError>,
) -> Result<(), CliError> {
    let settings = env.backend.get_settings(&env.user_id).await?;
    let mut draft = SettingsDraft::new(settings);
    draft.edit(change)?;
    if !draft.has_changes() {
        return Ok(());
    }
    if let Err(err) = env
        .backend
        .update_settings(&env.user_id, draft.settings())
        .await
    {
        env.notifier.error("Failed to save agent settings");
        return Err(err.into());
    }
    draft.mark_saved();
    env.notifier.success("Agent settings saved successfully!");
    print_json(draft.settings())
}

fn run_nav(env: &mut ConsoleEnv, command: &NavCommand) -> Result<(), CliError> {
    let expanded = match command {
        NavCommand::Toggle => env.preferences.toggle_nav()?,
        NavCommand::Show => env.preferences.nav_expanded(),
    };
    print_json(&json!({ "navExpanded": expanded }))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let pretty = serde_json::to_string_pretty(value)?;
    write_stdout_line(&pretty)
}

fn write_stdout_line(text: &str) -> Result<(), CliError> {
    let mut out = std::io::stdout();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn write_stderr_line(text: &str) -> Result<(), CliError> {
    let mut out = std::io::stderr();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        AgentConsoleCli::command().debug_assert();
    }

    #[test]
    fn parses_watch_with_global_options() {
        let cli = AgentConsoleCli::try_parse_from([
            "agent-console",
            "watch",
            "--run",
            "run-7",
            "--session",
            "3",
            "--fresh",
            "--server-url",
            "https://agents.example.com/api",
        ])
        .expect("parse");
        let Command::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.session, Some(SessionId(3)));
        assert!(args.fresh);
        assert_eq!(
            cli.global.server_url.as_deref(),
            Some("https://agents.example.com/api")
        );
    }

    #[test]
    fn session_ids_must_be_numeric() {
        let result = AgentConsoleCli::try_parse_from(["agent-console", "sessions", "select", "abc"]);
        assert!(result.is_err());
    }
}

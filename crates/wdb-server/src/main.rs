use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use wdb_server::api::{self, AppState};
use wdb_server::config::{self, APP_NAME, AppConfig};
use wdb_server::engine::Engine;
use wdb_server::monitor::{self, ProcfsInspector};
use wdb_server::state::{Hub, Settings};
use wdb_server::tcp;
use wdb_server::watcher::LibraryWatcher;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    match cli.command {
        Command::Serve(cmd) => async_serve(cli.common, cmd),
        Command::Config { command } => handle_config(&cli.common, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[tokio::main]
async fn async_serve(common: CommonOpts, cmd: ServeCommand) -> Result<()> {
    handle_serve(common, cmd).await
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "wdb-server - coordination hub for the wdb remote debugger.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output logs as machine readable JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the debugging hub
    Serve(ServeCommand),
    /// Inspect or reset the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address for the browser-facing HTTP listener
    #[arg(long)]
    server_host: Option<String>,
    /// Port for the browser-facing HTTP listener
    #[arg(short = 'p', long)]
    server_port: Option<u16>,
    /// Host address for the debuggee TCP listener
    #[arg(long)]
    socket_host: Option<String>,
    /// Port for the debuggee TCP listener
    #[arg(long)]
    socket_port: Option<u16>,
    /// Keep debuggee sessions alive when their browser tab closes
    #[arg(long)]
    detached_session: bool,
    /// Expose debugged filenames in the session list
    #[arg(long)]
    show_filename: bool,
    /// Wait for input on every debugger page
    #[arg(long)]
    more: bool,
    /// Also search the configured extra path for libpython
    #[arg(long)]
    extra_search_path: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

fn init_logging(common: &CommonOpts) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    if common.quiet {
        log::set_max_level(LevelFilter::Off);
        return;
    }

    let level = match effective_log_level(common) {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wdb_server={level},tower_http={level}")));

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        let disable_color = common.no_color
            || std::env::var_os("NO_COLOR").is_some()
            || !io::stderr().is_terminal();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(effective_log_level(common));
    builder.try_init().ok();
}

fn effective_log_level(common: &CommonOpts) -> LevelFilter {
    if common.trace {
        LevelFilter::Trace
    } else if common.debug || common.verbose >= 2 {
        LevelFilter::Debug
    } else if common.verbose == 1 {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    }
}

async fn handle_serve(common: CommonOpts, cmd: ServeCommand) -> Result<()> {
    let (mut config, config_path) = config::load(common.config.as_deref())?;
    debug!("configuration loaded from {}", config_path.display());
    apply_cli_overrides(&mut config, &common, &cmd);

    let settings = Arc::new(Settings::new(
        config.settings.debug,
        config.settings.extra_search_path,
        config.settings.more,
        config.settings.detached_session,
        config.settings.show_filename,
    ));
    let hub = Hub::new(settings.clone());
    let engine = Engine::new(config.engine.clone());
    let inspector = Arc::new(ProcfsInspector::new());

    let watcher = start_watcher(&config, &hub, settings.as_ref(), inspector.clone());
    if watcher.is_none() {
        info!("no libpython found, control channels will poll for processes");
    }

    let state = AppState {
        hub: hub.clone(),
        engine,
        inspector,
        watcher_available: watcher.is_some(),
    };
    let router = api::create_router(state);

    let socket_addr = resolve(&config.socket.host, config.socket.port).await?;
    let tcp_listener = TcpListener::bind(socket_addr)
        .await
        .with_context(|| format!("binding debuggee listener on {socket_addr}"))?;
    info!("(tcp) listening on {}:{}", config.socket.host, config.socket.port);

    let server_addr = resolve(&config.server.host, config.server.port).await?;
    let http_listener = TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("binding http listener on {server_addr}"))?;
    info!("(http) listening on {}:{}", config.server.host, config.server.port);

    let http = std::future::IntoFuture::into_future(axum::serve(http_listener, router));
    tokio::select! {
        result = http => result.context("http server"),
        result = tcp::run(tcp_listener, hub) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

fn apply_cli_overrides(config: &mut AppConfig, common: &CommonOpts, cmd: &ServeCommand) {
    if let Some(host) = &cmd.server_host {
        config.server.host = host.clone();
    }
    if let Some(port) = cmd.server_port {
        config.server.port = port;
    }
    if let Some(host) = &cmd.socket_host {
        config.socket.host = host.clone();
    }
    if let Some(port) = cmd.socket_port {
        config.socket.port = port;
    }
    config.settings.debug |= common.debug;
    config.settings.detached_session |= cmd.detached_session;
    config.settings.show_filename |= cmd.show_filename;
    config.settings.more |= cmd.more;
    config.settings.extra_search_path |= cmd.extra_search_path;
}

/// Start the libpython watcher and the refresh task it drives. `None` means
/// there is nothing to watch on this machine.
fn start_watcher(
    config: &AppConfig,
    hub: &Hub,
    settings: &Settings,
    inspector: Arc<ProcfsInspector>,
) -> Option<LibraryWatcher> {
    let extra = if settings.extra_search_path() {
        match config.engine.search_path.as_deref().map(|raw| config::expand_path(Path::new(raw))) {
            Some(Ok(path)) => Some(path),
            Some(Err(err)) => {
                warn!("ignoring extra search path: {err:#}");
                None
            }
            None => None,
        }
    } else {
        None
    };

    let files = LibraryWatcher::discover(extra.as_deref());
    if files.is_empty() {
        return None;
    }

    let (trigger, mut refresh) = mpsc::channel(1);
    let watcher = match LibraryWatcher::start(files, trigger) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!("could not start library watcher: {err:#}");
            return None;
        }
    };

    let control = hub.control.clone();
    tokio::spawn(async move {
        while refresh.recv().await.is_some() {
            debug!("library access, refreshing processes");
            monitor::refresh_processes(&control, None, inspector.as_ref()).await;
        }
    });

    Some(watcher)
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("resolving {host}:{port}"))?
        .next()
        .with_context(|| format!("no address for {host}:{port}"))
}

fn handle_config(common: &CommonOpts, command: ConfigCommand) -> Result<()> {
    let path = match &common.config {
        Some(path) => config::expand_path(path)?,
        None => config::default_config_path()?,
    };
    match command {
        ConfigCommand::Show => {
            let (config, _) = config::load(common.config.as_deref())?;
            if common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config).context("serializing config to JSON")?
                );
            } else {
                println!("{config:#?}");
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }
        // Reset also recovers from an unparseable file, so it never loads.
        ConfigCommand::Reset => {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("removing {}", path.display()))?;
            }
            config::write_default(&path)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

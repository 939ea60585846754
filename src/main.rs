use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use webapp_runtime::config::{CliOverrides, ConfigStore, ServerConfig};
use webapp_runtime::error::RuntimeError;
use webapp_runtime::instance::{InstanceKey, InstancePaths};
use webapp_runtime::startup::{self, StartupLogger};
use webapp_runtime::supervisor::{
    LoggingObserver, PortAllocator, ReconfigureOutcome, Reconfigurer, RuntimeEvent,
    RuntimeObserver, SupervisorState, Supervisor,
};
use webapp_runtime::utils::open_append_owner_only;
use webapp_runtime::{APP_NAME, VERSION};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
#[command(version)]
struct Cli {
    /// Configuration file path (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Use this fixed port for the application server
    #[arg(long)]
    port: Option<u16>,

    /// Directory for lock, address and log files
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Do not open a browser tab once the server is ready
    #[arg(long)]
    no_browser: bool,

    /// Report whether a port is in use and exit
    #[arg(long, value_name = "PORT")]
    check_port: Option<u16>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(port) = cli.check_port {
        let in_use = PortAllocator::is_port_in_use(port);
        println!("Port {} is {}", port, if in_use { "in use" } else { "free" });
        std::process::exit(if in_use { 1 } else { 0 });
    }

    let store = ConfigStore::resolve(APP_NAME, cli.config.as_deref())?.with_cli_overrides(
        CliOverrides {
            port: cli.port,
            no_browser: cli.no_browser,
        },
    );
    let key = InstanceKey::detect(APP_NAME)?;
    let data_dir = cli
        .data_dir
        .clone()
        .or_else(|| store.env_overrides().data_dir.clone());
    let paths = InstancePaths::new(&key, data_dir.as_deref());
    paths.ensure_dir()?;

    init_logging(&cli.log_level, &paths.startup_log)?;

    // Display startup banner
    startup::display_startup_banner(VERSION);

    let config = store.load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    StartupLogger::display_startup_info(&store, &config, &key, &paths, VERSION);

    let reconfigurer = TerminalReconfigurer {
        store: store.clone(),
    };

    let mut supervisor = Supervisor::new(APP_NAME, config, paths)
        .with_store(store)
        .with_observer(Arc::new(ConsoleObserver))
        .with_reconfigurer(Box::new(reconfigurer));

    let shutdown = supervisor.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            shutdown.request();
        }
    });

    match supervisor.run().await {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            error!("❌ {} error: {}", e.category(), e);
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn init_logging(level: &str, startup_log: &Path) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let log_file = open_append_owner_only(startup_log)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .with(env_filter)
        .init();

    Ok(())
}

/// Prints the user-facing part of supervisor events to the terminal
struct ConsoleObserver;

impl RuntimeObserver for ConsoleObserver {
    fn state_changed(&self, from: SupervisorState, to: SupervisorState) {
        LoggingObserver.state_changed(from, to);
    }

    fn on_event(&self, event: &RuntimeEvent) {
        LoggingObserver.on_event(event);

        match event {
            RuntimeEvent::Ready { url } => println!("Server ready: {}", url),
            RuntimeEvent::HandedOff { url: Some(url) } => {
                println!("Already running, opening {}", url)
            }
            RuntimeEvent::DiagnosticsAvailable { server_log } => {
                println!("Server log: {}", server_log.display())
            }
            RuntimeEvent::SlowStartup { .. } => {
                println!("The application server is taking longer than usual to start...")
            }
            _ => {}
        }
    }
}

/// Lets the user fix the settings file and retry from the terminal
struct TerminalReconfigurer {
    store: ConfigStore,
}

impl Reconfigurer for TerminalReconfigurer {
    fn reconfigure(&mut self, _current: &ServerConfig, error: &RuntimeError) -> ReconfigureOutcome {
        let stdin = io::stdin();

        loop {
            eprintln!();
            eprintln!("The application server could not be started: {}", error);
            eprintln!(
                "Edit {} and press Enter to retry, or Ctrl-D to quit.",
                self.store.path().display()
            );
            let _ = io::stderr().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return ReconfigureOutcome::Cancelled,
                Ok(_) => {}
            }

            match self.store.reload() {
                Ok(config) => return ReconfigureOutcome::Accepted(config),
                Err(e) => eprintln!("Configuration is not valid: {}", e),
            }
        }
    }
}

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use terminal_orchestrator::application::lifecycle::LifecycleGuard;
use terminal_orchestrator::application::orchestrator::{Orchestrator, OrchestratorConfig};
use terminal_orchestrator::config::Settings;
use terminal_orchestrator::domain::device::DeviceIdentity;
use terminal_orchestrator::domain::ports::{CoordinationBackend, HostContextRef};
use terminal_orchestrator::domain::session::{NewSession, PendingSession};
use terminal_orchestrator::error;
use terminal_orchestrator::infrastructure::http_backend::HttpBackend;
use terminal_orchestrator::infrastructure::in_memory::StaticHostContext;
use terminal_orchestrator::infrastructure::simulated_reader::SimulatedReader;
use terminal_orchestrator::interfaces::console::{
    CommandReader, ConsoleHost, HostReply, JsonLinesSink,
};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend origin, e.g. https://pay.example.com
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Cookie header sent to the backend
    #[arg(long, global = true)]
    cookie: Option<String>,

    /// Device id override (prefixed with `tap2pay-`)
    #[arg(long, global = true)]
    device_id: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator, reading host signals from stdin and writing events to stdout
    Run,

    /// Print the derived device identity
    DeviceId,

    /// Create a pending payment session on the backend
    CreateSession {
        booking_id: String,

        #[arg(long)]
        amount_cents: Option<i64>,

        #[arg(long)]
        currency: Option<String>,

        /// Device that should claim the session
        #[arg(long)]
        target_device: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "terminal_orchestrator=debug"
    } else {
        "terminal_orchestrator=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();

    let settings = load_settings(&cli).into_diagnostic()?;

    match cli.command {
        Commands::Run => run(settings).await,
        Commands::DeviceId => {
            println!("{}", DeviceIdentity::derive(settings.device.id.as_deref()));
            Ok(())
        }
        Commands::CreateSession {
            booking_id,
            amount_cents,
            currency,
            target_device,
        } => {
            let request = NewSession {
                booking_id,
                amount_cents,
                currency,
                target_device_id: target_device,
            };
            let created = create_session(&settings, &request)
                .await
                .into_diagnostic()?;
            println!("{}", serde_json::to_string(&created).into_diagnostic()?);
            Ok(())
        }
    }
}

/// File and environment settings, with command-line flags taking precedence.
fn load_settings(cli: &Cli) -> error::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.origin.is_some() {
        settings.backend.origin = cli.origin.clone();
    }
    if cli.cookie.is_some() {
        settings.backend.cookie = cli.cookie.clone();
    }
    if cli.device_id.is_some() {
        settings.device.id = cli.device_id.clone();
    }
    Ok(settings)
}

fn http_backend(settings: &Settings) -> error::Result<HttpBackend> {
    let host: HostContextRef = Arc::new(StaticHostContext::new(
        settings.backend.origin.clone(),
        settings.backend.cookie.clone(),
    ));
    Ok(HttpBackend::new(
        &settings.backend,
        host,
        settings.origin_timeout(),
    )?)
}

async fn create_session(
    settings: &Settings,
    request: &NewSession,
) -> error::Result<PendingSession> {
    Ok(http_backend(settings)?.create_session(request).await?)
}

async fn run(settings: Settings) -> Result<()> {
    let device = DeviceIdentity::derive(settings.device.id.as_deref());
    info!(device_id = %device, "starting terminal orchestrator");

    let backend = http_backend(&settings).into_diagnostic()?;
    let orchestrator = Orchestrator::new(
        device,
        Box::new(backend),
        OrchestratorConfig::from(&settings),
    );
    let sdk = Arc::new(SimulatedReader::new(
        orchestrator.token_provider(),
        &settings.simulator,
    ));
    let sink = Arc::new(JsonLinesSink::new(io::stdout()));
    let handle = orchestrator.spawn(sdk.clone(), sink.clone());
    handle.start().into_diagnostic()?;

    let lifecycle = LifecycleGuard::new(handle.clone(), settings.cancel_delay());
    let mut console = ConsoleHost::new(handle.clone(), lifecycle).with_simulator(sdk.clone());
    let mut commands = CommandReader::new(BufReader::new(tokio::io::stdin()));
    let mut input_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            command = commands.next(), if input_open => match command {
                None => {
                    info!("host input closed, running until interrupted");
                    input_open = false;
                }
                Some(Err(e)) => warn!(error = %e, "ignoring host command"),
                Some(Ok(command)) => match console.apply(command).await.into_diagnostic()? {
                    HostReply::Continue => {}
                    HostReply::Status(snapshot) => sink.write_status(&snapshot),
                    HostReply::Quit => break,
                },
            },
        }
    }

    handle.shutdown().await.into_diagnostic()?;
    info!("terminal orchestrator stopped");
    Ok(())
}

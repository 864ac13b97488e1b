use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use fleet_backoffice::{
    config::{self, AppConfig},
    db,
    events::EventSender,
    notifications::LoggingMailer,
    AppServices, CommandRegistry,
};

#[derive(Parser)]
#[command(name = "backoffice", about = "Fleet back-office command runner", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered command names
    List,
    /// Run a named command with a JSON payload
    Run {
        #[arg(help = "Command name, e.g. finish.shipment")]
        name: String,
        #[arg(long, help = "Path to the JSON payload; '-' reads stdin")]
        payload: PathBuf,
    },
    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let registry = CommandRegistry::with_defaults();

    match cli.command {
        Commands::List => {
            for name in registry.names() {
                println!("{}", name);
            }
        }
        Commands::Run { name, payload } => {
            let context = CliContext::initialize().await?;
            let payload = read_payload(&payload)?;
            let span = info_span!("cli_command", command = %name, request_id = %Uuid::new_v4());
            let result = registry
                .dispatch(&context.services, &name, payload)
                .instrument(span)
                .await
                .with_context(|| format!("command {} failed", name))?;
            print_value(&result, cli.pretty)?;
        }
        Commands::Migrate => {
            let config = config::load_config().context("failed to load application config")?;
            config::init_tracing(&config.log_level, config.log_json);
            let pool = db::connect(&config)
                .await
                .context("failed to connect to database")?;
            db::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
    }

    Ok(())
}

struct CliContext {
    _config: AppConfig,
    services: AppServices,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(&config.log_level, config.log_json);

        let uow = db::unit_of_work_from_config(&config)
            .await
            .context("failed to initialise the store")?;

        let (event_sender, mut event_rx) = EventSender::channel(32);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!(target: "backoffice_cli", event = ?event, "received async event");
            }
        });

        let services = AppServices::new(uow, event_sender, Arc::new(LoggingMailer), &config);
        Ok(Self {
            _config: config,
            services,
        })
    }
}

fn read_payload(path: &Path) -> Result<Value> {
    let raw = if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read payload from stdin")?;
        buffer
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("failed to read payload file {}", path.display()))?
    };
    serde_json::from_str(&raw).context("payload is not valid JSON")
}

fn print_value<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    if pretty {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", serde_json::to_string(value)?);
    }
    Ok(())
}

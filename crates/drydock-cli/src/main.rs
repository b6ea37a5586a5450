mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::lifecycle::Operation;
use cmd::render::Format;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "drydock",
    about = "Resolve, validate and drive declarative service documents",
    version,
    propagate_version = true
)]
struct Cli {
    /// Service document (default: nearest service.json from the current directory up)
    #[arg(long, global = true, env = "DRYDOCK_SERVICE")]
    service: Option<PathBuf>,

    /// Tool settings file (default: ~/.drydock/settings.json)
    #[arg(long, global = true, env = "DRYDOCK_SETTINGS")]
    settings: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the document's structure and run the semantic checks
    Validate {
        /// Skip checks that query the cloud account
        #[arg(long)]
        offline: bool,
    },

    /// Print the fully resolved document
    Render {
        /// Fail on any undefined template variable, including host/username/pem
        #[arg(long)]
        strict: bool,

        #[arg(long, value_enum, default_value = "json")]
        format: Format,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Print the facts handed to configuration management
    Facts,

    /// Print the fields of a schema (default, managed-platform, local-vm, extension)
    Schema { kind: Option<String> },

    /// Create the service's infrastructure
    Create,

    /// Run the setup commands
    Setup,

    /// Run the provision commands and apply configuration management
    Provision,

    /// Run the health checks
    Check,

    /// Tear the service's infrastructure down
    Terminate,

    /// Show the service's runtime status
    Status,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = cli.settings.as_deref();
    let json = cli.json;
    let service = || root::resolve_service(cli.service.as_deref());

    match cli.command {
        Commands::Schema { kind } => cmd::schema::run(kind.as_deref(), json),
        Commands::Validate { offline } => cmd::validate::run(&service()?, settings, offline, json),
        Commands::Render {
            strict,
            format,
            output,
        } => cmd::render::run(&service()?, strict, format, output.as_deref()),
        Commands::Facts => cmd::facts::run(&service()?, json),
        Commands::Create => cmd::lifecycle::run(&service()?, settings, Operation::Create, json),
        Commands::Setup => cmd::lifecycle::run(&service()?, settings, Operation::Setup, json),
        Commands::Provision => {
            cmd::lifecycle::run(&service()?, settings, Operation::Provision, json)
        }
        Commands::Check => cmd::lifecycle::run(&service()?, settings, Operation::Check, json),
        Commands::Terminate => {
            cmd::lifecycle::run(&service()?, settings, Operation::Terminate, json)
        }
        Commands::Status => cmd::lifecycle::run(&service()?, settings, Operation::Status, json),
    }
}

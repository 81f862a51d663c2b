mod commands;
mod progress;
mod summary;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ismphot", about = "Reference frames and difference-imaging photometry")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (TOML); built-in defaults otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print or save the default configuration
    Config(commands::config::ConfigArgs),
    /// Show the identity resolved for each frame
    Identify(commands::identify::IdentifyArgs),
    /// Select and register astrometric references
    Astromref(commands::astromref::AstromrefArgs),
    /// Register frames onto their astrometric reference
    Align(commands::align::AlignArgs),
    /// Collect per-frame quality metrics
    Metrics(commands::metrics::MetricsArgs),
    /// Select photometric reference candidates
    Select(commands::select::SelectArgs),
    /// Amend a stored candidate selection
    Amend(commands::amend::AmendArgs),
    /// Fit smoothed shape coefficients (.xysdk) for source lists
    Xysdk(commands::xysdk::XysdkArgs),
    /// Build a combined photometric reference from a candidate selection
    BuildPhotref(commands::build_photref::BuildPhotrefArgs),
    /// Convolve, subtract and photometer registered frames
    Convsubphot(commands::convsubphot::ConvsubphotArgs),
    /// Record difference photometry in the database
    Ingest(commands::ingest::IngestArgs),
    /// Show the active references for a field and CCD
    ShowRef(commands::show_ref::ShowRefArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = commands::load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Config(args) => commands::config::run(args, &config),
        Commands::Identify(args) => commands::identify::run(args, config),
        Commands::Astromref(args) => commands::astromref::run(args, config),
        Commands::Align(args) => commands::align::run(args, config),
        Commands::Metrics(args) => commands::metrics::run(args, config),
        Commands::Select(args) => commands::select::run(args, config),
        Commands::Amend(args) => commands::amend::run(args, config),
        Commands::Xysdk(args) => commands::xysdk::run(args, config),
        Commands::BuildPhotref(args) => commands::build_photref::run(args, config),
        Commands::Convsubphot(args) => commands::convsubphot::run(args, config),
        Commands::Ingest(args) => commands::ingest::run(args, config),
        Commands::ShowRef(args) => commands::show_ref::run(args, config),
    }
}

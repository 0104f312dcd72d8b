use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;
use strata_context::{InMemoryLoader, StructureDefinitionLoader};
use strata_snapshot::{GeneratorConfig, SnapshotGenerator};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Generate FHIR StructureDefinition snapshots from differentials",
    version,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the snapshot of one StructureDefinition.
    Snapshot {
        /// Directory of StructureDefinition JSON files (bundles accepted).
        #[arg(short, long, value_name = "DIR")]
        dir: PathBuf,
        /// Canonical URL of the definition to generate.
        #[arg(short, long)]
        url: String,
        /// Output file path (stdout if omitted).
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Generator configuration (YAML).
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Abort on the first error instead of collecting issues.
        #[arg(long, action = ArgAction::SetTrue)]
        throw_on_error: bool,
        /// Print issues as an OperationOutcome instead of one line each.
        #[arg(long, action = ArgAction::SetTrue)]
        outcome: bool,
        /// Pretty-print JSON output.
        #[arg(short, long, action = ArgAction::SetTrue)]
        pretty: bool,
    },

    /// Print the baseDefinition chain of a StructureDefinition.
    Chain {
        /// Directory of StructureDefinition JSON files (bundles accepted).
        #[arg(short, long, value_name = "DIR")]
        dir: PathBuf,
        /// Canonical URL to start from.
        #[arg(short, long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Snapshot {
            dir,
            url,
            out,
            config,
            throw_on_error,
            outcome,
            pretty,
        } => {
            let config = load_config(config.as_deref(), throw_on_error)?;
            run_snapshot(&dir, &url, out.as_deref(), config, outcome, pretty).await
        }
        Commands::Chain { dir, url } => {
            let loader = load_definitions(&dir).await?;
            for link in loader.resolve_inheritance_chain(&url).await? {
                println!("{}", link);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `RUST_LOG` wins; otherwise `info`
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn load_config(path: Option<&Path>, throw_on_error: bool) -> Result<GeneratorConfig> {
    let mut config = match path {
        Some(path) => {
            let yaml = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            GeneratorConfig::from_yaml(&yaml)
                .with_context(|| format!("Invalid configuration in {}", path.display()))?
        }
        None => GeneratorConfig::default(),
    };
    if throw_on_error {
        config.throw_on_error = true;
    }
    Ok(config)
}

async fn load_definitions(dir: &Path) -> Result<Arc<InMemoryLoader>> {
    let loader = Arc::new(InMemoryLoader::new());
    let count = loader
        .load_directory(dir)
        .await
        .with_context(|| format!("Failed to load definitions from {}", dir.display()))?;
    tracing::info!(count, dir = %dir.display(), "definitions loaded");
    Ok(loader)
}

async fn run_snapshot(
    dir: &Path,
    url: &str,
    out: Option<&Path>,
    config: GeneratorConfig,
    outcome: bool,
    pretty: bool,
) -> Result<ExitCode> {
    let loader = load_definitions(dir).await?;
    let sd = loader
        .load_structure_definition(url)
        .await
        .with_context(|| format!("No StructureDefinition with url {}", url))?;

    let mut generator = SnapshotGenerator::with_config(loader, config);
    let result = generator
        .generate(sd)
        .await
        .with_context(|| format!("Snapshot generation failed for {}", url))?;

    if outcome {
        eprintln!("{}", serde_json::to_string_pretty(&result.to_operation_outcome())?);
    } else {
        for issue in &result.issues {
            eprintln!("{}", issue);
        }
    }
    tracing::info!(
        errors = result.error_count(),
        warnings = result.warning_count(),
        elements = result.structure_definition.snapshot_elements().len(),
        "snapshot finished"
    );

    let value = result
        .structure_definition
        .to_value()
        .context("Failed to serialize StructureDefinition")?;
    write_json_output(&value, out, pretty)?;

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn write_json_output(value: &Value, output: Option<&Path>, pretty: bool) -> Result<()> {
    let content = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    match output {
        Some(path) => {
            fs::write(path, content).with_context(|| format!("Failed to write to {}", path.display()))?;
            eprintln!("Wrote output to {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use idp_core::{EntityDistributor, RedactionEngine};
use idp_workflow::{LocalObjectStore, PipelineConfig};

/// Document workflow engine tools.
#[derive(Parser)]
#[command(name = "idp-workflow", version, about = "Document workflow engine tools")]
struct Cli {
    /// Pipeline configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare and redact documents stored under a local directory
    Redact {
        /// Directory that holds the object keys
        root: PathBuf,
        /// Per-document prefixes, e.g. public/output/<wf>/<job>/
        #[arg(required = true)]
        prefixes: Vec<String>,
        /// Keep the staged originals after redaction
        #[arg(long)]
        retain: bool,
    },

    /// Print the plaintext derived from an OCR output document
    Plaintext {
        /// Path to the merged OCR JSON
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match PipelineConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(2);
        }
    };
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("IDP_LOG_LEVEL", config.log_level.as_str())).init();

    let result = match cli.command {
        Commands::Redact { root, prefixes, retain } => cmd_redact(&config, root, &prefixes, retain).await,
        Commands::Plaintext { file } => cmd_plaintext(&file),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            log::error!("[Cli] {:#}", e);
            eprintln!("error: {:#}", e);
            process::exit(1);
        }
    }
}

async fn cmd_redact(config: &PipelineConfig, root: PathBuf, prefixes: &[String], retain: bool) -> anyhow::Result<i32> {
    let store = Arc::new(LocalObjectStore::new(root));
    let distributor = EntityDistributor::new(store.clone(), config.namespace());
    let prepared = distributor.prepare(prefixes).await.context("preparing redaction tasks")?;

    let engine = RedactionEngine::new(store, config.redact_options());
    let report = engine.redact_batch(&prepared.tasks, retain).await;

    let output = serde_json::json!({
        "preparation_failures": prepared.failures,
        "outcomes": report.outcomes,
        "failures": report.failures,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(if prepared.failures.is_empty() && report.failures.is_empty() {
        0
    } else {
        1
    })
}

fn cmd_plaintext(file: &Path) -> anyhow::Result<i32> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let document = idp_ocr::OcrDocument::from_slice(&bytes)?;
    print!("{}", idp_ocr::plain_text(&document));
    Ok(0)
}

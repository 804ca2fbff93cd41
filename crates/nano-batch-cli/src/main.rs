//! Command-line driver for the nano-batch pipeline

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nano_batch_core::credential::CredentialValidator;
use nano_batch_core::utils::{display, file};
use nano_batch_core::{
    version, AppConfig, AspectRatio, ConfigManager, Credential, CredentialManager,
    CredentialOrigin, CredentialSource, ExportAggregator, ExportFormat, GenerationSettings,
    ImageQueue, ItemOutcome, ModelTier, PipelineError, QueueScheduler, RemoteTransformClient,
    SuppliedCredential, UsageAccountant,
};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Parser)]
#[command(name = "nano-batch")]
#[command(about = "Batch image transformation with a generative-image model")]
#[command(version = version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform every image in the given files and directories
    Run {
        /// Input files or directories (one level deep)
        #[arg(short, long = "input", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        /// Instruction for the model; blank uses the default enhancement
        #[arg(short, long)]
        prompt: Option<String>,

        /// Target aspect ratio (1:1, 3:4, 4:3, 9:16, 16:9)
        #[arg(short, long)]
        aspect_ratio: Option<AspectRatio>,

        /// Export format (jpeg, png, webp)
        #[arg(short, long)]
        format: Option<ExportFormat>,

        /// Model tier (pro, standard)
        #[arg(short, long)]
        tier: Option<ModelTier>,

        /// Directory the archive is written to
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// API key; falls back to GEMINI_API_KEY, then an interactive prompt
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Check an API key against the validation endpoint
    ValidateKey {
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Show configuration and capabilities
    Info,
}

/// Manual key entry on an interactive terminal
struct StdinCredentialSource;

#[async_trait::async_trait]
impl CredentialSource for StdinCredentialSource {
    async fn acquire(&self) -> Option<SuppliedCredential> {
        let key = tokio::task::spawn_blocking(prompt_for_key).await.ok().flatten()?;
        Some(SuppliedCredential {
            credential: Credential::new(key),
            origin: CredentialOrigin::Manual,
        })
    }
}

fn prompt_for_key() -> Option<String> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return None;
    }

    eprint!("Enter API key: ");
    std::io::stderr().flush().ok()?;
    let mut line = String::new();
    stdin.lock().read_line(&mut line).ok()?;
    let key = line.trim().to_string();
    (!key.is_empty()).then_some(key)
}

/// Key from the flag or the environment; both count as host-provided
fn host_key(flag: Option<String>) -> Option<String> {
    flag.or_else(|| std::env::var(API_KEY_ENV).ok())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

fn load_config(path: Option<PathBuf>) -> Result<ConfigManager> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new(),
    };
    manager.context("Failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let manager = load_config(cli.config)?;
    let config = manager.config().clone();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    let _log_guard = nano_batch_core::init(&logging)?;
    info!("nano-batch v{} starting", version());

    match cli.command {
        Commands::Run {
            inputs,
            prompt,
            aspect_ratio,
            format,
            tier,
            output,
            api_key,
        } => {
            let mut settings =
                GenerationSettings::from_config(&config.generation, config.export.default_format);
            if let Some(prompt) = prompt {
                settings.instruction = prompt;
            }
            if let Some(aspect_ratio) = aspect_ratio {
                settings.aspect_ratio = aspect_ratio;
            }
            if let Some(format) = format {
                settings.export_format = format;
            }
            if let Some(tier) = tier {
                settings.tier = tier;
            }
            run(&config, inputs, settings, output, api_key).await
        }

        Commands::ValidateKey { api_key } => {
            let Some(key) = host_key(api_key).or_else(prompt_for_key) else {
                bail!("No API key provided (use --api-key or {})", API_KEY_ENV);
            };
            let client = RemoteTransformClient::from_config(&config.remote);
            let valid = client.validate(&Credential::new(key)).await?;
            println!("{}", if valid { "valid" } else { "invalid" });
            Ok(())
        }

        Commands::Info => {
            print_info(&manager, &config);
            Ok(())
        }
    }
}

async fn run(
    config: &AppConfig,
    inputs: Vec<PathBuf>,
    settings: GenerationSettings,
    output: PathBuf,
    api_key: Option<String>,
) -> Result<()> {
    let files = file::collect_input_files(&inputs)?;
    let queue = Arc::new(ImageQueue::new(config.queue.result_retention));
    let mut names = std::collections::HashMap::new();

    for path in &files {
        match queue.add_path(path).await {
            Ok(id) => {
                names.insert(id, path.display().to_string());
            }
            Err(PipelineError::Intake { mime_type }) => {
                debug!("Skipping {} ({})", path.display(), mime_type);
            }
            Err(e) => warn!("Could not read {}: {}", path.display(), e),
        }
    }

    if queue.is_empty().await {
        println!("No images to process");
        return Ok(());
    }

    let client = Arc::new(RemoteTransformClient::from_config(&config.remote));
    let credentials = Arc::new(
        CredentialManager::new(client.clone()).with_source(Arc::new(StdinCredentialSource)),
    );

    match host_key(api_key) {
        Some(key) => {
            credentials
                .supply(SuppliedCredential {
                    credential: Credential::new(key),
                    origin: CredentialOrigin::HostPicker,
                })
                .await?;
        }
        None => {
            credentials.acquire().await?;
        }
    }
    if !credentials.is_active().await {
        bail!("An API key is required (use --api-key or {})", API_KEY_ENV);
    }

    println!(
        "Processing {} images ({}, {}, {})",
        queue.len().await,
        settings.aspect_ratio,
        settings.export_format,
        match settings.tier {
            ModelTier::Pro => "pro",
            ModelTier::Standard => "standard",
        }
    );

    let accountant = Arc::new(UsageAccountant::from_config(&config.pricing));
    let scheduler = QueueScheduler::new(
        Arc::clone(&queue),
        client,
        Arc::clone(&credentials),
        Arc::clone(&accountant),
    )
    .with_settings(settings);

    let report = scheduler.process_all().await?;
    for (id, outcome) in &report.outcomes {
        let name = names.get(id).map(String::as_str).unwrap_or("?");
        match outcome {
            ItemOutcome::Succeeded => {
                let size = queue
                    .get(*id)
                    .await
                    .and_then(|item| item.result().map(|r| r.metadata.size_bytes))
                    .unwrap_or_default();
                println!("  ok     {} ({})", name, display::format_bytes(size, 2));
            }
            ItemOutcome::Failed { message, .. } => println!("  error  {}: {}", name, message),
            ItemOutcome::Skipped { reason } => println!("  skip   {}: {}", name, reason),
            ItemOutcome::CredentialRequired => println!("  wait   {}: API key required", name),
        }
    }
    if report.credential_required {
        eprintln!("The API key was rejected; remaining images were not processed");
    }

    let aggregator = ExportAggregator::new(&config.export);
    match aggregator.write_archive(&queue.items().await, &output).await? {
        Some(path) => println!("Archive written to {}", path.display()),
        None => println!("No successful images to export"),
    }

    let credit = accountant.credit_info();
    println!(
        "Generations this session: {} (estimated cost ${:.3})",
        credit.session_generations, credit.estimated_session_cost
    );
    Ok(())
}

fn print_info(manager: &ConfigManager, config: &AppConfig) {
    let remote = &config.remote;
    println!("nano-batch v{}", version());
    println!("Config: {}", manager.config_path().display());
    println!("\nRemote service:");
    println!("  Mode: {:?}", remote.mode);
    println!("  Endpoint: {}", remote.endpoint);
    println!("  Pro model: {} ({})", remote.pro_model, remote.pro_image_size);
    println!("  Standard model: {}", remote.standard_model);
    println!("  Fallback model: {}", remote.fallback_model);
    println!("\nExport formats: {}", join(ExportFormat::ALL.iter()));
    println!("Aspect ratios: {}", join(AspectRatio::ALL.iter()));
    println!("Cost per image: ${}", config.pricing.cost_per_image);
}

fn join<T: std::fmt::Display>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

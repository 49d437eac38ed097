//! Ereader CLI - Headless Generation Surface
//!
//! Drives `ereader-core` from the command line: loads a text file, takes the
//! text before a click position as context, streams a generated continuation
//! to stdout and optionally writes the document back with the block inserted.
//!
//! # Usage
//!
//! ```bash
//! # Continue from the end of the file over the configured transport
//! ereader generate --file story.txt
//!
//! # Click at line 12, column 40, with tags, over a WebSocket
//! ereader generate -f story.txt --line 12 --column 40 -t romance,rain \
//!     --transport socket --endpoint wss://reader.example/api/ws
//!
//! # Keep the result
//! ereader generate -f story.txt --position 1200 -o story.continued.txt
//!
//! # Tag catalog and generator status
//! ereader tags --popular 8
//! ereader tags --search rom --json
//! ereader status
//!
//! # Verbose logging (stderr)
//! RUST_LOG=debug ereader generate -f story.txt
//! ```
//!
//! # Signals
//!
//! - `SIGINT`: cancel the in-flight generation and exit

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use ereader_core::{
    default_config_path, load_config_from_path, AttemptOutcome, ConfigOverrides, Document,
    GenerationClient, GenerationStyle, GenerationUpdate, ProtocolMessage, ReaderConfig, TagClient,
    TransportType,
};

/// Ereader - stream AI continuations into text files
#[derive(Parser, Debug)]
#[command(name = "ereader")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "EREADER_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short = 'l',
        long,
        env = "EREADER_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: String,

    /// Tag and status API base URL
    #[arg(long, value_name = "URL", global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a continuation at a position in a text file
    Generate(GenerateArgs),
    /// List the tag catalog
    Tags(TagsArgs),
    /// Show generator status
    Status {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct GenerateArgs {
    /// Text file to read (.txt, .md, .text)
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Click position as a character index (default: end of file)
    #[arg(short, long, conflicts_with = "line")]
    position: Option<usize>,

    /// Click position as a zero-based line
    #[arg(long)]
    line: Option<usize>,

    /// Column on `--line` (clamped to the line length)
    #[arg(long, requires = "line")]
    column: Option<usize>,

    /// Tags to steer generation, comma separated
    #[arg(short, long, value_delimiter = ',')]
    tags: Vec<String>,

    /// Generation style (continue, expand, variation)
    #[arg(short, long)]
    style: Option<GenerationStyle>,

    /// Maximum generated length
    #[arg(short, long)]
    max_length: Option<u32>,

    /// Characters of context before the click position
    #[arg(long)]
    context_chars: Option<usize>,

    /// Transport (stream, sse, socket, websocket, ws)
    #[arg(long, value_parser = parse_transport)]
    transport: Option<TransportType>,

    /// Generation endpoint URL
    #[arg(short, long, value_name = "URL")]
    endpoint: Option<String>,

    /// Write the document with the generated block inserted
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct TagsArgs {
    /// Case-insensitive substring filter
    #[arg(short, long, conflicts_with = "popular")]
    search: Option<String>,

    /// Show only the N most used tags
    #[arg(short, long, num_args = 0..=1, default_missing_value = "8")]
    popular: Option<usize>,

    /// Print raw JSON
    #[arg(long)]
    json: bool,
}

fn parse_transport(name: &str) -> Result<TransportType, String> {
    TransportType::parse(name).ok_or_else(|| format!("unknown transport: {name}"))
}

/// Initialize logging with the specified level
///
/// Logs go to stderr; stdout carries generated text.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("ereader={level},ereader_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Load the config file and layer command-line overrides on top
fn load_reader_config(path: Option<PathBuf>, overrides: &ConfigOverrides) -> Result<ReaderConfig> {
    let path = path.or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    if !overrides.is_empty() {
        overrides.apply(&mut config);
    }
    config.validate()?;

    info!(
        source = %config.source(),
        transport = ?config.transport.transport,
        endpoint = config.transport.endpoint.as_deref().unwrap_or("<unset>"),
        "Configuration loaded"
    );
    Ok(config)
}

fn generate_overrides(args: &GenerateArgs, api_url: Option<&str>) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(transport) = args.transport {
        overrides = overrides.with_transport(transport);
    }
    if let Some(ref endpoint) = args.endpoint {
        overrides = overrides.with_endpoint(endpoint.clone());
    }
    if let Some(url) = api_url {
        overrides = overrides.with_api_base_url(url.to_string());
    }
    if let Some(max_length) = args.max_length {
        overrides = overrides.with_max_length(max_length);
    }
    if let Some(style) = args.style {
        overrides = overrides.with_style(style);
    }
    if let Some(chars) = args.context_chars {
        overrides = overrides.with_context_chars(chars);
    }
    overrides
}

/// Character index the generation is anchored at
fn resolve_position(document: &Document, args: &GenerateArgs) -> Result<usize> {
    if let Some(position) = args.position {
        if position > document.char_len() {
            anyhow::bail!(
                "Position {position} is past the end of {} ({} characters)",
                document.name(),
                document.char_len()
            );
        }
        return Ok(position);
    }
    if let Some(line) = args.line {
        return document
            .index_of(line, args.column.unwrap_or(0))
            .with_context(|| format!("Line {line} does not exist in {}", document.name()));
    }
    Ok(document.char_len())
}

async fn write_output(document: &Document, path: &Path) -> Result<()> {
    tokio::fs::write(path, document.render())
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Document written");
    Ok(())
}

async fn run_generate(args: GenerateArgs, config_path: Option<PathBuf>, api_url: Option<&str>) -> Result<()> {
    let overrides = generate_overrides(&args, api_url);
    let config = load_reader_config(config_path, &overrides)?;

    let mut document = Document::load(&args.file, config.generation.max_file_size).await?;
    info!(
        name = document.name(),
        encoding = ?document.encoding(),
        chars = document.char_len(),
        "Document loaded"
    );

    let position = resolve_position(&document, &args)?;
    let context = document.click_context(position, config.generation.context_chars);
    if context.context_text.is_empty() {
        anyhow::bail!("No text before position {position} to continue from");
    }
    debug!(
        start = context.context_start,
        end = context.context_end,
        "Click context extracted"
    );

    let mut client = GenerationClient::from_config(&config.transport);
    let mut updates = client.subscribe();
    let request = config
        .generation
        .request(context.context_text.clone(), args.tags.iter().cloned());

    if !client.start(&request).await {
        let reason = match updates.try_recv() {
            Ok(GenerationUpdate::Error(message)) => message,
            _ => "generation could not be started".to_string(),
        };
        anyhow::bail!(reason);
    }

    let outcome = stream_updates(&mut client, &mut updates).await?;

    match outcome {
        AttemptOutcome::Completed(data) => {
            if !data.success {
                warn!("Generator reported an unsuccessful completion");
            }
            if !data.detected_tags.is_empty() {
                info!(tags = ?data.detected_tags, "Detected tags");
            }
            if let Some(ref path) = args.output {
                let content = client.content();
                document.insert_block(context.text_index, content, args.tags.clone());
                write_output(&document, path).await?;
            }
            Ok(())
        }
        AttemptOutcome::Failed { message, code, .. } => match code {
            Some(code) => anyhow::bail!("Generation failed ({code}): {message}"),
            None => anyhow::bail!("Generation failed: {message}"),
        },
        AttemptOutcome::Cancelled => anyhow::bail!("Generation cancelled"),
    }
}

/// Print streamed text until the attempt ends or the user interrupts
async fn stream_updates(
    client: &mut GenerationClient,
    updates: &mut tokio::sync::mpsc::UnboundedReceiver<GenerationUpdate>,
) -> Result<AttemptOutcome> {
    let mut stdout = tokio::io::stdout();
    let mut printed = false;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else {
                    anyhow::bail!("Generation client stopped unexpectedly");
                };
                match update {
                    GenerationUpdate::Message(ProtocolMessage::Stream { chunk }) => {
                        stdout.write_all(chunk.as_bytes()).await?;
                        stdout.flush().await?;
                        printed = true;
                    }
                    GenerationUpdate::Message(message) => {
                        if let Some(line) = message.progress_line() {
                            info!(progress = %line, "Generation progress");
                        }
                    }
                    GenerationUpdate::Connection(state) => debug!(state = %state, "Connection"),
                    GenerationUpdate::Error(message) => warn!(error = %message, "Generation error"),
                    GenerationUpdate::Finished(outcome) => break outcome,
                }
            }
            result = &mut ctrl_c => {
                result.context("Failed to listen for interrupt")?;
                info!("Interrupted, cancelling generation");
                client.cancel().await;
                break AttemptOutcome::Cancelled;
            }
        }
    };

    // Complete carries the authoritative text; print it if nothing streamed
    if !printed && outcome.is_success() {
        stdout.write_all(client.content().as_bytes()).await?;
    }
    if printed || outcome.is_success() {
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;
    Ok(outcome)
}

fn tag_client(config: &ReaderConfig) -> Result<TagClient> {
    let base_url = config
        .api_base_url
        .as_deref()
        .context("API base URL not configured (set [api].base_url, EREADER_API_URL or --api-url)")?;
    Ok(TagClient::new(base_url, config.api_timeout))
}

fn api_overrides(api_url: Option<&str>) -> ConfigOverrides {
    match api_url {
        Some(url) => ConfigOverrides::new().with_api_base_url(url.to_string()),
        None => ConfigOverrides::new(),
    }
}

async fn run_tags(args: TagsArgs, config_path: Option<PathBuf>, api_url: Option<&str>) -> Result<()> {
    let config = load_reader_config(config_path, &api_overrides(api_url))?;
    let catalog = tag_client(&config)?.fetch_tags().await?;

    if catalog.is_fallback() {
        eprintln!("note: the tag service returned fallback tags");
    }

    let selected = match (&args.search, args.popular) {
        (Some(query), _) => Some(catalog.search(query)),
        (None, Some(limit)) => Some(catalog.popular(limit)),
        (None, None) => None,
    };

    match selected {
        Some(tags) if args.json => println!("{}", serde_json::to_string_pretty(&tags)?),
        Some(tags) => {
            for tag in tags {
                println!("{:<24} {:>6}", tag.name, tag.usage_count);
            }
        }
        None if args.json => println!("{}", serde_json::to_string_pretty(catalog.tags())?),
        None => {
            for (category, tags) in catalog.grouped() {
                println!("{category}");
                for tag in tags {
                    println!("  {:<22} {:>6}", tag.name, tag.usage_count);
                }
            }
            println!("{} of {} tags", catalog.tags().len(), catalog.total_tags());
        }
    }
    Ok(())
}

async fn run_status(json: bool, config_path: Option<PathBuf>, api_url: Option<&str>) -> Result<()> {
    let config = load_reader_config(config_path, &api_overrides(api_url))?;
    let status = tag_client(&config)?.generator_status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!(
        "generator: {}",
        if status.is_active() { "active" } else { "inactive" }
    );
    println!("tagged snippets: {}", status.tagged_snippets);
    println!("tags: {}", status.total_tags);
    if !status.capabilities.is_empty() {
        println!("capabilities: {}", status.capabilities.join(", "));
    }
    if let Some(ref error) = status.error {
        println!("error: {error}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    debug!(version = env!("CARGO_PKG_VERSION"), "ereader starting");

    let api_url = args.api_url.as_deref();
    match args.command {
        Command::Generate(generate) => run_generate(generate, args.config, api_url).await,
        Command::Tags(tags) => run_tags(tags, args.config, api_url).await,
        Command::Status { json } => run_status(json, args.config, api_url).await,
    }
}

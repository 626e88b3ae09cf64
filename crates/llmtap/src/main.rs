//! llmtap command-line entry point.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

use llmtap::config::ProxyConfig;
use llmtap::{logging, server, viewer};

#[derive(Debug, Parser)]
#[command(name = "llmtap", version, about = "Capture proxy and trace viewer for LLM HTTP APIs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the capture proxy in front of an upstream provider.
    Proxy(ProxyArgs),
    /// Cook a capture log into a viewer bundle.
    Cook(CookArgs),
    /// Serve the viewer over a cooked bundle (auto-cooks .jsonl input).
    Viewer(ViewerArgs),
}

#[derive(Debug, Args)]
struct ProxyArgs {
    /// Upstream base URL (scheme + host, optional base path).
    #[arg(long)]
    target: String,

    /// Listen port (overrides the port of the configured listen address;
    /// default 8080).
    #[arg(long)]
    port: Option<u16>,

    /// Capture log path.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Optional TOML config file (default: llmtap.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CookArgs {
    /// Capture log to cook (.jsonl).
    input: PathBuf,

    /// Bundle output path (.json).
    #[arg(long, short = 'o')]
    output: PathBuf,

    /// Force the provider format instead of sniffing per record.
    #[arg(long, value_parser = ["openai", "claude", "gemini"])]
    format: Option<String>,
}

#[derive(Debug, Args)]
struct ViewerArgs {
    /// Cooked bundle (.json) or capture log (.jsonl) to serve.
    trace: PathBuf,

    /// Listen port.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Force the provider format when auto-cooking a .jsonl input.
    #[arg(long, value_parser = ["openai", "claude", "gemini"])]
    format: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Proxy(args) => run_proxy(args),
        Command::Cook(args) => run_cook(args),
        Command::Viewer(args) => run_viewer(args),
    }
}

fn run_proxy(args: ProxyArgs) -> anyhow::Result<()> {
    let mut config = ProxyConfig::load(args.config.as_deref())?;

    // CLI flags take precedence over TOML and env vars.
    config.upstream.url = Some(args.target);
    if let Some(port) = args.port {
        config.server.set_port(port);
    }
    if let Some(output) = args.output {
        config.capture.output = output;
    }

    logging::init(&config.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server::run(config))
}

fn run_cook(args: CookArgs) -> anyhow::Result<()> {
    logging::init("info");
    cook_to(&args.input, &args.output, args.format.as_deref())
}

fn run_viewer(args: ViewerArgs) -> anyhow::Result<()> {
    logging::init("info");

    // A raw capture log is cooked to a sibling .json bundle first.
    let trace = if args.trace.extension().is_some_and(|ext| ext == "jsonl") {
        let bundle_path = args.trace.with_extension("json");
        cook_to(&args.trace, &bundle_path, args.format.as_deref())?;
        bundle_path
    } else {
        args.trace
    };

    let listen_address = format!("127.0.0.1:{}", args.port);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(viewer::run(&trace, &listen_address))
}

/// Cook `input` into `output`, reporting skipped records on stderr.
/// Skips do not fail the run; only input/output io does.
fn cook_to(input: &Path, output: &Path, format: Option<&str>) -> anyhow::Result<()> {
    let cooked = llmtap_cook::cook::cook_file(input, format)
        .with_context(|| format!("cannot cook {}", input.display()))?;

    for skip in &cooked.skipped {
        eprintln!("skipped {}: {}", skip.record, skip.reason);
    }

    let json = serde_json::to_vec(&cooked.bundle)?;
    std::fs::write(output, json)
        .with_context(|| format!("cannot write bundle {}", output.display()))?;

    tracing::info!(
        requests = cooked.bundle.requests.len(),
        messages = cooked.bundle.messages.len(),
        tools = cooked.bundle.tools.len(),
        skipped = cooked.skipped.len(),
        output = %output.display(),
        "Cooked trace bundle"
    );
    Ok(())
}

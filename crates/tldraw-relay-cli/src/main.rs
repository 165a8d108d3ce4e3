use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use tldraw_relay_core::config::{Config, LoggingConfig};
use tldraw_relay_gateway::{GatewayState, RelayState};

#[derive(Parser)]
#[command(
    name = "tldraw-relay",
    about = "Relay drawing operations from tool calls to live tldraw canvases",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broadcast server
    Serve {
        /// Port to listen on (default: 3002)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Start the browser-facing relay proxy
    Proxy {
        /// Port to listen on (default: 3000)
        #[arg(long)]
        port: Option<u16>,

        /// Upstream event-stream URL
        #[arg(long)]
        upstream: Option<String>,
    },

    /// Invoke a tool on a running broadcast server
    Call {
        /// Tool name, e.g. createShape
        tool: String,

        /// Tool arguments as JSON (default: {})
        args: Option<String>,

        /// Base URL of the broadcast server
        #[arg(long)]
        server: Option<String>,
    },

    /// List the available tools and their parameter schemas
    Tools,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let default = LoggingConfig {
        format: "plain".into(),
        output: "stderr".into(),
        ..Default::default()
    };
    let logging = logging.unwrap_or(&default);

    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        logging
            .filters
            .iter()
            .filter_map(|d| d.parse::<Directive>().ok())
            .fold(EnvFilter::new(level), |filter, d| filter.add_directive(d))
    });

    let json = logging.format == "json";
    let fmt_layer = match (json, logging.output.as_str()) {
        (true, "stdout") => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .boxed(),
        (true, _) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        (false, "stdout") => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .boxed(),
        (false, _) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .ok();
}

/// Refuse to start on config errors; log warnings.
fn check_config(config: &Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("Config: {warning}");
    }
    if !errors.is_empty() {
        anyhow::bail!("Invalid configuration:\n  {}", errors.join("\n  "));
    }
    Ok(())
}

/// The snapshot endpoint that sits next to an upstream event-stream URL.
fn sibling_snapshot_url(upstream: &str) -> Option<String> {
    upstream
        .strip_suffix("/api/tldraw-events")
        .map(|base| format!("{base}/api/snapshot"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            let server = config.server.get_or_insert_with(Default::default);
            if let Some(port) = port {
                server.port = port;
            }
            if bind.is_some() {
                server.bind = bind;
            }
            check_config(&config)?;

            let addr = format!("{}:{}", config.server_bind(), config.server_port());
            tracing::info!("Starting tldraw-relay broadcast server on {addr}");
            let state = Arc::new(GatewayState::new(Arc::new(config)));
            tldraw_relay_gateway::start_broadcast_server(state, &addr).await?;
        }
        Commands::Proxy { port, upstream } => {
            let relay = config.relay.get_or_insert_with(Default::default);
            if let Some(port) = port {
                relay.port = port;
            }
            if let Some(upstream) = upstream {
                if relay.snapshot_url.is_none() {
                    relay.snapshot_url = sibling_snapshot_url(&upstream);
                }
                relay.upstream_url = Some(upstream);
            }
            check_config(&config)?;

            let addr = format!("{}:{}", config.relay_bind(), config.relay_port());
            tracing::info!("Starting tldraw-relay proxy on {addr}");
            let state = Arc::new(RelayState::new(&config)?);
            tldraw_relay_gateway::start_relay_proxy(state, &addr).await?;
        }
        Commands::Call { tool, args, server } => {
            let args: serde_json::Value = match args {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("Arguments are not valid JSON: {e}"))?,
                None => serde_json::json!({}),
            };
            let base = server.unwrap_or_else(|| format!("http://localhost:{}", config.server_port()));
            let url = format!("{}/api/tools/{tool}", base.trim_end_matches('/'));

            let resp = reqwest::Client::new().post(&url).json(&args).send().await?;
            let status = resp.status();
            let body: serde_json::Value = resp.json().await?;
            if !status.is_success() {
                anyhow::bail!(
                    "{tool} failed ({status}): {}",
                    body["error"].as_str().unwrap_or("unknown error")
                );
            }

            println!("{}", body["content"].as_str().unwrap_or_default());
            if let Some(snapshot) = body.get("snapshot") {
                println!("{}", serde_json::to_string_pretty(snapshot)?);
            }
            if body["is_error"].as_bool() == Some(true) {
                std::process::exit(1);
            }
        }
        Commands::Tools => {
            let mut registry = tldraw_relay_tools::ToolRegistry::new();
            tldraw_relay_tools::register_builtin_tools(&mut registry);
            println!("{}", serde_json::to_string_pretty(&registry.definitions())?);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", config_path.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if errors.is_empty() {
                    println!("Config OK: {}", config_path.display());
                } else {
                    anyhow::bail!("{} config error(s)", errors.len());
                }
            }
        },
    }

    Ok(())
}

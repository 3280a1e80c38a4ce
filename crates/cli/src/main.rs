use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use berth_api::{
    ContainerLookup, ContainerRef, ExecuteAction, InProcApi, LookupOptions, ParsedQuery, ResourceStore, SearchToken, StoreConfig,
    TracingReporter, ViewState,
};
use berth_api::parse_query;
use berth_core::{Container, EndpointId};
use berth_transport::FixtureTransport;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "berthctl", version, about = "Berth CLI over a fixture world")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Fixture world (JSON) served in place of a remote server
    #[arg(long = "fixture", env = "BERTH_FIXTURE", global = true, default_value = "demos/world.json")]
    fixture: String,

    /// Endpoint to select after setup (default: first available)
    #[arg(long = "endpoint", global = true)]
    endpoint: Option<EndpointId>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List endpoints and the current selection
    Endpoints,
    /// List containers of the selected endpoint, narrowed by a query
    Ls {
        /// Free text and typed filters, e.g. `web state:running stack:shop port:80`
        query: Vec<String>,
        /// Extra token in kind:value form (repeatable)
        #[arg(short = 't', long = "token")]
        tokens: Vec<String>,
    },
    /// Suggested search tokens for the current containers
    Suggest,
    /// Inspect one container
    Inspect { id: String },
    /// Print container logs
    Logs {
        id: String,
        /// Number of trailing lines
        #[arg(long = "lines")]
        lines: Option<u32>,
        /// Prefix lines with timestamps
        #[arg(long = "timestamps", action = ArgAction::SetTrue)]
        timestamps: bool,
    },
    /// Run a lifecycle action (start, stop, restart, pause, unpause, kill)
    Exec { action: String, id: String },
    /// Resolve entity keys (`id` or `id:name`) on the selected endpoint
    Resolve {
        keys: Vec<String>,
        #[arg(long = "by-name", action = ArgAction::SetTrue)]
        by_name: bool,
        #[arg(long = "offline", action = ArgAction::SetTrue)]
        offline: bool,
    },
    /// Containers whose name or id match text, best first
    Match { text: String },
}

fn init_tracing() {
    let env = std::env::var("BERTH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("BERTH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid BERTH_METRICS_ADDR; expected host:port");
        }
    }
}

fn render_age(created: Option<i64>) -> String {
    let Some(created) = created.filter(|ts| *ts > 0) else {
        return "-".to_string();
    };
    let mut secs = (chrono::Utc::now().timestamp() - created).max(0) as u64;
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;
    if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn print_containers(output: Output, containers: &[Container]) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<12} {:<20} {:<10} {:<20} AGE", "ID", "NAME", "STATE", "IMAGE");
            for c in containers {
                let state = c.state.map(|s| s.as_str()).unwrap_or("unknown");
                let name = c.display_name().unwrap_or("-");
                let image = c.image.as_deref().unwrap_or("-");
                println!("{:<12} {:<20} {:<10} {:<20} {}", short_id(&c.id), name, state, image, render_age(c.created));
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(containers)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let t0 = Instant::now();
    let transport = FixtureTransport::load(&cli.fixture)?;
    let store = ResourceStore::new(Arc::new(transport), Arc::new(TracingReporter), StoreConfig::from_env());
    store.setup().await.context("setup failed")?;
    if let Some(id) = cli.endpoint {
        if let Err(e) = store.select_endpoint(Some(id)).await {
            if !e.is_silent() {
                return Err(e).context("listing containers");
            }
        }
        if store.selected_endpoint() != Some(id) {
            warn!(endpoint = id, "unknown endpoint; nothing selected");
        }
    }
    info!(endpoint = ?store.selected_endpoint(), took_ms = %t0.elapsed().as_millis(), "berthctl: ready");
    let api = InProcApi::new(store);

    match cli.command {
        Commands::Endpoints => {
            let snap = api.store().snapshot();
            let endpoints = snap.endpoints.unwrapped_value().cloned().unwrap_or_default();
            match cli.output {
                Output::Human => {
                    println!("   {:<6} {:<20} STATUS", "ID", "NAME");
                    for e in &endpoints {
                        let marker = if snap.selected_endpoint == Some(e.id) { "*" } else { " " };
                        println!("{}  {:<6} {:<20} {:?}", marker, e.id, e.display_name(), e.status);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&endpoints)?),
            }
        }
        Commands::Ls { query, tokens } => {
            let mut parsed = ParsedQuery::default();
            for t in &tokens {
                parsed.tokens.push(SearchToken::from_str(t).map_err(|e| anyhow!(e))?);
            }
            let more = parse_query(&query.join(" "));
            parsed.tokens.extend(more.tokens);
            parsed.text = more.text;
            if let ViewState::Failure { error, .. } = api.store().containers() {
                warn!(error = %error, "showing stale containers");
            }
            let found = api.search_with(&parsed.text, &parsed.tokens);
            info!(matched = found.len(), tokens = parsed.tokens.len(), "ls ok");
            print_containers(cli.output, &found)?;
        }
        Commands::Suggest => {
            let tokens = api.suggested_tokens(&[]);
            match cli.output {
                Output::Human => {
                    for t in &tokens {
                        println!("{:<24} {}", t.to_string(), t.title());
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&tokens)?),
            }
        }
        Commands::Inspect { id } => {
            let fetcher = api.detail_fetcher();
            fetcher.load(ContainerRef::new(id.clone(), None)).await.with_context(|| format!("inspect {}", id))?;
            let details = fetcher.details().ok_or_else(|| anyhow!("no details for {}", id))?;
            match cli.output {
                Output::Human => {
                    let container = fetcher.container();
                    println!("ID:      {}", details.id);
                    println!("Name:    {}", details.name.as_deref().unwrap_or("-").trim_start_matches('/'));
                    println!("Image:   {}", details.image.as_deref().unwrap_or("-"));
                    println!("State:   {}", details.state.status.map(|s| s.as_str()).unwrap_or("unknown"));
                    println!("Stack:   {}", details.stack().unwrap_or("-"));
                    println!("Age:     {}", render_age(container.and_then(|c| c.created)));
                    for m in &details.mounts {
                        println!("Mount:   {} -> {}", m.source.as_deref().unwrap_or("-"), m.target.as_deref().unwrap_or("-"));
                    }
                    for e in &details.env {
                        println!("Env:     {}", e);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&details)?),
            }
        }
        Commands::Logs { id, lines, timestamps } => {
            let fetcher = api.log_fetcher();
            if let Some(n) = lines {
                let _ = fetcher.set_line_count(n);
            }
            let _ = fetcher.set_include_timestamps(timestamps);
            fetcher.load(ContainerRef::new(id.clone(), None)).await.with_context(|| format!("logs {}", id))?;
            let text = fetcher.state().view.into_value().unwrap_or_default();
            match cli.output {
                Output::Human => println!("{}", text.as_str()),
                Output::Json => println!("{}", serde_json::to_string_pretty(&text.lines().collect::<Vec<_>>())?),
            }
        }
        Commands::Exec { action, id } => {
            let action = ExecuteAction::from_str(&action).map_err(|e| anyhow!(e))?;
            let refresh = api.store().execute(action, &id).await.with_context(|| format!("{} {}", action, id))?;
            if let Err(e) = refresh.await {
                if !e.is_silent() {
                    warn!(error = %e, "refresh after action failed");
                }
            }
            let after = api.store().cached_container(&id);
            match cli.output {
                Output::Human => {
                    let state = after.as_ref().and_then(|c| c.state).map(|s| s.as_str()).unwrap_or("unknown");
                    println!("{} {}: {}", action, id, state);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&after)?),
            }
        }
        Commands::Resolve { keys, by_name, offline } => {
            let endpoint = api.store().resolve_endpoint(None)?;
            let opts = LookupOptions { resolve_by_name: by_name, resolve_offline: offline };
            let entities = api.resolve(endpoint, &keys, opts).await?;
            match cli.output {
                Output::Human => {
                    for e in &entities {
                        println!("{:<40} {}", e.key(), e);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&entities)?),
            }
        }
        Commands::Match { text } => {
            let endpoint = api.store().resolve_endpoint(None)?;
            let entities = api.matching(endpoint, &text).await;
            match cli.output {
                Output::Human => {
                    for e in &entities {
                        println!("{:<40} {}", e.key(), e);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&entities)?),
            }
        }
    }
    Ok(())
}

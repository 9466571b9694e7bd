use base64::Engine;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

mod agent;
mod gemini;
mod models;
mod server;
mod session;
mod settings;
mod state;

use gemini::GeminiClient;
use models::ApiConfig;
use session::InlineImage;
use settings::Settings;
use state::{AppState, Backends, ScriptPolicy};

#[derive(Debug, Parser)]
#[command(name = "turnstream")]
#[command(about = "Streaming chat-turn service with model-driven interface tools", long_about = None)]
struct Cli {
    /// JSON settings file; missing fields use defaults
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = ScriptPolicy::Forward)]
    scripts: ScriptPolicy,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Start {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        #[arg(long)]
        metrics_listen: Option<String>,
    },
    /// Run one turn in-process and print the resulting conversation as JSON
    Ask {
        text: String,
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long, default_value = "image/png")]
        mime: String,
    },
}

fn build_state(cli: &Cli) -> anyhow::Result<AppState> {
    let settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let client = Arc::new(GeminiClient::new(ApiConfig::from_env()?));
    let backends = Backends { chats: client.clone(), media: client.clone(), speech: client };
    Ok(AppState::new(backends, settings, cli.scripts))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let state = build_state(&cli)?;
    state.initialize_session().await;
    match cli.command {
        Commands::Start { listen, metrics_listen } => {
            if let Some(metrics_addr) = metrics_listen {
                let metrics_addr: SocketAddr = metrics_addr.parse()?;
                metrics_exporter_prometheus::PrometheusBuilder::new()
                    .with_http_listener(metrics_addr)
                    .install()?;
            }
            let addr: SocketAddr = listen.parse()?;
            server::serve(addr, state).await?;
        }
        Commands::Ask { text, image, mime } => {
            let image = match image {
                Some(path) => {
                    let bytes = tokio::fs::read(&path).await?;
                    Some(InlineImage { mime_type: mime, data: base64::engine::general_purpose::STANDARD.encode(bytes) })
                }
                None => None,
            };
            let report = state.send(text, image).await?;
            tracing::info!(phase = ?report.phase, chunks = report.chunks, "turn finished");
            let conv = state.conversation.read().await;
            println!("{}", serde_json::to_string_pretty(&conv.turns)?);
        }
    }
    Ok(())
}

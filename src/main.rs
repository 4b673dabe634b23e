use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use iris_client::config::load_config;
use iris_client::{ApiClient, ApiError, HttpMethod, HttpRequest, SessionEvent};
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line access to the Iris CRM API
#[derive(Debug, Parser)]
#[command(name = "iris-client", version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "IRIS_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and store the token pair
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "IRIS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored tokens
    Logout,
    /// Report whether an access token is stored
    Status,
    /// Send one authenticated request and print the response body
    Request {
        /// GET, POST, PUT, PATCH or DELETE
        method: HttpMethod,
        /// Path relative to the base URL, e.g. /api/clients
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    // Initialize the tracing subscriber for structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "iris_client=debug,warn".into()
            } else {
                "iris_client=info,warn".into()
            }
        }))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();

    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;
    let client = ApiClient::from_config(config).await?;

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                SessionEvent::SessionExpired {
                    reason,
                    redirect_to,
                    ..
                } => warn!(%reason, %redirect_to, "Session expired, sign in again"),
                other => debug!(event = other.event_type(), "Session event"),
            }
        }
    });

    match cli.command {
        Command::Login { email, password } => {
            client.login(&email, &password).await?;
            println!("Signed in as {}", email);
        }
        Command::Logout => {
            client.logout().await?;
            println!("Signed out");
        }
        Command::Status => {
            if client.is_authenticated().await? {
                println!("Signed in");
            } else {
                println!("Signed out");
            }
        }
        Command::Request { method, path, data } => {
            let mut request = HttpRequest::new(method, path);
            if let Some(data) = data {
                let body: serde_json::Value = serde_json::from_str(&data)
                    .map_err(|e| anyhow!("--data is not valid JSON: {}", e))?;
                request = request.with_json(&body)?;
            }

            match client.execute(request).await {
                Ok(response) => println!("{}", response.text()),
                Err(err) => {
                    if let Some(response) = err.response() {
                        eprintln!("{}", response.body());
                    }
                    return Err(describe(err));
                }
            }
        }
    }

    Ok(())
}

fn describe(err: ApiError) -> anyhow::Error {
    let category = err.category();
    anyhow!(err).context(format!("{} error", category))
}

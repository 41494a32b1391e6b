use anyhow::Result;
use clap::{Parser, Subcommand};
use gatekeeper::config::Config;
use gatekeeper::server::Server;
use gatekeeper::{CheckRequest, Context, RateLimiter};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about = "Distributed fixed-window rate limiter")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Record one attempt against the configured store and print the decision
    Check {
        scope: String,
        identity: String,
        /// Defaults to DEFAULT_MAX_ATTEMPTS
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Defaults to DEFAULT_WINDOW_MS
        #[arg(long)]
        window_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("gatekeeper={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Check {
            scope,
            identity,
            max_attempts,
            window_ms,
        } => {
            let policy = config.default_policy();
            let request = CheckRequest::new(
                scope,
                identity,
                max_attempts.unwrap_or(policy.max_attempts),
                window_ms.map(Duration::from_millis).unwrap_or(policy.window),
            );
            check_once(config, request).await
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("Starting gatekeeper service");
    tracing::info!(
        "Configuration: bind_addr={}, store={:?}",
        config.bind_addr,
        config.store_config()
    );

    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

async fn check_once(config: Config, request: CheckRequest) -> Result<()> {
    let limiter = RateLimiter::connect(&config.store_config(), config.limiter_options()).await?;
    let result = limiter.check(&Context::background(), &request).await?;

    let output = serde_json::json!({
        "scope": request.scope,
        "identity": request.identity,
        "blocked": result.blocked,
        "attempts_remaining": result.attempts_remaining,
        "attempts_used": result.attempts_used,
        "retry_after_ms": result.retry_after.as_millis() as u64,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if result.blocked {
        std::process::exit(2);
    }
    Ok(())
}

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use polymarket_cycle_bot::{
    monitoring,
    supervisor,
    types::{AppConfig, TradingMode},
};

fn redact_host(url: &str) -> String {
    url.split('@')
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("?")
        .to_string()
}

#[derive(Parser, Debug)]
#[command(name = "polymarket-cycle-bot")]
#[command(about = "Polymarket 15m up/down two-leg cycle bot", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.toml")]
    config: String,

    /// Override execution mode (simulated/live)
    #[arg(long)]
    mode: Option<TradingMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the trading bot
    Run {},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "polymarket_cycle_bot=debug,bot=debug,info");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(target: "bot", "polymarket-cycle-bot starting");

    let cli = Cli::parse();
    tracing::debug!(target: "bot", config = %cli.config, "loading config");

    let mut settings = AppConfig::from_file(&cli.config)?;
    tracing::info!(
        target: "bot",
        config = %cli.config,
        coin = %settings.market.coin,
        ws_url = %settings.api.ws_url,
        postgres_host = redact_host(&settings.postgres.url),
        mode = settings.execution.mode.as_str(),
        "config loaded"
    );

    if let Some(mode) = cli.mode {
        settings.execution.mode = mode;
    }

    match cli.command.unwrap_or(Commands::Run {}) {
        Commands::Run {} => {
            monitoring::logger::log_startup(&settings);
            supervisor::run_bot(settings).await?;
        }
    }

    Ok(())
}

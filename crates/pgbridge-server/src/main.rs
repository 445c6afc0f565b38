mod admin;
mod auth;
mod cancel;
mod config;
mod server;
mod session;
mod tls;

#[cfg(test)]
mod tests;

use clap::Parser;
use config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pgbridge", about = "PostgreSQL wire-protocol gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "pgbridge.example.toml")]
    config: String,
    /// Overrides `server.listen_addr`.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_path(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
        config.validate()?;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    server::run(config).await?;
    Ok(())
}

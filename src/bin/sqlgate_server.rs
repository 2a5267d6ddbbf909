//!
//! sqlgate server binary
//! ---------------------
//! Command-line entry point for the SQL gateway HTTP server. Configuration comes from CLI
//! flags and environment variables; see `--help`.

use anyhow::Result;
use std::env;

use sqlgate::config::{wants_help, GatewayConfig, USAGE};

#[tokio::main]
async fn main() -> Result<()> {
    println!(r"                 __            __
   _________ _/ /___ _____ _/ /____
  / ___/ __ `/ / __ `/ __ `/ __/ _ \
 (__  ) /_/ / / /_/ / /_/ / /_/  __/
/____/\__, /_/\__, /\__,_/\__/\___/
        /_/  /____/");

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let args: Vec<String> = env::args().collect();
    if wants_help(&args) {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = GatewayConfig::from_env_and_args(&args)?;
    println!(
        "sqlgate starting: http={}, max_rows={}, legacy_query={}",
        config.http_port, config.max_rows, config.legacy_query
    );
    tracing::info!("Using port: http={}", config.http_port);
    sqlgate::server::run(config).await
}

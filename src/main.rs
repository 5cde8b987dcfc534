// src/main.rs

//! The main entry point for the sentryhive alert management node.

use anyhow::Result;
use sentryhive::config::Config;
use sentryhive::server;
use std::env;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("sentryhive version {VERSION}");
        return Ok(());
    }

    let config_path = flag_value(&args, "--config.file").unwrap_or("config.toml");
    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    if let Some(path) = flag_value(&args, "--storage.path") {
        config.storage.path = path.into();
    }
    if let Some(retention) = flag_value(&args, "--data.retention") {
        config.data.retention = humantime::parse_duration(retention)
            .map_err(|e| anyhow::anyhow!("invalid --data.retention: {e}"))?;
    }
    if let Some(interval) = flag_value(&args, "--alerts.gc-interval") {
        config.alerts.gc_interval = humantime::parse_duration(interval)
            .map_err(|e| anyhow::anyhow!("invalid --alerts.gc-interval: {e}"))?;
    }
    if let Some(addr) = flag_value(&args, "--cluster.listen-address") {
        config.cluster.listen_address = addr.parse().map_err(|e| anyhow::anyhow!("invalid --cluster.listen-address: {e}"))?;
    }
    for peer in flag_values(&args, "--cluster.peer") {
        config.cluster.peers.push(peer.parse().map_err(|e| anyhow::anyhow!("invalid --cluster.peer '{peer}': {e}"))?);
    }
    if let Some(addr) = flag_value(&args, "--web.listen-address") {
        config.web.listen_address = addr.parse().map_err(|e| anyhow::anyhow!("invalid --web.listen-address: {e}"))?;
    }
    if let Some(level) = flag_value(&args, "--log.level") {
        config.log_level = level.to_string();
    }

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    let reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config, reload_handle).await {
        error!("server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).map(String::as_str)
}

fn flag_values<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
    args.iter()
        .enumerate()
        .filter(|(_, a)| *a == flag)
        .filter_map(|(i, _)| args.get(i + 1).map(String::as_str))
        .collect()
}

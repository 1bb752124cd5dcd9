//! `taskboard-hub` -- authoritative store and change fan-out for task boards.
//!
//! An axum WebSocket server that owns the task and comment tables, enforces
//! project membership on writes, and pushes every committed change to the
//! clients watching that project.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin taskboard-hub
//!
//! # Run on custom address with projects from a file
//! cargo run --bin taskboard-hub -- --bind 127.0.0.1:8080 --config hub.toml
//! ```

use std::sync::Arc;

use clap::Parser;
use taskboard_hub::config::{HubCliArgs, HubConfig};
use taskboard_hub::hub::{self, HubState};

#[tokio::main]
async fn main() {
    let cli = HubCliArgs::parse();

    let config = match HubConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let tables = match config.tables() {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "invalid project configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        addr = %config.bind_addr,
        projects = config.projects.len(),
        tasks = tables.task_count(),
        "starting board hub"
    );

    let state = Arc::new(HubState::new(tables, config.max_frame_size));

    match hub::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, mut handle)) => {
            tracing::info!(addr = %bound_addr, "board hub listening");
            tokio::select! {
                result = &mut handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "hub server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    state.close_all_connections().await;
                    handle.abort();
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start board hub");
            std::process::exit(1);
        }
    }
}

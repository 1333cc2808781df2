#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for metalert polygon search.

use metalert_config::Config;
use metalert_server::{AppState, run_server};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Loading configuration...");
    let config = Config::load().map_err(std::io::Error::other)?;

    log::info!("Opening index at {}", config.index_file().display());
    let state = AppState::open(config).map_err(std::io::Error::other)?;

    run_server(state).await
}

/*****************************************************************************************
 *
 *  snapkv – Minimal Key–Value Store with an HTTP/JSON Interface
 *  ------------------------------------------------------------
 *
 *  Values carry a version counter and a write timestamp; the whole
 *  store is persisted to disk as a single JSON snapshot on every
 *  accepted mutation.
 *
 *****************************************************************************************/

mod app;
mod config;
mod errors;
mod routes;
mod state;

use std::sync::Arc;

use axum::serve;
use clap::Parser;
use tokio::net::TcpListener;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::state::kv::{SharedStore, Store};

#[tokio::main]
async fn main() {
    let cfg = Config::parse();

    //
    // ────────────────────────────────────────────────────────
    //  Configure logging
    // ────────────────────────────────────────────────────────
    //
    let level = match cfg.log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    tracing::info!("Starting snapkv with {:?}", cfg);

    //
    // ────────────────────────────────────────────────────────
    //  Create the store and load the snapshot
    // ────────────────────────────────────────────────────────
    //
    let store: SharedStore = Arc::new(Store::new(&cfg.store_file));

    // A missing snapshot means a fresh store; a snapshot that exists
    // but can't be decoded means we must not serve at all.
    if let Err(e) = store.load() {
        tracing::error!("cannot load snapshot: {e}");
        std::process::exit(1);
    }
    store.init_metrics();

    //
    // ────────────────────────────────────────────────────────
    //  Build the app, bind, and serve
    // ────────────────────────────────────────────────────────
    //
    let app = app::build_app(store.clone());

    let listener = TcpListener::bind(cfg.addr.as_str())
        .await
        .expect("Failed to bind address");

    tracing::info!("Listening on http://{}", cfg.addr);

    serve(listener, app)
        .with_graceful_shutdown(shutdown(store.clone()))
        .await
        .expect("Server error");
}

//
// ─────────────────────────────────────────────────────────────
//  Graceful shutdown handler
// ─────────────────────────────────────────────────────────────
//
async fn shutdown(store: SharedStore) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");

    tracing::warn!("CTRL+C received, saving snapshot");
    match store.persist() {
        Ok(()) => tracing::info!("Snapshot saved. Goodbye."),
        Err(e) => tracing::error!("final snapshot save failed: {e}"),
    }
}

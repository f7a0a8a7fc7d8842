//! Demo binary for the Junction routing engine: loads a declarative TOML
//! config, compiles it into an [`Engine`], and either validates it
//! (`--check`) or serves it over a minimal monoio HTTP/1.1 listener.
//!
//! Real embedding hosts own their own accept loop and HTTP codec; this
//! binary's `serve` path is a reference bridge, not a production server
//! (spec.md §1 "embedding HTTP server's connection management is out of
//! scope" — see SPEC_FULL.md).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use junction_core::config::ConfigDocument;
use junction_router::handlers::{proxy::ProxyHandler, HandlerRegistry};
use junction_router::Engine;
use tracing::{info, warn};

mod bridge;
mod handlers;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Junction: an embeddable HTTP routing engine", long_about = None)]
struct Args {
    /// Path of the TOML config file.
    #[clap(short, long, value_parser)]
    config: String,

    /// Validate the config and exit without starting the listener.
    #[clap(long)]
    check: bool,

    /// Address to listen on when serving.
    #[clap(long, default_value = "0.0.0.0:8080")]
    listen: String,
}

fn build_engine(doc: &ConfigDocument) -> Result<Engine> {
    let mut registry = HandlerRegistry::new();
    registry.register("healthcheck", Arc::new(handlers::Healthcheck));
    registry.register("proxy", Arc::new(ProxyHandler::default()));

    Engine::new(&doc.host_conf, &doc.env_conf.env, registry).context("compiling route configuration")
}

#[monoio::main(timer_enabled = true)]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let doc = ConfigDocument::from_path(&args.config)
        .with_context(|| format!("loading config from {:?}", args.config))?;

    let engine = build_engine(&doc)?;

    if args.check {
        info!("config at {:?} is valid", args.config);
        return Ok(());
    }

    let addr: SocketAddr = args.listen.parse().context("parsing --listen address")?;
    let listener = monoio::net::TcpListener::bind(addr).with_context(|| format!("binding {addr}"))?;
    info!("junction listening on {addr}");

    let engine = Arc::new(engine);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let engine = engine.clone();
        monoio::spawn(async move {
            if let Err(e) = bridge::serve_connection(stream, peer, engine).await {
                warn!("connection {peer} ended with error: {e}");
            }
        });
    }
}

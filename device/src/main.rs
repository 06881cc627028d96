//! ==============================================================================
//! main.rs - device node entry point
//! ==============================================================================
//!
//! purpose:
//!     starts one device of the sensor mesh.
//!
//! responsibilities:
//!     - read device.toml and apply command line overrides
//!     - set up tracing
//!     - build the node (store, listeners, seeded membership, secure client)
//!     - run both overlay listeners and the exchange task until killed
//!
//! relationships:
//!     - uses: config.rs (NodeConfig, Cli)
//!     - uses: node.rs (Node::new, Node::run)
//!     - reads: <dir>/bundled.key, <dir>/bundled.crt, <dir>/ca.crt
//!     - writes: <dir>/data.json
//!
//! ==============================================================================

use anyhow::Result;
use clap::Parser;
use mesh_device::{Cli, Node, NodeConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // step 1: load configuration (logged through a temporary subscriber,
    // the real one needs the configured level)
    let startup = tracing_subscriber::fmt().with_target(false).finish();
    let mut config = tracing::subscriber::with_default(startup, || {
        NodeConfig::load_or_default(cli.config.as_deref())
    });
    config.apply_cli(&cli);

    // step 2: logging
    init_tracing(&config, cli.verbose);
    tracing::info!("mesh-device v{} starting", env!("CARGO_PKG_VERSION"));
    config.print_summary();

    // step 3: build the node
    let node = Node::new(config);

    // step 4: serve forever
    node.run().await;
    Ok(())
}

fn init_tracing(config: &NodeConfig, verbosity: u8) {
    let (filter, rejected) = match std::env::var("RUST_LOG") {
        Ok(_) => (EnvFilter::from_default_env(), None),
        Err(_) => config.logging.env_filter(verbosity),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(e) = rejected {
        tracing::warn!(level = %config.logging.level, error = %e, "invalid log level, using info");
    }
}

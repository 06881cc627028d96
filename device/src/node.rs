//! ==============================================================================
//! node.rs - the device node and its lifecycle
//! ==============================================================================
//!
//! purpose:
//!     owns everything that lives for the whole process:
//!     - the aggregation store (shared by both handlers)
//!     - the internal and external overlay servers
//!     - the secure client for the exchange task (None when credentials
//!       failed to load: the node still serves, it just cannot push)
//!
//! lifecycle:
//!
//! ```text
//!     ┌──────────────────────────────────────────────────────┐
//!     │                    Node::run                          │
//!     │  ┌──────────────┐ ┌──────────────┐ ┌───────────────┐  │
//!     │  │ external     │ │ internal     │ │ exchange      │  │
//!     │  │ serve()      │ │ serve()      │ │ start()       │  │
//!     │  └──────────────┘ └──────────────┘ └───────────────┘  │
//!     │          waits until all three have finished          │
//!     └──────────────────────────────────────────────────────┘
//!
//!     none of the tasks is expected to finish. there is no shutdown
//!     signal; the process runs until it is killed.
//! ```
//!
//! ==============================================================================

use crate::bridge::{ExternalHandler, InternalHandler};
use crate::config::NodeConfig;
use crate::error::NodeResult;
use crate::exchange::{DisabledExchange, ExchangeTask, PushExchange};
use crate::overlay::{gen_token, OverlayServer};
use crate::persist::SnapshotWriter;
use crate::store::AggregationStore;
use crate::tls;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinSet;

pub type NodeTask = Pin<Box<dyn Future<Output = NodeResult<()>> + Send + 'static>>;

pub struct Node {
    config: NodeConfig,
    store: Arc<AggregationStore>,
    internal: OverlayServer,
    external: OverlayServer,
    client: Option<reqwest::Client>,
}

impl Node {
    /// build the node: store, both listeners, seeded membership, client
    pub fn new(config: NodeConfig) -> Self {
        let self_name = config.self_name().to_string();
        let store = Arc::new(AggregationStore::new(
            self_name,
            SnapshotWriter::new(config.snapshot_path()),
        ));

        let tls_paths = config.tls_paths();
        let internal = OverlayServer::new(
            config.internal.host.clone(),
            config.internal.port,
            tls_paths.clone(),
            Arc::new(InternalHandler::new(store.clone())),
        );
        let external = OverlayServer::new(
            config.external.host.clone(),
            config.external.port,
            tls_paths.clone(),
            Arc::new(
                ExternalHandler::new(store.clone())
                    .with_sender_verification(config.security.verify_sender_name),
            ),
        );

        let index = &config.bootstrap.index_host;
        external.membership().add(gen_token(index), index.clone());
        tracing::info!(index = %index, "seeded external membership");

        let client = match tls::build_secure_client(&tls_paths, config.client_timeout()) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::error!(error = %e, "secure client unavailable, running degraded");
                None
            }
        };

        Self {
            config,
            store,
            internal,
            external,
            client,
        }
    }

    pub fn store(&self) -> Arc<AggregationStore> {
        self.store.clone()
    }

    pub fn internal(&self) -> &OverlayServer {
        &self.internal
    }

    pub fn external(&self) -> &OverlayServer {
        &self.external
    }

    pub fn has_secure_client(&self) -> bool {
        self.client.is_some()
    }

    /// the exchange task the config asks for
    pub fn default_exchange(&self) -> Box<dyn ExchangeTask> {
        if !self.config.exchange.enabled {
            return Box::new(DisabledExchange);
        }
        Box::new(PushExchange::new(
            self.client.clone(),
            self.store.clone(),
            self.external.membership(),
            self.config.external.port,
            self.config.exchange_interval(),
        ))
    }

    /// run both listeners and the default exchange task
    pub async fn run(self) {
        let exchange = self.default_exchange();
        self.run_with(exchange).await
    }

    pub async fn run_with(self, exchange: Box<dyn ExchangeTask>) {
        let Node { internal, external, .. } = self;

        run_all(vec![
            ("external", Box::pin(external.serve()) as NodeTask),
            ("internal", Box::pin(internal.serve()) as NodeTask),
            (
                "exchange",
                Box::pin(async move {
                    exchange.start().await;
                    Ok(())
                }) as NodeTask,
            ),
        ])
        .await;
    }
}

/// spawn every task and wait until all of them have finished
///
/// a task ending (or failing) does not stop the others.
pub async fn run_all(tasks: Vec<(&'static str, NodeTask)>) {
    let mut set = JoinSet::new();
    for (name, task) in tasks {
        tracing::info!(task = name, "starting");
        set.spawn(async move { (name, task.await) });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, Ok(()))) => tracing::warn!(task = name, "task finished"),
            Ok((name, Err(e))) => tracing::error!(task = name, error = %e, "task failed"),
            Err(e) => tracing::error!(error = %e, "task panicked"),
        }
    }
    tracing::info!("all tasks finished");
}

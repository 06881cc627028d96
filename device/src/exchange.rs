//! ==============================================================================
//! exchange.rs - background exchange with other device nodes
//! ==============================================================================
//!
//! purpose:
//!     the third long-running task of the node. the orchestrator only knows
//!     it through ExchangeTask::start, which runs until the process exits.
//!
//! ```text
//!     PushExchange is a placeholder default. the exchange protocol between
//!     device nodes is not defined; this one follows the hub/spoke push of
//!     the sensor hub cluster mode, where a spoke posts its readings to the
//!     hub on a timer. every interval it pushes this device's own record to
//!     each host in the external membership table, using the mutually
//!     authenticated client from tls.rs. the remote external handler stores
//!     it as store[our name]. a real protocol replaces it by implementing
//!     ExchangeTask and passing it to Node::run_with.
//! ```
//!
//! failure model:
//!     - no secure client (credentials failed at startup): log, return
//!     - a peer push fails: log, move on to the next peer, no retry
//!
//! ==============================================================================

use crate::domain::MessageRequest;
use crate::overlay::MembershipTable;
use crate::store::AggregationStore;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// a long-running exchange loop
pub trait ExchangeTask: Send + 'static {
    fn start(self: Box<Self>) -> TaskFuture;
}

pub struct PushExchange {
    self_name: String,
    client: Option<reqwest::Client>,
    store: Arc<AggregationStore>,
    membership: Arc<MembershipTable>,
    port: u16,
    interval: Duration,
    scheme: &'static str,
}

impl PushExchange {
    pub fn new(
        client: Option<reqwest::Client>,
        store: Arc<AggregationStore>,
        membership: Arc<MembershipTable>,
        port: u16,
        interval: Duration,
    ) -> Self {
        Self {
            self_name: store.self_name().to_string(),
            client,
            store,
            membership,
            port,
            interval,
            scheme: "https",
        }
    }

    /// talk plain http to peers (local testing only)
    pub fn with_scheme(mut self, scheme: &'static str) -> Self {
        self.scheme = scheme;
        self
    }

    fn peer_url(&self, host: &str) -> String {
        format!("{}://{}:{}/message", self.scheme, host, self.port)
    }

    /// push our record to every known peer once; returns how many accepted it
    pub async fn push_round(&self) -> usize {
        let Some(client) = &self.client else {
            return 0;
        };

        let store = self.store.clone();
        let record = match tokio::task::spawn_blocking(move || store.own_record()).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "failed to read own record");
                return 0;
            }
        };
        let payload = match serde_json::to_string(&record) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode own record");
                return 0;
            }
        };
        let req = MessageRequest::new(self.self_name.clone(), payload);

        let mut delivered = 0;
        for host in self.membership.hosts() {
            if host == self.self_name {
                continue;
            }
            let url = self.peer_url(&host);
            let result = client
                .post(&url)
                .json(&req)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            match result {
                Ok(_) => {
                    tracing::debug!(peer = %host, "pushed device record");
                    delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(peer = %host, error = %e, "push failed");
                }
            }
        }
        delivered
    }

    async fn run(self) {
        if self.client.is_none() {
            tracing::error!("secure client unavailable, exchange task not started");
            return;
        }

        tracing::info!(interval = ?self.interval, "exchange task running");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let delivered = self.push_round().await;
            tracing::debug!(delivered, peers = self.membership.len(), "exchange round done");
        }
    }
}

impl ExchangeTask for PushExchange {
    fn start(self: Box<Self>) -> TaskFuture {
        Box::pin(self.run())
    }
}

/// stands in for the exchange task when it is switched off in config
pub struct DisabledExchange;

impl ExchangeTask for DisabledExchange {
    fn start(self: Box<Self>) -> TaskFuture {
        Box::pin(async {
            tracing::info!("exchange task disabled");
        })
    }
}

//! ==============================================================================
//! overlay.rs - one overlay listener (https + mutual tls) and its membership
//! ==============================================================================
//!
//! purpose:
//!     a node runs two of these: "internal" (sensor peers) and "external"
//!     (device peers + bootstrap index). each one owns:
//!     - a bind address and the node's tls material
//!     - a MessageHandler from bridge.rs
//!     - a membership table mapping token -> host
//!
//! routes:
//!     POST /message     MessageRequest json -> handler, always 202
//!     GET  /membership  [{token, host}, ...]
//!     GET  /health      "ok"
//!
//! tokens:
//!     gen_token(host) = hex(sha256(host)). deterministic, so every node
//!     derives the same key for the same host.
//!
//! ==============================================================================

use crate::bridge::{self, MessageHandler};
use crate::domain::MessageRequest;
use crate::error::{NodeError, NodeResult};
use crate::tls::{self, TlsPaths};

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tower_http::trace::TraceLayer;

/// routing token for a host
pub fn gen_token(host: &str) -> String {
    hex::encode(Sha256::digest(host.as_bytes()))
}

// ==============================================================================
// membership table
// ==============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Member {
    pub token: String,
    pub host: String,
}

/// token -> host, shared between the listener and the exchange task
#[derive(Debug, Default)]
pub struct MembershipTable {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert or replace the host for `token`
    pub fn add(&self, token: impl Into<String>, host: impl Into<String>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), host.into());
    }

    pub fn remove(&self, token: &str) -> Option<String> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
    }

    pub fn get(&self, token: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
    }

    /// every known host, ordered by token
    pub fn hosts(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> Vec<Member> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(token, host)| Member {
                token: token.clone(),
                host: host.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ==============================================================================
// server
// ==============================================================================

#[derive(Clone)]
struct OverlayState {
    handler: Arc<dyn MessageHandler>,
    membership: Arc<MembershipTable>,
}

pub struct OverlayServer {
    host: String,
    port: u16,
    tls: TlsPaths,
    handler: Arc<dyn MessageHandler>,
    membership: Arc<MembershipTable>,
}

impl OverlayServer {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        tls: TlsPaths,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
            handler,
            membership: Arc::new(MembershipTable::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.handler.overlay()
    }

    pub fn bind_host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn membership(&self) -> Arc<MembershipTable> {
        self.membership.clone()
    }

    /// the overlay's http surface, without tls
    pub fn router(&self) -> Router {
        Router::new()
            .route("/message", post(message_handler))
            .route("/membership", get(membership_handler))
            .route("/health", get(|| async { "ok" }))
            .layer(TraceLayer::new_for_http())
            .with_state(OverlayState {
                handler: self.handler.clone(),
                membership: self.membership.clone(),
            })
    }

    /// load tls material, bind, and serve until the listener fails
    pub async fn serve(self) -> NodeResult<()> {
        let tls_config = tls::load_server_config(&self.tls)?;
        let addr = resolve(&self.host, self.port).await?;
        let app = self.router();

        tracing::info!(overlay = self.name(), %addr, "overlay listening");
        axum_server::bind_rustls(addr, RustlsConfig::from_config(Arc::new(tls_config)))
            .serve(app.into_make_service())
            .await
            .map_err(|e| NodeError::Bind {
                addr: addr.to_string(),
                reason: e.to_string(),
            })
    }
}

async fn resolve(host: &str, port: u16) -> NodeResult<SocketAddr> {
    let bind_err = |reason: String| NodeError::Bind {
        addr: format!("{host}:{port}"),
        reason,
    };
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| bind_err(e.to_string()))?
        .next()
        .ok_or_else(|| bind_err("host resolved to no address".into()))
}

/// POST /message
///
/// the sender gets 202 whether or not the payload decoded.
async fn message_handler(
    State(state): State<OverlayState>,
    Json(req): Json<MessageRequest>,
) -> StatusCode {
    let handler = state.handler.clone();
    let overlay = handler.overlay();
    if let Err(e) = tokio::task::spawn_blocking(move || bridge::dispatch(handler.as_ref(), &req)).await {
        tracing::error!(overlay, error = %e, "message handler panicked");
    }
    StatusCode::ACCEPTED
}

/// GET /membership
async fn membership_handler(State(state): State<OverlayState>) -> Json<Vec<Member>> {
    Json(state.membership.entries())
}

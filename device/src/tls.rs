//! ==============================================================================
//! tls.rs - certificate material for both overlays and the secure client
//! ==============================================================================
//!
//! purpose:
//!     every node carries three pem files in its data directory:
//!     - bundled.key: this node's private key
//!     - bundled.crt: this node's certificate (chain)
//!     - ca.crt:      trust bundle; peers must present a cert signed by it
//!
//! ```text
//!     from those we build:
//!     - a rustls ServerConfig that REQUIRES client certificates (listeners)
//!     - a reqwest Client that presents our cert and trusts only the bundle
//!       (exchange task)
//! ```
//!
//! ==============================================================================

use crate::error::{NodeError, NodeResult};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// where the node's key, certificate and trust bundle live
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsPaths {
    pub key: PathBuf,
    pub cert: PathBuf,
    pub ca: PathBuf,
}

impl TlsPaths {
    pub fn in_dir(dir: &Path, key: &str, cert: &str, ca: &str) -> Self {
        Self {
            key: dir.join(key),
            cert: dir.join(cert),
            ca: dir.join(ca),
        }
    }
}

fn read(path: &Path) -> NodeResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| NodeError::credential(path, e))
}

fn parse_certs(path: &Path, pem: &[u8]) -> NodeResult<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| NodeError::credential(path, e))?;
    if certs.is_empty() {
        return Err(NodeError::credential(path, "no certificates found"));
    }
    Ok(certs)
}

fn parse_key(path: &Path, pem: &[u8]) -> NodeResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut BufReader::new(pem))
        .map_err(|e| NodeError::credential(path, e))?
        .ok_or_else(|| NodeError::credential(path, "no private key found"))
}

// ==============================================================================
// listener side
// ==============================================================================

/// server config for an overlay listener: our identity + mandatory client auth
pub fn load_server_config(paths: &TlsPaths) -> NodeResult<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let certs = parse_certs(&paths.cert, &read(&paths.cert)?)?;
    let key = parse_key(&paths.key, &read(&paths.key)?)?;

    let mut roots = RootCertStore::empty();
    for ca in parse_certs(&paths.ca, &read(&paths.ca)?)? {
        roots
            .add(ca)
            .map_err(|e| NodeError::credential(&paths.ca, e))?;
    }

    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| NodeError::credential(&paths.ca, e))?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| NodeError::credential(&paths.cert, e))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| NodeError::credential(&paths.key, e))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

// ==============================================================================
// client side
// ==============================================================================

/// mutually authenticated https client for talking to other devices
///
/// only the trust bundle is trusted; the system roots are switched off.
pub fn build_secure_client(paths: &TlsPaths, timeout: Duration) -> NodeResult<reqwest::Client> {
    let cert_pem = read(&paths.cert)?;
    let key_pem = read(&paths.key)?;

    // reqwest wants key and certificate in one pem buffer
    let mut identity_pem = key_pem;
    identity_pem.push(b'\n');
    identity_pem.extend_from_slice(&cert_pem);
    let identity =
        reqwest::Identity::from_pem(&identity_pem).map_err(|e| NodeError::credential(&paths.cert, e))?;

    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .identity(identity)
        .timeout(timeout);

    for ca in parse_certs(&paths.ca, &read(&paths.ca)?)? {
        let cert = reqwest::Certificate::from_der(ca.as_ref())
            .map_err(|e| NodeError::credential(&paths.ca, e))?;
        builder = builder.add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| NodeError::credential(&paths.cert, e))
}

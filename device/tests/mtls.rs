//! overlay listeners over real tls: a client holding a certificate signed
//! by the trust bundle gets through, anyone else is refused at the handshake.

use mesh_device::bridge::InternalHandler;
use mesh_device::overlay::OverlayServer;
use mesh_device::persist::SnapshotWriter;
use mesh_device::tls::{build_secure_client, TlsPaths};
use mesh_device::{AggregationStore, MessageRequest};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

fn authority(name: &str) -> Authority {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, name);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let cert = params.self_signed(&key).unwrap();
    Authority { cert, key }
}

/// write a leaf signed by `ca` plus the ca itself as trust bundle into `dir`
fn write_leaf(dir: &Path, ca: &Authority) -> TlsPaths {
    let key = KeyPair::generate().unwrap();
    let mut params =
        CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, "rasp-019");
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let cert = params.signed_by(&key, &ca.cert, &ca.key).unwrap();

    let paths = TlsPaths::in_dir(dir, "bundled.key", "bundled.crt", "ca.crt");
    std::fs::write(&paths.key, key.serialize_pem()).unwrap();
    std::fs::write(&paths.cert, cert.pem()).unwrap();
    std::fs::write(&paths.ca, ca.cert.pem()).unwrap();
    paths
}

fn free_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

async fn post(client: &reqwest::Client, port: u16, sender: &str, data: &str) -> reqwest::Result<u16> {
    let resp = client
        .post(format!("https://127.0.0.1:{port}/message"))
        .json(&MessageRequest::new(sender, data))
        .send()
        .await?;
    Ok(resp.status().as_u16())
}

/// spawn an internal overlay on 127.0.0.1 and wait until it answers
async fn start_internal(
    dir: &tempfile::TempDir,
    paths: &TlsPaths,
    client: &reqwest::Client,
) -> (Arc<AggregationStore>, u16) {
    let store = Arc::new(AggregationStore::new(
        "rasp-019",
        SnapshotWriter::new(dir.path().join("data.json")),
    ));
    let port = free_port();
    let server = OverlayServer::new(
        "127.0.0.1",
        port,
        paths.clone(),
        Arc::new(InternalHandler::new(store.clone())),
    );
    tokio::spawn(server.serve());

    let health = format!("https://127.0.0.1:{port}/health");
    for _ in 0..100 {
        if client.get(&health).send().await.is_ok() {
            return (store, port);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("overlay on port {port} never came up");
}

#[tokio::test]
async fn mutually_authenticated_client_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let ca = authority("mesh test ca");
    let paths = write_leaf(dir.path(), &ca);
    let client = build_secure_client(&paths, Duration::from_secs(5)).unwrap();

    let (store, port) = start_internal(&dir, &paths, &client).await;

    let status = post(&client, port, "temp-01", r#"{"value": 21.5}"#).await.unwrap();
    assert_eq!(status, 202);
    assert_eq!(
        store.own_record().data["temp-01"].0["value"],
        serde_json::json!(21.5)
    );
}

#[tokio::test]
async fn client_without_certificate_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let ca = authority("mesh test ca");
    let paths = write_leaf(dir.path(), &ca);
    let good = build_secure_client(&paths, Duration::from_secs(5)).unwrap();
    let (store, port) = start_internal(&dir, &paths, &good).await;

    // trusts the server, but has nothing to present
    let anonymous = reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(reqwest::Certificate::from_pem(ca.cert.pem().as_bytes()).unwrap())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    assert!(post(&anonymous, port, "temp-01", r#"{"value": 1}"#).await.is_err());
    assert!(store.own_record().data.is_empty());
}

#[tokio::test]
async fn client_from_another_authority_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let ca = authority("mesh test ca");
    let paths = write_leaf(dir.path(), &ca);
    let good = build_secure_client(&paths, Duration::from_secs(5)).unwrap();
    let (store, port) = start_internal(&dir, &paths, &good).await;

    // own leaf from a foreign ca; still trusts the real server ca
    let other_dir = tempfile::tempdir().unwrap();
    let other_paths = write_leaf(other_dir.path(), &authority("someone else"));
    std::fs::write(&other_paths.ca, ca.cert.pem()).unwrap();
    let stranger = build_secure_client(&other_paths, Duration::from_secs(5)).unwrap();

    assert!(post(&stranger, port, "temp-01", r#"{"value": 1}"#).await.is_err());
    assert!(store.own_record().data.is_empty());
}

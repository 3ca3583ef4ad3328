//! Mutual TLS on a control listener, with certificates minted per test run.

use provkernel::config::TlsPaths;
use provkernel::server::{Listener, ServerContext, Service};
use provkernel::{Client, tls};
use provkernel_core::{Kernel, KernelSettings};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_rustls::TlsConnector;

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(name: &str) -> Self {
        let key = KeyPair::generate().expect("CA key");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.self_signed(&key).expect("CA certificate");
        Self { cert, key }
    }

    /// Sign a leaf and write it as `<stem>.crt` and `<stem>.key` under `dir`.
    fn issue(&self, dir: &Path, stem: &str, names: &[&str], usage: ExtendedKeyUsagePurpose) {
        let key = KeyPair::generate().expect("leaf key");
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let mut params = CertificateParams::new(names).expect("leaf params");
        params.distinguished_name.push(DnType::CommonName, stem);
        params.extended_key_usages = vec![usage];
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .expect("leaf certificate");
        std::fs::write(dir.join(format!("{}.crt", stem)), cert.pem()).expect("write cert");
        std::fs::write(dir.join(format!("{}.key", stem)), key.serialize_pem()).expect("write key");
    }

    fn write(&self, dir: &Path, file: &str) {
        std::fs::write(dir.join(file), self.cert.pem()).expect("write CA");
    }
}

/// One CA for both sides, plus a client certificate from an unrelated CA.
struct Material {
    _dir: TempDir,
    paths: TlsPaths,
    foreign: TlsPaths,
}

impl Material {
    fn mint() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();

        let ca = Authority::new("provkernel test CA");
        ca.write(root, "ca.crt");
        ca.issue(
            root,
            "server",
            &["localhost", "127.0.0.1"],
            ExtendedKeyUsagePurpose::ServerAuth,
        );
        ca.issue(root, "client", &[], ExtendedKeyUsagePurpose::ClientAuth);

        let stranger = Authority::new("unrelated CA");
        stranger.issue(root, "intruder", &[], ExtendedKeyUsagePurpose::ClientAuth);

        let paths = TlsPaths {
            server_cert: root.join("server.crt"),
            server_key: root.join("server.key"),
            client_ca: root.join("ca.crt"),
            server_ca: root.join("ca.crt"),
            client_cert: root.join("client.crt"),
            client_key: root.join("client.key"),
        };
        let foreign = TlsPaths {
            client_cert: root.join("intruder.crt"),
            client_key: root.join("intruder.key"),
            ..paths.clone()
        };
        Self {
            _dir: dir,
            paths,
            foreign,
        }
    }

    /// Trusts the kernel but presents no certificate.
    fn anonymous_connector(&self) -> TlsConnector {
        let mut roots = RootCertStore::empty();
        for cert in tls::load_certs(&self.paths.server_ca).expect("CA") {
            roots.add(cert).expect("root");
        }
        let config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .expect("protocol versions")
                .with_root_certificates(roots)
                .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    }
}

struct Secured {
    kernel: Arc<Kernel>,
    port: u16,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl Secured {
    async fn start(material: &Material) -> Self {
        let kernel = Arc::new(Kernel::with_builtins(KernelSettings::default()));
        let acceptor = tls::server_acceptor(&material.paths).expect("acceptor");
        let listener = Listener::bind(Service::Control, "127.0.0.1:0", Some(acceptor))
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let (shutdown, rx) = watch::channel(false);
        let context = ServerContext {
            kernel: Arc::clone(&kernel),
            control_read_timeout: Duration::from_millis(50),
        };
        let task = listener.spawn(context, rx);
        Self {
            kernel,
            port,
            shutdown,
            task,
        }
    }

    /// Connect and run one command; any failure along the way is the error.
    async fn attempt(&self, connector: &TlsConnector, command: &str) -> Result<String, String> {
        let exchange = async {
            let mut client = Client::connect("127.0.0.1", self.port, Some(connector)).await?;
            let output = client.control(command).await?;
            client.close().await?;
            Ok::<_, provkernel::ServerError>(output)
        };
        match tokio::time::timeout(Duration::from_secs(5), exchange).await {
            Ok(outcome) => outcome.map_err(|e| e.to_string()),
            Err(_) => Err("timed out".to_string()),
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).expect("listener alive");
        self.task.await.expect("listener task");
    }
}

#[tokio::test]
async fn test_mutual_tls_round_trip() {
    let material = Material::mint();
    let server = Secured::start(&material).await;
    let connector = tls::client_connector(&material.paths).expect("connector");

    assert_eq!(
        server.attempt(&connector, "add storage Memory").await,
        Ok("Adding storage Memory... done".to_string())
    );
    assert_eq!(
        server.attempt(&connector, "list storages").await,
        Ok("1 storage(s) added:\n\t1. Memory".to_string())
    );

    server.stop().await;
}

#[tokio::test]
async fn test_client_without_certificate_is_rejected() {
    let material = Material::mint();
    let server = Secured::start(&material).await;

    let rejected = server
        .attempt(&material.anonymous_connector(), "add storage Memory")
        .await;
    assert!(rejected.is_err(), "accepted without a certificate: {:?}", rejected);
    assert_eq!(server.kernel.execute("list storages"), "No storages added");

    // The listener keeps serving authenticated clients.
    let connector = tls::client_connector(&material.paths).expect("connector");
    assert_eq!(
        server.attempt(&connector, "add storage Memory").await,
        Ok("Adding storage Memory... done".to_string())
    );

    server.stop().await;
}

#[tokio::test]
async fn test_client_from_unknown_authority_is_rejected() {
    let material = Material::mint();
    let server = Secured::start(&material).await;

    let intruder = tls::client_connector(&material.foreign).expect("connector");
    assert!(server.attempt(&intruder, "add sketch Counter").await.is_err());
    assert_eq!(server.kernel.execute("list sketches"), "No sketches added");

    server.stop().await;
}

//! Listener and client round trips over plain TCP on ephemeral ports.

use provkernel::server::{Listener, ServerContext, Service};
use provkernel::Client;
use provkernel_core::{Kernel, KernelSettings, QueryReply, dispatch};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct Harness {
    kernel: Arc<Kernel>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    ports: Vec<(Service, u16)>,
}

impl Harness {
    async fn start(services: &[Service]) -> Self {
        let kernel = Arc::new(Kernel::with_builtins(KernelSettings::default()));
        let (shutdown, rx) = watch::channel(false);
        let context = ServerContext {
            kernel: Arc::clone(&kernel),
            control_read_timeout: Duration::from_millis(50),
        };
        let mut tasks = Vec::new();
        let mut ports = Vec::new();
        for &service in services {
            let listener = Listener::bind(service, "127.0.0.1:0", None)
                .await
                .expect("bind");
            ports.push((service, listener.local_addr().expect("addr").port()));
            tasks.push(listener.spawn(context.clone(), rx.clone()));
        }
        Self {
            kernel,
            shutdown,
            tasks,
            ports,
        }
    }

    async fn client(&self, service: Service) -> Client {
        let port = self
            .ports
            .iter()
            .find(|(s, _)| *s == service)
            .map(|(_, p)| *p)
            .expect("service bound");
        Client::connect("127.0.0.1", port, None).await.expect("connect")
    }

    async fn stop(self) {
        self.shutdown.send(true).expect("listeners alive");
        for task in self.tasks {
            task.await.expect("listener task");
        }
    }
}

#[tokio::test]
async fn test_control_round_trip() {
    let harness = Harness::start(&[Service::Control]).await;
    let mut client = harness.client(Service::Control).await;

    assert_eq!(
        client.control("add storage Memory").await.expect("add"),
        "Adding storage Memory... done"
    );
    assert_eq!(
        client.control("add sketch Counter").await.expect("add"),
        "Adding sketch Counter... done"
    );
    assert_eq!(
        client.control("list storages").await.expect("list"),
        "1 storage(s) added:\n\t1. Memory"
    );

    let help = client.control("frobnicate").await.expect("help");
    assert!(help.starts_with("Available commands:"));

    client.close().await.expect("close");
    harness.stop().await;
}

#[tokio::test]
async fn test_multi_line_output_keeps_sentinel() {
    let harness = Harness::start(&[Service::Control]).await;
    let mut client = harness.client(Service::Control).await;

    let all = client.control("list all").await.expect("list");
    assert_eq!(all.lines().count(), 5);
    assert!(all.contains("No filters added"));

    // The next reply must not contain leftovers from the previous one.
    assert_eq!(
        client.control("list sketches").await.expect("list"),
        "No sketches added"
    );

    client.close().await.expect("close");
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_query_returns_committed_provenance() {
    let harness = Harness::start(&[Service::Control, Service::Query]).await;
    let dispatcher = dispatch::spawn(Arc::clone(&harness.kernel)).expect("dispatch thread");

    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, r#"{{"kind":"vertex","id":"p1","annotations":{{"type":"Process","name":"bash"}}}}"#).expect("write");
    writeln!(file, r#"{{"kind":"vertex","id":"p2","annotations":{{"type":"Process","name":"ls"}}}}"#).expect("write");
    writeln!(file, r#"{{"kind":"edge","child":"p2","parent":"p1","annotations":{{"type":"WasTriggeredBy"}}}}"#).expect("write");
    file.flush().expect("flush");

    let mut control = harness.client(Service::Control).await;
    control.control("add storage Memory").await.expect("storage");
    let added = control
        .control(&format!("add reporter JsonLines path={}", file.path().display()))
        .await
        .expect("reporter");
    assert_eq!(added, "Adding reporter JsonLines... done");

    let mut query = harness.client(Service::Query).await;
    let mut vertices = 0;
    for _ in 0..100 {
        match query.query("getVertices(type=Process)").await.expect("query") {
            QueryReply::Graph(Some(graph)) => {
                vertices = graph.vertex_count();
                if vertices == 2 {
                    break;
                }
            }
            other => unreachable!("unexpected reply {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(vertices, 2);

    match query.query("whatIsThis()").await.expect("query") {
        QueryReply::Help(text) => assert!(text.contains("getVertices")),
        other => unreachable!("unexpected reply {:?}", other),
    }

    query.close().await.expect("close");
    control.close().await.expect("close");

    let kernel = Arc::clone(&harness.kernel);
    tokio::task::spawn_blocking(move || kernel.shutdown())
        .await
        .expect("shutdown");
    dispatcher.join().expect("dispatch thread");
    harness.stop().await;
}

#[tokio::test]
async fn test_sketch_exchange() {
    let harness = Harness::start(&[Service::Control, Service::RemoteSketch]).await;
    harness.kernel.add_sketch("Counter").expect("sketch");

    let mut client = harness.client(Service::RemoteSketch).await;
    let local: serde_json::Value =
        serde_json::from_str(&client.request("get").await.expect("get")).expect("json");
    assert!(local.get("Counter").is_some());

    assert_eq!(
        client
            .request(r#"put peer-1 {"Counter":{"vertices":{"Process":3}}}"#)
            .await
            .expect("put"),
        "ok"
    );
    assert_eq!(client.request("list").await.expect("list"), r#"["peer-1"]"#);
    assert!(harness.kernel.remote_sketch("peer-1").is_some());

    client.close().await.expect("close");
    harness.stop().await;
}

#[tokio::test]
async fn test_listener_stops_with_idle_control_connection() {
    let harness = Harness::start(&[Service::Control]).await;
    let client = harness.client(Service::Control).await;

    // An open but silent connection does not hold the listener open.
    tokio::time::timeout(Duration::from_secs(5), harness.stop())
        .await
        .expect("listener stopped");
    drop(client);
}

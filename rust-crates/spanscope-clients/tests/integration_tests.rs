use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use spanscope_clients::bridge::{RUNNING_CONTEXT_KEY, SELECT_CLIENT, START_SERVER, STOP_SERVER};
use spanscope_clients::socket::MAX_LINE_LENGTH;
use spanscope_clients::{Clients, ClientsConfig, CommandRegistry, SocketGateway};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_test::assert_ok;

struct Harness {
    gateway: Arc<SocketGateway>,
    bridge: Arc<CommandRegistry>,
    clients: Clients<SocketGateway>,
}

impl Harness {
    fn new() -> Self {
        let gateway = Arc::new(SocketGateway::new("127.0.0.1:0"));
        let bridge = Arc::new(CommandRegistry::new());
        let config = ClientsConfig {
            retry_delay: Duration::from_millis(50),
            ..ClientsConfig::default()
        };
        let clients = Clients::new(Arc::clone(&gateway), bridge.clone(), config).unwrap();
        Self {
            gateway,
            bridge,
            clients,
        }
    }

    async fn start(&self) -> SocketAddr {
        assert_ok!(self.bridge.invoke(START_SERVER, vec![]).await);
        wait_for(|| self.gateway.local_addr().is_some()).await;
        self.gateway.local_addr().unwrap()
    }

    async fn connect(&self, addr: SocketAddr, expected_clients: usize) -> TcpStream {
        let stream = TcpStream::connect(addr).await.unwrap();
        wait_for(|| self.clients.registry().client_count() == expected_clients).await;
        stream
    }

    fn active_id(&self) -> Option<u64> {
        self.clients.selector().active_id()
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn span_line(i: usize) -> String {
    format!(
        "{{\"traceId\":\"trace\",\"spanId\":\"{}\",\"name\":\"span-{}\"}}\n",
        i, i
    )
}

#[tokio::test]
async fn test_commands_are_registered() {
    let harness = Harness::new();
    let commands = harness.bridge.commands();
    assert_eq!(commands, vec!["select-client", "start-server", "stop-server"]);

    // The initial running flag is published as well
    wait_for(|| harness.bridge.context(RUNNING_CONTEXT_KEY) == Some(json!(false))).await;
}

#[tokio::test]
async fn test_start_publishes_running_context() {
    let harness = Harness::new();
    harness.start().await;

    assert!(harness.clients.is_running());
    wait_for(|| harness.bridge.context(RUNNING_CONTEXT_KEY) == Some(json!(true))).await;

    assert_ok!(harness.bridge.invoke(STOP_SERVER, vec![]).await);
    assert!(!harness.clients.is_running());
    wait_for(|| harness.bridge.context(RUNNING_CONTEXT_KEY) == Some(json!(false))).await;
}

#[tokio::test]
async fn test_spans_reach_active_client_buffer() {
    let harness = Harness::new();
    let addr = harness.start().await;

    let mut stream = harness.connect(addr, 1).await;
    assert_eq!(harness.active_id(), Some(1));

    for i in 0..3 {
        stream.write_all(span_line(i).as_bytes()).await.unwrap();
    }

    let client = harness.clients.active_client().unwrap();
    wait_for(|| client.spans().len() == 3).await;
    let names: Vec<String> = client.spans().drain().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["span-0", "span-1", "span-2"]);

    harness.clients.shutdown().await;
}

#[tokio::test]
async fn test_buffer_keeps_latest_spans() {
    let harness = Harness::new();
    let addr = harness.start().await;
    let mut stream = harness.connect(addr, 1).await;

    let payload: String = (1..=150).map(span_line).collect();
    stream.write_all(payload.as_bytes()).await.unwrap();

    let client = harness.clients.active_client().unwrap();
    wait_for(|| {
        client
            .spans()
            .snapshot()
            .last()
            .map(|s| s.span_id == "150")
            .unwrap_or(false)
    })
    .await;

    let ids: Vec<String> = client.spans().drain().into_iter().map(|s| s.span_id).collect();
    assert_eq!(ids.len(), 100);
    assert_eq!(ids.first().map(String::as_str), Some("51"));

    harness.clients.shutdown().await;
}

#[tokio::test]
async fn test_active_client_selection_scenario() {
    let harness = Harness::new();
    let addr = harness.start().await;

    let _a = harness.connect(addr, 1).await;
    assert_eq!(harness.active_id(), Some(1));

    let b = harness.connect(addr, 2).await;
    assert_eq!(harness.active_id(), Some(1));

    let selected = harness.bridge.invoke(SELECT_CLIENT, vec![json!(2)]).await.unwrap();
    assert_eq!(selected, json!(true));
    assert_eq!(harness.active_id(), Some(2));

    let ignored = harness.bridge.invoke(SELECT_CLIENT, vec![json!(999)]).await.unwrap();
    assert_eq!(ignored, json!(false));
    assert_eq!(harness.active_id(), Some(2));

    drop(b);
    wait_for(|| harness.clients.registry().client_count() == 1).await;
    assert_eq!(harness.active_id(), None);

    let _c = harness.connect(addr, 2).await;
    assert_eq!(harness.active_id(), Some(3));

    harness.clients.shutdown().await;
}

#[tokio::test]
async fn test_malformed_span_closes_only_that_client() {
    let harness = Harness::new();
    let addr = harness.start().await;

    let _good = harness.connect(addr, 1).await;
    let mut bad = harness.connect(addr, 2).await;

    bad.write_all(b"this is not json\n").await.unwrap();
    wait_for(|| harness.clients.registry().client_count() == 1).await;

    assert!(harness.clients.registry().client(1).is_some());
    assert!(harness.clients.registry().client(2).is_none());
    assert!(harness.clients.is_running());

    harness.clients.shutdown().await;
}

#[tokio::test]
async fn test_stop_then_start_begins_empty() {
    let harness = Harness::new();
    let addr = harness.start().await;

    let _a = harness.connect(addr, 1).await;
    let _b = harness.connect(addr, 2).await;
    let buffers: Vec<_> = harness
        .clients
        .clients()
        .with(|set| set.values().cloned().collect());

    harness.clients.stop().await;
    assert_eq!(harness.clients.registry().client_count(), 0);
    assert!(harness.active_id().is_none());
    assert!(buffers.iter().all(|client| client.spans().is_shutdown()));

    harness.clients.start().await;
    assert_eq!(harness.clients.registry().client_count(), 0);
    assert!(harness.clients.is_running());

    // Ids keep increasing across restarts
    wait_for(|| harness.gateway.local_addr().is_some()).await;
    let addr = harness.gateway.local_addr().unwrap();
    let _c = TcpStream::connect(addr).await.unwrap();
    wait_for(|| harness.active_id().is_some()).await;
    assert!(harness.active_id().unwrap() > 2);

    harness.clients.shutdown().await;
}

#[tokio::test]
async fn test_oversized_line_closes_only_that_client() {
    let harness = Harness::new();
    let addr = harness.start().await;

    let mut good = harness.connect(addr, 1).await;
    let mut flood = harness.connect(addr, 2).await;

    // No newline ever arrives; the server gives up once the cap is passed
    let writer = tokio::spawn(async move {
        let chunk = vec![b'x'; 64 * 1024];
        let mut sent = 0;
        while sent <= MAX_LINE_LENGTH {
            if flood.write_all(&chunk).await.is_err() {
                break;
            }
            sent += chunk.len();
        }
        flood
    });

    wait_for(|| harness.clients.registry().client(2).is_none()).await;
    assert!(harness.clients.registry().client(1).is_some());
    writer.abort();

    good.write_all(span_line(7).as_bytes()).await.unwrap();
    let client = harness.clients.registry().client(1).unwrap();
    wait_for(|| client.spans().len() == 1).await;

    harness.clients.shutdown().await;
}

#[tokio::test]
async fn test_restart_after_interrupted_stop() {
    let harness = Harness::new();
    harness.start().await;

    let mut stop = tokio_test::task::spawn(harness.clients.stop());
    assert!(stop.poll().is_pending());
    drop(stop);

    harness.clients.start().await;
    assert!(harness.clients.is_running());
    wait_for(|| harness.gateway.local_addr().is_some()).await;

    let addr = harness.gateway.local_addr().unwrap();
    let _stream = harness.connect(addr, 1).await;

    harness.clients.shutdown().await;
}

#[tokio::test]
async fn test_dropping_clients_stops_server() {
    let harness = Harness::new();
    harness.start().await;

    let Harness {
        gateway,
        bridge,
        clients,
    } = harness;
    drop(clients);

    wait_for(|| gateway.local_addr().is_none()).await;
    assert!(bridge.invoke(START_SERVER, vec![]).await.is_err());
    wait_for(|| Arc::strong_count(&gateway) == 1).await;
}

//! End-to-end tests using a real `WebSocket` client.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{Message as HubMessage, Priority};
use beacon_hub::auth::StaticTokenAuthenticator;
use beacon_hub::{Hub, HubCollaborators, HubConfig};
use beacon_server::{BeaconServer, ServerConfig};
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: std::net::SocketAddr,
    hub: Arc<Hub>,
    _server: BeaconServer,
}

impl TestServer {
    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn connect(&self) -> WsStream {
        let before = self.hub.connection_count();
        let (ws, _) = connect_async(self.ws_url()).await.unwrap();
        self.wait_for_connections(before + 1).await;
        ws
    }

    async fn wait_for_connections(&self, n: usize) {
        timeout(TIMEOUT, async {
            while self.hub.connection_count() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {n} connections, have {}", self.hub.connection_count()));
    }
}

async fn boot(hub_config: HubConfig, server_config: ServerConfig, collaborators: HubCollaborators) -> TestServer {
    let hub = Hub::start(hub_config, collaborators);
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle();
    let server = BeaconServer::new(server_config, Arc::clone(&hub), metrics_handle);
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer {
        addr,
        hub,
        _server: server,
    }
}

async fn boot_default() -> TestServer {
    boot(HubConfig::default(), ServerConfig::default(), HubCollaborators::default()).await
}

/// Next text message, skipping control frames.
async fn next_text(ws: &mut WsStream) -> Option<String> {
    loop {
        match timeout(TIMEOUT, ws.next()).await.ok()?? {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Whether the socket ends (close frame or EOF) within the timeout.
async fn closes(ws: &mut WsStream) -> bool {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                None | Some(Ok(Message::Close(_)) | Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn peer_message_reaches_others_but_not_origin() {
    let server = boot_default().await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;
    let mut carol = server.connect().await;

    alice.send(Message::text("hello")).await.unwrap();

    assert_eq!(next_text(&mut bob).await.as_deref(), Some("hello"));
    assert_eq!(next_text(&mut carol).await.as_deref(), Some("hello"));
    assert!(
        timeout(Duration::from_millis(200), alice.next()).await.is_err(),
        "origin should not receive its own message"
    );
}

#[tokio::test]
async fn published_messages_arrive_in_priority_order() {
    let server = boot_default().await;
    let mut client = server.connect().await;

    // The test runtime is single-threaded, so all three are queued before
    // the broadcaster gets a turn.
    let _ = server.hub.publish(HubMessage::new("low", Priority::Low)).unwrap();
    let _ = server.hub.publish(HubMessage::new("normal", Priority::Normal)).unwrap();
    let _ = server.hub.publish(HubMessage::new("urgent", Priority::Urgent)).unwrap();

    let mut got = Vec::new();
    for _ in 0..3 {
        got.push(next_text(&mut client).await.unwrap());
    }
    assert_eq!(got, ["urgent", "normal", "low"]);
}

#[tokio::test]
async fn binary_payloads_pass_through() {
    let server = boot_default().await;
    let mut sender = server.connect().await;
    let mut receiver = server.connect().await;

    sender.send(Message::binary(vec![0xff, 0x00, 0x7f])).await.unwrap();

    let got = timeout(TIMEOUT, async {
        loop {
            if let Some(Ok(Message::Binary(data))) = receiver.next().await {
                return data;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(&got[..], &[0xff, 0x00, 0x7f]);
}

#[tokio::test]
async fn token_auth_accepts_known_and_rejects_unknown() {
    let auth = StaticTokenAuthenticator::new([("secret", "alice")]);
    let server = boot(
        HubConfig::default(),
        ServerConfig::default(),
        HubCollaborators::default().with_authenticator(auth),
    )
    .await;

    let (_good, _) = connect_async(format!("{}?token=secret", server.ws_url())).await.unwrap();
    server.wait_for_connections(1).await;

    let (mut bad, _) = connect_async(format!("{}?token=wrong", server.ws_url())).await.unwrap();
    assert!(closes(&mut bad).await);
    assert_eq!(server.hub.connection_count(), 1);
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    use tungstenite::client::IntoClientRequest;

    let auth = StaticTokenAuthenticator::new([("secret", "alice")]);
    let server = boot(
        HubConfig::default(),
        ServerConfig::default(),
        HubCollaborators::default().with_authenticator(auth),
    )
    .await;

    let mut request = server.ws_url().into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("authorization", "Bearer secret".parse().unwrap());
    let (_ws, _) = connect_async(request).await.unwrap();
    server.wait_for_connections(1).await;
}

#[tokio::test]
async fn connection_limit_returns_503() {
    let server_config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let server = boot(HubConfig::default(), server_config, HubCollaborators::default()).await;
    let _first = server.connect().await;

    match connect_async(server.ws_url()).await {
        Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 503),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("second connection should be refused"),
    }
}

#[tokio::test]
async fn health_reports_connections() {
    let server = boot_default().await;
    let _client = server.connect().await;

    let body: serde_json::Value = reqwest::get(server.http_url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["queue_capacity"], 1000);
}

#[tokio::test]
async fn closing_client_unregisters() {
    let server = boot_default().await;
    let mut client = server.connect().await;
    client.close(None).await.unwrap();
    server.wait_for_connections(0).await;
}

#[tokio::test]
async fn shutdown_delivers_queued_then_closes_clients() {
    let server = boot_default().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    for i in 0..5 {
        let _ = server.hub.publish(HubMessage::new(format!("m{i}"), Priority::Normal)).unwrap();
    }
    let report = server.hub.shutdown().await;
    assert!(report.is_clean());

    for ws in [&mut a, &mut b] {
        let mut received = Vec::new();
        while let Some(text) = next_text(ws).await {
            received.push(text);
        }
        assert_eq!(received, ["m0", "m1", "m2", "m3", "m4"]);
    }
    assert_eq!(server.hub.connection_count(), 0);

    assert!(connect_async(server.ws_url()).await.is_err());
}

#[tokio::test]
async fn silent_client_is_reclaimed_by_heartbeat() {
    let hub_config = HubConfig {
        heartbeat_interval: Duration::from_millis(100),
        pong_wait: Duration::from_millis(300),
        ..HubConfig::default()
    };
    let server = boot(hub_config, ServerConfig::default(), HubCollaborators::default()).await;

    // Never polled, so pings are never answered.
    let _silent = server.connect().await;
    server.wait_for_connections(0).await;
}

#[tokio::test]
async fn reading_client_answers_pings_and_stays() {
    let hub_config = HubConfig {
        heartbeat_interval: Duration::from_millis(100),
        pong_wait: Duration::from_millis(300),
        ..HubConfig::default()
    };
    let server = boot(hub_config, ServerConfig::default(), HubCollaborators::default()).await;
    let mut client = server.connect().await;

    // Reading lets the client reply to pings automatically.
    let ended = timeout(Duration::from_secs(1), async {
        while let Some(Ok(_)) = client.next().await {}
    })
    .await;
    assert!(ended.is_err(), "connection should stay open");
    assert_eq!(server.hub.connection_count(), 1);
}

//! Two real nodes on loopback sockets, a mocked registry in front of them

use dinc_api::{create_router, AppState};
use dinc_cluster::routing::DEFAULT_MAX_HOPS;
use dinc_cluster::wire::HOP_COUNT_HEADER;
use dinc_cluster::{
    DiscoverySettings, GossipMembership, GossipSettings, HealthRegistry, PeerDiscovery,
    RequestRouter,
};
use dinc_core::FixedLoadSensor;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Node {
    address: String,
    health: Arc<HealthRegistry>,
}

async fn spawn_node(load: f64) -> Node {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());

    let health = Arc::new(HealthRegistry::new(address.clone(), 70.0));
    let sensor = Arc::new(FixedLoadSensor::new(load));
    let state = AppState {
        health: health.clone(),
        router: Arc::new(RequestRouter::new(health.clone(), sensor, DEFAULT_MAX_HOPS)),
        gossip: Arc::new(GossipMembership::new(
            address.clone(),
            Vec::<String>::new(),
            GossipSettings::default(),
        )),
        gossip_interval: Duration::from_secs(60),
    };

    let app = create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Node { address, health }
}

async fn registry_listing(addresses: &[&str]) -> MockServer {
    let registry = MockServer::start().await;
    let body: Vec<serde_json::Value> = addresses
        .iter()
        .map(|a| serde_json::json!({"address": a}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/nodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&registry)
        .await;
    registry
}

async fn discover(node: &Node, registry: &MockServer) {
    let discovery = PeerDiscovery::new(
        node.health.clone(),
        registry.uri(),
        DiscoverySettings::default(),
    );
    discovery.refresh_peers().await.unwrap();
    assert_eq!(discovery.poll_loads().await, 1);
}

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_underloaded_node_serves_locally() {
    let a = spawn_node(10.0).await;
    let b = spawn_node(90.0).await;
    let registry = registry_listing(&[a.address.as_str(), b.address.as_str()]).await;

    discover(&a, &registry).await;
    let peer = a.health.get_peer(&b.address).unwrap();
    assert!((peer.load - 90.0).abs() < f64::EPSILON);
    assert!(peer.latency > 0.0);

    let response = no_redirect_client()
        .get(format!("{}/", a.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(!a.health.is_overloaded());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["served_locally_reason"], "not_overloaded");
    assert_eq!(body["peers"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_overloaded_node_redirects_to_peer() {
    let a = spawn_node(95.0).await;
    let b = spawn_node(50.0).await;
    let registry = registry_listing(&[a.address.as_str(), b.address.as_str()]).await;

    discover(&a, &registry).await;

    let client = no_redirect_client();
    let response = client.get(format!("{}/", a.address)).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()[reqwest::header::LOCATION],
        format!("{}/", b.address).as_str()
    );
    assert_eq!(response.headers()[HOP_COUNT_HEADER], "1");

    // Following the redirect by hand lands on the peer, which serves it
    let followed = client
        .get(format!("{}/", b.address))
        .header(HOP_COUNT_HEADER, "1")
        .send()
        .await
        .unwrap();
    assert_eq!(followed.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = followed.json().await.unwrap();
    assert_eq!(body["my_address"], b.address.as_str());
    assert_eq!(body["hop_count"], 1);
}

#[tokio::test]
async fn test_registry_replacement_drops_old_peers() {
    let a = spawn_node(10.0).await;
    let registry = registry_listing(&["http://b:1", "http://c:1"]).await;
    let discovery = PeerDiscovery::new(a.health.clone(), registry.uri(), DiscoverySettings::default());
    discovery.refresh_peers().await.unwrap();

    registry.reset().await;
    Mock::given(method("GET"))
        .and(path("/nodes"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([{"address": "http://c:1"}, {"address": "http://d:1"}])),
        )
        .mount(&registry)
        .await;

    let change = discovery.refresh_peers().await.unwrap();
    assert_eq!(change.removed, vec!["http://b:1".to_string()]);

    let mut peers = a.health.peer_addresses();
    peers.sort();
    assert_eq!(peers, vec!["http://c:1".to_string(), "http://d:1".to_string()]);
    assert!(a.health.get_peer("http://b:1").is_none());
}

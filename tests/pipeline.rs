//! Pipeline tests against in-process dispatchers, with a paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::sync::Notify;

use route_gateway::config::{
    CacheOptions, CircuitBreakerOptions, ClaimDestination, ClaimMappingConfig, ClaimsOptions,
    GatewayConfig, HostConfig, LoadBalancerPolicy, RequiredClaim, RouteConfig,
};
use route_gateway::load_balancer::{LoadBalancer, ServiceHostAndPort};
use route_gateway::pipeline::{
    Authenticator, Claim, Dispatcher, DownstreamRequest, Gateway, GatewayResponse, Identity,
    InboundRequest,
};
use route_gateway::GatewayError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Ok,
    Status(u16),
    Refuse,
    Hang,
    Delay(Duration),
    /// Answer `status` after a delay.
    SlowStatus(Duration, u16),
    /// Wait for `release` before answering.
    Gate,
}

/// Counts calls and answers with `host path?query`.
struct FakeDispatcher {
    calls: AtomicUsize,
    mode: Mutex<Mode>,
    last: Mutex<Option<DownstreamRequest>>,
    release: Notify,
}

impl FakeDispatcher {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            mode: Mutex::new(mode),
            last: Mutex::new(None),
            release: Notify::new(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn last(&self) -> DownstreamRequest {
        self.last.lock().unwrap().clone().unwrap()
    }
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    async fn dispatch(
        &self,
        request: DownstreamRequest,
        host: &ServiceHostAndPort,
    ) -> Result<GatewayResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        let body = format!("{} {}", host, request.path_and_query());
        *self.last.lock().unwrap() = Some(request);

        let status = match mode {
            Mode::Ok => 200,
            Mode::Status(status) => status,
            Mode::Refuse => return Err(GatewayError::DownstreamConnection("connection refused".into())),
            Mode::Hang => std::future::pending().await,
            Mode::Delay(delay) => {
                tokio::time::sleep(delay).await;
                200
            }
            Mode::SlowStatus(delay, status) => {
                tokio::time::sleep(delay).await;
                status
            }
            Mode::Gate => {
                self.release.notified().await;
                200
            }
        };

        Ok(GatewayResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from(body),
        })
    }
}

/// Returns the identity carried in `x-test-claims: type=value;type=value`.
struct HeaderAuthenticator;

#[async_trait]
impl Authenticator for HeaderAuthenticator {
    async fn authenticate(&self, request: &InboundRequest) -> Option<Identity> {
        let raw = request.headers.get("x-test-claims")?.to_str().ok()?;
        let claims = raw
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| Claim::new(k, v))
            .collect();
        Some(Identity::new(claims))
    }
}

fn hosts(n: u16) -> Vec<HostConfig> {
    (0..n).map(|i| HostConfig::new("10.0.0.1", 8000 + i)).collect()
}

fn gateway(routes: Vec<RouteConfig>, dispatcher: Arc<FakeDispatcher>) -> Gateway {
    let config = GatewayConfig {
        routes,
        ..Default::default()
    };
    Gateway::new(&config, dispatcher, Arc::new(HeaderAuthenticator)).unwrap()
}

fn cached_route(ttl_ms: u64) -> RouteConfig {
    let mut route = RouteConfig::new("/products/{id}", "/catalog/{id}", hosts(1));
    route.cache = Some(CacheOptions {
        enabled: true,
        ttl_ms,
        region: Some("catalog".into()),
        key_dimensions: vec!["query:lang".into()],
        methods: vec!["GET".into()],
    });
    route
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_within_ttl_then_expiry() {
    let dispatcher = FakeDispatcher::new(Mode::Ok);
    let gw = gateway(vec![cached_route(1_000)], dispatcher.clone());

    let first = gw.handle(InboundRequest::new(Method::GET, "/products/7?lang=en")).await;
    let second = gw.handle(InboundRequest::new(Method::GET, "/products/7?lang=en")).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.status, second.status);
    assert_eq!(first.body, second.body);
    assert_eq!(dispatcher.calls(), 1);

    // Different key dimension value is a different entry
    gw.handle(InboundRequest::new(Method::GET, "/products/7?lang=de")).await;
    assert_eq!(dispatcher.calls(), 2);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    gw.handle(InboundRequest::new(Method::GET, "/products/7?lang=en")).await;
    assert_eq!(dispatcher.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cache_skips_errors_and_unsafe_methods() {
    let dispatcher = FakeDispatcher::new(Mode::Status(503));
    let gw = gateway(vec![cached_route(10_000)], dispatcher.clone());

    for _ in 0..2 {
        let res = gw.handle(InboundRequest::new(Method::GET, "/products/1")).await;
        assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    }
    assert_eq!(dispatcher.calls(), 2);

    dispatcher.set_mode(Mode::Ok);
    for _ in 0..2 {
        gw.handle(InboundRequest::new(Method::POST, "/products/1")).await;
    }
    assert_eq!(dispatcher.calls(), 4);
    assert!(gw.state().cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_dispatch_once() {
    let dispatcher = FakeDispatcher::new(Mode::Delay(Duration::from_millis(100)));
    let gw = gateway(vec![cached_route(10_000)], dispatcher.clone());

    let (a, b, c) = tokio::join!(
        gw.handle(InboundRequest::new(Method::GET, "/products/3")),
        gw.handle(InboundRequest::new(Method::GET, "/products/3")),
        gw.handle(InboundRequest::new(Method::GET, "/products/3")),
    );
    assert_eq!(dispatcher.calls(), 1);
    assert_eq!(a.body, b.body);
    assert_eq!(b.body, c.body);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_an_uncacheable_outcome() {
    let dispatcher = FakeDispatcher::new(Mode::SlowStatus(Duration::from_millis(100), 500));
    let mut route = cached_route(10_000);
    route.circuit_breaker = Some(CircuitBreakerOptions {
        failure_threshold: 5,
        break_duration_ms: 1_000,
        timeout_ms: 150,
    });
    let gw = Arc::new(gateway(vec![route], dispatcher.clone()));

    let started = tokio::time::Instant::now();
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..10 {
        let gw = gw.clone();
        tasks.spawn(async move {
            gw.handle(InboundRequest::new(Method::GET, "/products/1"))
                .await
                .status
        });
    }
    while let Some(status) = tasks.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // Everyone finished within the breaker timeout, on a single dispatch
    assert!(started.elapsed() <= Duration::from_millis(150));
    assert_eq!(dispatcher.calls(), 1);
    assert!(gw.state().cache.is_empty());

    // Nothing was stored, so the next request dispatches again
    gw.handle(InboundRequest::new(Method::GET, "/products/1")).await;
    assert_eq!(dispatcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_cache_region() {
    let dispatcher = FakeDispatcher::new(Mode::Ok);
    let gw = gateway(vec![cached_route(10_000)], dispatcher.clone());

    gw.handle(InboundRequest::new(Method::GET, "/products/1")).await;
    gw.handle(InboundRequest::new(Method::GET, "/products/2")).await;
    assert_eq!(gw.clear_cache_region("catalog"), 2);

    gw.handle(InboundRequest::new(Method::GET, "/products/1")).await;
    assert_eq!(dispatcher.calls(), 3);
}

fn admin_route() -> RouteConfig {
    let mut route = RouteConfig::new("/admin/{*rest}", "/internal/{rest}", hosts(1));
    route.claims = ClaimsOptions {
        requires_auth: true,
        required: vec![RequiredClaim {
            claim: "role".into(),
            values: vec!["admin".into()],
        }],
        mappings: vec![
            ClaimMappingConfig {
                claim: "sub".into(),
                destination: ClaimDestination::Header,
                key: "X-User-Id".into(),
                delimiter: None,
                index: None,
            },
            ClaimMappingConfig {
                claim: "tenant".into(),
                destination: ClaimDestination::Query,
                key: "tenant".into(),
                delimiter: Some(":".into()),
                index: Some(1),
            },
        ],
    };
    route
}

fn with_claims(path: &str, claims: &'static str) -> InboundRequest {
    let mut request = InboundRequest::new(Method::GET, path);
    request
        .headers
        .insert("x-test-claims", HeaderValue::from_static(claims));
    request
}

#[tokio::test]
async fn test_claims_authorization() {
    let dispatcher = FakeDispatcher::new(Mode::Ok);
    let gw = gateway(vec![admin_route()], dispatcher.clone());

    let anonymous = gw.handle(InboundRequest::new(Method::GET, "/admin/users")).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let reader = gw.handle(with_claims("/admin/users", "sub=u1;role=reader;tenant=eu:acme")).await;
    assert_eq!(reader.status, StatusCode::FORBIDDEN);
    assert_eq!(dispatcher.calls(), 0);
}

#[tokio::test]
async fn test_only_mapped_claims_forwarded() {
    let dispatcher = FakeDispatcher::new(Mode::Ok);
    let gw = gateway(vec![admin_route()], dispatcher.clone());

    let mut request = with_claims("/admin/users?page=1", "sub=u1;role=admin;tenant=eu:acme;email=a@b.c");
    request
        .headers
        .insert("x-user-id", HeaderValue::from_static("spoofed"));
    let res = gw.handle(request).await;
    assert_eq!(res.status, StatusCode::OK);

    let sent = dispatcher.last();
    assert_eq!(sent.path, "/internal/users");
    assert_eq!(sent.query.as_deref(), Some("page=1&tenant=acme"));
    assert_eq!(sent.headers.get("x-user-id").unwrap(), "u1");
    assert!(sent.claims.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_and_recovers() {
    let dispatcher = FakeDispatcher::new(Mode::Refuse);
    let mut route = RouteConfig::new("/pay", "/pay", hosts(1));
    route.circuit_breaker = Some(CircuitBreakerOptions {
        failure_threshold: 2,
        break_duration_ms: 5_000,
        timeout_ms: 1_000,
    });
    let gw = gateway(vec![route], dispatcher.clone());
    let req = || InboundRequest::new(Method::POST, "/pay");

    assert_eq!(gw.handle(req()).await.status, StatusCode::BAD_GATEWAY);
    assert_eq!(gw.handle(req()).await.status, StatusCode::BAD_GATEWAY);
    assert_eq!(gw.handle(req()).await.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(dispatcher.calls(), 2);

    dispatcher.set_mode(Mode::Ok);
    tokio::time::advance(Duration::from_millis(5_000)).await;
    assert_eq!(gw.handle(req()).await.status, StatusCode::OK);
    assert_eq!(gw.handle(req()).await.status, StatusCode::OK);
    assert_eq!(dispatcher.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_releases_least_connection_lease() {
    let dispatcher = FakeDispatcher::new(Mode::Hang);
    let mut route = RouteConfig::new("/lc", "/", hosts(2));
    route.load_balancer = LoadBalancerPolicy::LeastConnection;
    let mut config = GatewayConfig {
        routes: vec![route],
        ..Default::default()
    };
    config.timeouts.request_ms = 250;
    let gw = Gateway::new(&config, dispatcher.clone(), Arc::new(HeaderAuthenticator)).unwrap();

    let res = gw.handle(InboundRequest::new(Method::GET, "/lc")).await;
    assert_eq!(res.status, StatusCode::GATEWAY_TIMEOUT);

    let rule = gw.routes()[0].clone();
    match gw.state().balancers.get(&rule).as_ref() {
        LoadBalancer::LeastConnection(lc) => {
            assert!(lc.loads().iter().all(|(_, active)| *active == 0));
        }
        _ => panic!("expected least-connection balancer"),
    }
}

#[tokio::test]
async fn test_emptied_host_list_is_bad_gateway() {
    let dispatcher = FakeDispatcher::new(Mode::Ok);
    let mut route = RouteConfig::new("/svc", "/", hosts(2));
    route.load_balancer = LoadBalancerPolicy::RoundRobin;
    let gw = gateway(vec![route], dispatcher.clone());

    assert_eq!(gw.handle(InboundRequest::new(Method::GET, "/svc")).await.status, StatusCode::OK);

    let rule = gw.routes()[0].clone();
    gw.state().balancers.get(&rule).update_hosts(vec![]);
    assert_eq!(
        gw.state().balancers.lease(&rule).unwrap_err(),
        GatewayError::NoHostsAvailable { route: rule.name.clone() }
    );

    let res = gw.handle(InboundRequest::new(Method::GET, "/svc")).await;
    assert_eq!(res.status, StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(body["error"], "no_hosts_available");
    assert_eq!(dispatcher.calls(), 1);
}

#[tokio::test]
async fn test_in_flight_request_keeps_its_snapshot() {
    let dispatcher = FakeDispatcher::new(Mode::Gate);
    let gw = Arc::new(gateway(
        vec![RouteConfig::new("/v1/{id}", "/old/{id}", hosts(1))],
        dispatcher.clone(),
    ));

    let in_flight = {
        let gw = gw.clone();
        tokio::spawn(async move { gw.handle(InboundRequest::new(Method::GET, "/v1/9")).await })
    };
    while dispatcher.calls() == 0 {
        tokio::task::yield_now().await;
    }

    let replacement = GatewayConfig {
        routes: vec![RouteConfig::new("/v2/{id}", "/new/{id}", hosts(1))],
        ..Default::default()
    };
    gw.reload(&replacement).unwrap();
    dispatcher.release.notify_one();

    let res = in_flight.await.unwrap();
    assert_eq!(res.status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&res.body).ends_with("/old/9"));

    let after = gw.handle(InboundRequest::new(Method::GET, "/v1/9")).await;
    assert_eq!(after.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_reload_keeps_active_table() {
    let dispatcher = FakeDispatcher::new(Mode::Ok);
    let gw = gateway(vec![RouteConfig::new("/a", "/a", hosts(1))], dispatcher.clone());

    let broken = GatewayConfig {
        routes: vec![RouteConfig::new("/b/{id}", "/b/{other}", hosts(1))],
        ..Default::default()
    };
    assert!(gw.reload(&broken).is_err());

    let res = gw.handle(InboundRequest::new(Method::GET, "/a")).await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_generated_and_route_override() {
    let dispatcher = FakeDispatcher::new(Mode::Ok);
    let mut route = RouteConfig::new("/traced", "/", hosts(1));
    route.request_id_key = Some("X-Correlation-Id".into());
    let gw = gateway(vec![route], dispatcher.clone());

    let res = gw.handle(InboundRequest::new(Method::GET, "/traced")).await;
    let generated = res.headers.get("x-correlation-id").unwrap().to_str().unwrap();
    assert_eq!(generated.len(), 36);
    assert_eq!(dispatcher.last().headers.get("x-correlation-id").unwrap(), generated);
}

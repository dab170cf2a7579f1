//! Request pipeline.
//!
//! # Responsibilities
//! - Hold the active route table and swap it atomically on reload
//! - Run every request through the stages in a fixed order
//! - Map the first stage failure straight to a response
//! - Sweep expired cache entries and idle rate counters periodically
//!
//! # Data Flow
//! ```text
//! InboundRequest
//!     → match route            (RouteNotFound)
//!     → rewrite path/query
//!     → authenticate + claims  (Unauthorized / Forbidden)
//!     → rate limit             (RateLimitExceeded)
//!     → cache lookup           (hit → response, concurrent miss → shared outcome)
//!     → lease host             (NoHostsAvailable)
//!     → guarded dispatch       (CircuitOpen / DownstreamTimeout / DownstreamConnection)
//!     → cache store
//!     → GatewayResponse
//! ```
//!
//! # Design Decisions
//! - A request loads one snapshot at entry and uses it to the end; a reload
//!   never shows it a mix of old and new rules
//! - Per-route state lives in [`RouteStateRegistry`], reconciled after the swap
//! - Cache failures are logged and the request continues uncached

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::cache::Flight;
use crate::config::validation::{build_route_table, ValidationError};
use crate::config::{GatewayConfig, GlobalRateLimitConfig};
use crate::error::{retry_after_secs, GatewayError};
use crate::observability::metrics;
use crate::pipeline::dispatch::{Authenticator, Dispatcher};
use crate::pipeline::registry::RouteStateRegistry;
use crate::pipeline::request::{DownstreamRequest, GatewayResponse, InboundRequest};
use crate::routing::{find_route, replacer, DownstreamRoute, RouteRule, RouteTable};
use crate::security::{claims, client_id, headers, RateLimitDecision};

const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-rate-limit-limit");
const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-rate-limit-remaining");
const X_RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-rate-limit-reset");

/// Gateway-wide settings that travel with the route table.
#[derive(Debug, Clone)]
struct Settings {
    request_id_key: HeaderName,
    rate_limit: GlobalRateLimitConfig,
    request_timeout: Duration,
}

/// One consistent view of the configuration.
#[derive(Debug)]
struct Snapshot {
    table: RouteTable,
    settings: Settings,
}

impl Snapshot {
    fn build(config: &GatewayConfig) -> Result<Self, Vec<ValidationError>> {
        let table = build_route_table(config)?;
        let request_id_key = HeaderName::from_bytes(config.global.request_id_key.as_bytes()).map_err(|_| {
            vec![ValidationError::Field {
                field: "global.request_id_key",
                message: "invalid header name".into(),
            }]
        })?;

        Ok(Self {
            table,
            settings: Settings {
                request_id_key,
                rate_limit: config.global.rate_limit.clone(),
                request_timeout: Duration::from_millis(config.timeouts.request_ms),
            },
        })
    }
}

/// The request-processing core.
pub struct Gateway {
    snapshot: ArcSwap<Snapshot>,
    state: RouteStateRegistry,
    dispatcher: Arc<dyn Dispatcher>,
    authenticator: Arc<dyn Authenticator>,
}

impl Gateway {
    /// Build the gateway from a configuration. Bounds of the response cache
    /// are fixed here and not changed by later reloads.
    pub fn new(
        config: &GatewayConfig,
        dispatcher: Arc<dyn Dispatcher>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, Vec<ValidationError>> {
        let snapshot = Snapshot::build(config)?;
        tracing::info!(routes = snapshot.table.len(), "Route table loaded");

        let state = RouteStateRegistry::new(
            config.maintenance.cache_max_entries,
            config.maintenance.cache_max_entry_bytes,
        );
        state.reconcile(&snapshot.table);

        Ok(Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            state,
            dispatcher,
            authenticator,
        })
    }

    /// Validate and install a new configuration. On error the active table
    /// stays in force.
    pub fn reload(&self, config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
        let snapshot = match Snapshot::build(config) {
            Ok(snapshot) => snapshot,
            Err(errors) => {
                tracing::error!(errors = errors.len(), "Rejected route table reload");
                return Err(errors);
            }
        };

        let routes = snapshot.table.len();
        self.snapshot.store(Arc::new(snapshot));
        self.state.reconcile(&self.snapshot.load().table);
        tracing::info!(routes, "Route table reloaded");
        Ok(())
    }

    pub fn state(&self) -> &RouteStateRegistry {
        &self.state
    }

    /// Current route table.
    pub fn routes(&self) -> Vec<Arc<RouteRule>> {
        self.snapshot.load().table.rules().to_vec()
    }

    /// Drop every cached response tagged with `region`.
    pub fn clear_cache_region(&self, region: &str) -> usize {
        let removed = self.state.cache.clear_region(region);
        tracing::info!(region, removed, "Cache region cleared");
        removed
    }

    /// Process one request to completion.
    pub async fn handle(&self, request: InboundRequest) -> GatewayResponse {
        let started = Instant::now();
        let snapshot = self.snapshot.load_full();

        let route = match find_route(&snapshot.table, &request.method, &request.path) {
            Ok(route) => route,
            Err(error) => {
                tracing::debug!(method = %request.method, path = %request.path, "No route matched");
                let request_id = resolve_request_id(&request.headers, &snapshot.settings.request_id_key);
                let mut response = error_response(&snapshot.settings, &error);
                set_header(&mut response.headers, &snapshot.settings.request_id_key, &request_id);
                metrics::record_request("unmatched", response.status.as_u16(), started);
                return response;
            }
        };

        let rule = route.rule.clone();
        let id_key = match &rule.request_id_key {
            Some(key) => HeaderName::from_bytes(key.as_bytes())
                .unwrap_or_else(|_| snapshot.settings.request_id_key.clone()),
            None => snapshot.settings.request_id_key.clone(),
        };
        let request_id = resolve_request_id(&request.headers, &id_key);

        let span = tracing::debug_span!("request", route = %rule.name, request_id = %request_id);
        let result = self
            .process(&snapshot.settings, &route, request, &id_key, &request_id)
            .instrument(span)
            .await;

        let mut response = match result {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(route = %rule.name, request_id = %request_id, error = %error, "Request failed");
                error_response(&snapshot.settings, &error)
            }
        };
        set_header(&mut response.headers, &id_key, &request_id);
        metrics::record_request(&rule.name, response.status.as_u16(), started);
        response
    }

    async fn process(
        &self,
        settings: &Settings,
        route: &DownstreamRoute,
        request: InboundRequest,
        id_key: &HeaderName,
        request_id: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        let rule = &route.rule;
        let (path, query) = replacer::replace(route, request.query.as_deref());
        tracing::debug!(method = %request.method, downstream = %path, "Route matched");

        let identity = self.authenticator.authenticate(&request).await;
        let client = client_id(&request.headers, &settings.rate_limit.client_id_header, request.client_addr);

        let InboundRequest {
            method,
            mut headers,
            body,
            client_addr,
            ..
        } = request;
        headers::prepare_outbound(&mut headers, client_addr);
        set_header(&mut headers, id_key, request_id);

        let mut downstream = DownstreamRequest {
            method,
            scheme: rule.scheme.clone(),
            path,
            query,
            headers,
            body,
            claims: Vec::new(),
        };
        claims::apply(&rule.claims, identity.as_ref(), &mut downstream)?;

        let decision = self.state.limiter.check(rule, &client)?;

        let mut response = self.fetch(rule, downstream, settings.request_timeout).await?;

        if let RateLimitDecision::Allowed {
            limit,
            remaining,
            reset,
        } = decision
        {
            if !settings.rate_limit.disable_rate_limit_headers {
                response.headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(limit));
                response.headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
                response
                    .headers
                    .insert(X_RATE_LIMIT_RESET, HeaderValue::from(retry_after_secs(reset)));
            }
        }
        Ok(response)
    }

    /// Cache stage: serve a live entry, otherwise dispatch and store.
    async fn fetch(
        &self,
        rule: &RouteRule,
        request: DownstreamRequest,
        default_timeout: Duration,
    ) -> Result<GatewayResponse, GatewayError> {
        let Some(policy) = rule.cache.as_ref().filter(|p| p.applies_to(&request.method)) else {
            return self.forward(rule, request, default_timeout).await;
        };

        let key = policy.key(
            &rule.key,
            &request.method,
            &request.path,
            request.query.as_deref(),
            &request.headers,
        );
        let cache = &self.state.cache;

        if let Some(hit) = cache.get(&key) {
            metrics::record_cache_lookup(&rule.name, "hit");
            return Ok(hit);
        }

        let leader = match cache.join(&key) {
            Flight::Leader(leader) => leader,
            Flight::Follower(follower) => {
                if let Some(outcome) = follower.outcome().await {
                    metrics::record_cache_lookup(&rule.name, "coalesced");
                    return outcome;
                }
                // Leader cancelled before finishing
                return self.forward(rule, request, default_timeout).await;
            }
        };

        if let Some(hit) = cache.get(&key) {
            metrics::record_cache_lookup(&rule.name, "hit");
            leader.complete(&Ok(hit.clone()));
            return Ok(hit);
        }
        metrics::record_cache_lookup(&rule.name, "miss");

        let outcome = self.forward(rule, request, default_timeout).await;
        if let Ok(response) = &outcome {
            if response.status.is_success() {
                if let Err(error) = cache.insert(key, &policy.region, response.clone(), policy.ttl) {
                    tracing::warn!(route = %rule.name, error = %error, "Response not cached");
                    metrics::record_cache_lookup(&rule.name, "store_failed");
                }
            }
        }
        leader.complete(&outcome);
        outcome
    }

    /// Lease a host and dispatch under the route's breaker or the default
    /// deadline. The lease is released when this returns or is cancelled.
    async fn forward(
        &self,
        rule: &RouteRule,
        request: DownstreamRequest,
        default_timeout: Duration,
    ) -> Result<GatewayResponse, GatewayError> {
        let lease = self.state.balancers.lease(rule)?;
        tracing::debug!(route = %rule.name, host = %lease.host, "Dispatching");

        let call = self.dispatcher.dispatch(request, &lease.host);
        match self.state.breakers.get(rule) {
            Some(breaker) => breaker.call(call, counts_as_failure).await,
            None => match tokio::time::timeout(default_timeout, call).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(route = %rule.name, host = %lease.host, "Downstream call timed out");
                    Err(GatewayError::DownstreamTimeout(default_timeout))
                }
            },
        }
    }

    /// Periodically purge expired cache entries and idle rate counters.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = gateway.state.sweep();
                        tracing::debug!(
                            expired_cache_entries = report.expired_cache_entries,
                            idle_rate_counters = report.idle_rate_counters,
                            "Maintenance sweep"
                        );
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Maintenance task stopped");
                        break;
                    }
                }
            }
        })
    }
}

/// Downstream failures that the breaker counts. Status codes never do.
fn counts_as_failure(error: &GatewayError) -> bool {
    matches!(
        error,
        GatewayError::DownstreamConnection(_) | GatewayError::DownstreamTimeout(_)
    )
}

/// Inbound identifier if present, otherwise a fresh UUID.
fn resolve_request_id(headers: &HeaderMap, key: &HeaderName) -> String {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn set_header(headers: &mut HeaderMap, key: &HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(key.clone(), value);
    }
}

fn error_response(settings: &Settings, error: &GatewayError) -> GatewayResponse {
    let mut response = error.to_response();
    if matches!(error, GatewayError::RateLimitExceeded { .. })
        && !settings.rate_limit.quota_exceeded_message.is_empty()
    {
        response.body = settings.rate_limit.quota_exceeded_message.clone().into();
        response.headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
    }
    response
}

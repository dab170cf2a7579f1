//! Downstream collaborators: the dispatcher that performs the network call
//! and the authenticator that resolves the caller identity.
//!
//! # Design Decisions
//! - Both are traits so the pipeline can run against in-process fakes
//! - The dispatcher maps transport failures to `DownstreamConnection`; the
//!   deadline is applied around it by the pipeline, not inside it

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::error::GatewayError;
use crate::load_balancer::ServiceHostAndPort;
use crate::pipeline::request::{DownstreamRequest, GatewayResponse, Identity, InboundRequest};
use crate::security::headers;

/// Performs one downstream call.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        request: DownstreamRequest,
        host: &ServiceHostAndPort,
    ) -> Result<GatewayResponse, GatewayError>;
}

/// Resolves the caller identity, once per request.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &InboundRequest) -> Option<Identity>;
}

/// Treats every caller as anonymous.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousAuthenticator;

#[async_trait]
impl Authenticator for AnonymousAuthenticator {
    async fn authenticate(&self, _request: &InboundRequest) -> Option<Identity> {
        None
    }
}

/// HTTP/1.1 dispatcher over a pooled hyper client.
#[derive(Clone)]
pub struct HttpDispatcher {
    client: Client<HttpConnector, Body>,
    max_body_size: usize,
}

impl HttpDispatcher {
    pub fn new(max_body_size: usize) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(5)));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            max_body_size,
        }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        request: DownstreamRequest,
        host: &ServiceHostAndPort,
    ) -> Result<GatewayResponse, GatewayError> {
        let uri: Uri = format!("{}://{}{}", request.scheme, host, request.path_and_query())
            .parse()
            .map_err(|e| GatewayError::DownstreamConnection(format!("invalid downstream uri: {}", e)))?;

        let mut outbound = Request::builder()
            .method(request.method)
            .uri(uri)
            .body(Body::from(request.body))
            .map_err(|e| GatewayError::DownstreamConnection(e.to_string()))?;
        *outbound.headers_mut() = request.headers;

        let response: Response<Incoming> = self.client.request(outbound).await.map_err(|e| {
            tracing::error!(host = %host, error = %e, "Downstream request failed");
            GatewayError::DownstreamConnection(e.to_string())
        })?;

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(body), self.max_body_size)
            .await
            .map_err(|e| GatewayError::DownstreamConnection(format!("reading response body: {}", e)))?;

        let mut headers = parts.headers;
        headers::strip_hop_by_hop(&mut headers);
        headers.remove(axum::http::header::CONTENT_LENGTH);

        Ok(GatewayResponse {
            status: parts.status,
            headers,
            body,
        })
    }
}

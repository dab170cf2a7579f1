//! Claims authorization and projection.
//!
//! # Responsibilities
//! - Reject anonymous callers on routes that need an identity (401)
//! - Reject identities missing a required claim or value (403)
//! - Copy explicitly mapped claims onto the outbound request as headers,
//!   query parameters or downstream claims
//!
//! # Design Decisions
//! - Whitelist only: a claim reaches the downstream request through a mapping
//!   or not at all
//! - Mapped header names and query keys are always cleared from the inbound
//!   copy, so a caller cannot spoof a projected value
//! - Query pairs other than the projected ones are kept byte for byte
//! - Anonymous callers on open routes skip projection entirely

use axum::http::{HeaderName, HeaderValue};
use url::form_urlencoded;

use crate::config::{ClaimDestination, ClaimMappingConfig, ClaimsOptions};
use crate::error::GatewayError;
use crate::pipeline::request::{Claim, DownstreamRequest, Identity};

/// Authorize `identity` for the route and project its mapped claims.
pub fn apply(
    options: &ClaimsOptions,
    identity: Option<&Identity>,
    request: &mut DownstreamRequest,
) -> Result<(), GatewayError> {
    for mapping in &options.mappings {
        match mapping.destination {
            ClaimDestination::Header => {
                if let Ok(name) = HeaderName::from_bytes(mapping.key.as_bytes()) {
                    request.headers.remove(name);
                }
            }
            ClaimDestination::Query => {
                request.query = strip_query_key(request.query.as_deref(), &mapping.key);
            }
            ClaimDestination::Claim => {}
        }
    }

    authorize(options, identity)?;

    match identity {
        Some(identity) => project(&options.mappings, identity, request),
        None => Ok(()),
    }
}

/// Check authentication and required claims.
pub fn authorize(options: &ClaimsOptions, identity: Option<&Identity>) -> Result<(), GatewayError> {
    let needs_identity = options.requires_auth || !options.required.is_empty();
    let Some(identity) = identity else {
        return if needs_identity {
            Err(GatewayError::Unauthorized)
        } else {
            Ok(())
        };
    };

    for required in &options.required {
        let mut values = identity.values(&required.claim).peekable();
        if values.peek().is_none() {
            return Err(GatewayError::Forbidden(format!("missing claim {}", required.claim)));
        }
        if !required.values.is_empty() && !values.any(|v| required.values.iter().any(|a| a == v)) {
            return Err(GatewayError::Forbidden(format!(
                "claim {} has no accepted value",
                required.claim
            )));
        }
    }
    Ok(())
}

fn project(
    mappings: &[ClaimMappingConfig],
    identity: &Identity,
    request: &mut DownstreamRequest,
) -> Result<(), GatewayError> {
    for mapping in mappings {
        let value = extract(mapping, identity)?;
        match mapping.destination {
            ClaimDestination::Header => {
                let name = HeaderName::from_bytes(mapping.key.as_bytes())
                    .map_err(|_| GatewayError::Forbidden(format!("invalid header name {}", mapping.key)))?;
                let value = HeaderValue::from_str(&value).map_err(|_| {
                    GatewayError::Forbidden(format!("claim {} is not a valid header value", mapping.claim))
                })?;
                request.headers.insert(name, value);
            }
            ClaimDestination::Query => {
                request.query = Some(replace_query_pair(request.query.as_deref(), &mapping.key, &value));
            }
            ClaimDestination::Claim => {
                request.claims.retain(|c| c.kind != mapping.key);
                request.claims.push(Claim::new(mapping.key.clone(), value));
            }
        }
    }
    Ok(())
}

/// Resolve a mapping's value, splitting on the delimiter when configured.
fn extract(mapping: &ClaimMappingConfig, identity: &Identity) -> Result<String, GatewayError> {
    let raw = identity
        .values(&mapping.claim)
        .next()
        .ok_or_else(|| GatewayError::Forbidden(format!("missing claim {}", mapping.claim)))?;

    match &mapping.delimiter {
        None => Ok(raw.to_string()),
        Some(delimiter) => {
            let index = mapping.index.unwrap_or(0);
            raw.split(delimiter.as_str())
                .nth(index)
                .map(str::to_string)
                .ok_or_else(|| {
                    GatewayError::Forbidden(format!("claim {} has no element {}", mapping.claim, index))
                })
        }
    }
}

/// Set `key=value` in a query string, dropping existing pairs with that key.
fn replace_query_pair(query: Option<&str>, key: &str, value: &str) -> String {
    let mut out = strip_query_key(query, key).unwrap_or_default();
    if !out.is_empty() {
        out.push('&');
    }
    out.push_str(&form_urlencoded::Serializer::new(String::new()).append_pair(key, value).finish());
    out
}

/// Raw pairs of `query` whose decoded key is not `key`, or `None` if none
/// remain.
fn strip_query_key(query: Option<&str>, key: &str) -> Option<String> {
    let kept: Vec<&str> = query?
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            !form_urlencoded::parse(pair.as_bytes())
                .next()
                .is_some_and(|(k, _)| k == key)
        })
        .collect();
    (!kept.is_empty()).then(|| kept.join("&"))
}

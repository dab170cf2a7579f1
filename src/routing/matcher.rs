//! Route matching logic.
//!
//! # Responsibilities
//! - Filter rules by method (explicit set or any)
//! - Match the full path against each compiled upstream pattern
//! - Pick the most specific match and extract its placeholder values
//!
//! # Design Decisions
//! - Most literal characters wins; registration order breaks ties
//! - Matching runs against a single table snapshot, so a concurrent reload
//!   can never mix old and new rules within one decision
//! - Explicit RouteNotFound rather than silent default

use std::sync::Arc;

use axum::http::Method;

use crate::error::GatewayError;
use crate::routing::table::{RouteRule, RouteTable};
use crate::routing::template::PlaceholderValues;

/// A matched rule plus the values one request bound to its placeholders.
#[derive(Debug, Clone)]
pub struct DownstreamRoute {
    pub rule: Arc<RouteRule>,
    pub placeholders: PlaceholderValues,
}

/// Find the most specific rule for `method` and `path`.
pub fn find_route(table: &RouteTable, method: &Method, path: &str) -> Result<DownstreamRoute, GatewayError> {
    let mut best: Option<DownstreamRoute> = None;

    for rule in table.rules() {
        if !rule.methods.accepts(method) {
            continue;
        }
        let Some(placeholders) = rule.upstream.captures(path) else {
            continue;
        };

        // Rules are visited in registration order, so only a strictly more
        // specific rule may replace the current best.
        let better = match &best {
            None => true,
            Some(current) => rule.upstream.literal_len() > current.rule.upstream.literal_len(),
        };
        if better {
            best = Some(DownstreamRoute {
                rule: rule.clone(),
                placeholders,
            });
        }
    }

    best.ok_or_else(|| GatewayError::RouteNotFound {
        method: method.to_string(),
        path: path.to_string(),
    })
}

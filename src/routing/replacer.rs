//! Downstream path construction.
//!
//! Substitutes the values captured by the route matcher into the downstream
//! template. Segment placeholders are normalized and percent-encoded; catch-all
//! placeholders are inserted verbatim, separators included. The inbound query
//! string is carried over unchanged.

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, CONTROLS};

use crate::routing::matcher::DownstreamRoute;
use crate::routing::template::{parse, TemplateError, Token, UpstreamPattern};

/// Characters escaped inside a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Error raised while checking a downstream template against its upstream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplaceError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("downstream template references undeclared placeholder {{{0}}}")]
    Undeclared(String),
}

/// Parsed downstream template, checked against its upstream at load time.
#[derive(Debug, Clone)]
pub struct DownstreamTemplate {
    template: String,
    tokens: Vec<Token>,
}

impl DownstreamTemplate {
    /// Parse `template`, rejecting any placeholder `upstream` does not declare.
    pub fn compile(template: &str, upstream: &UpstreamPattern) -> Result<Self, ReplaceError> {
        if !template.starts_with('/') {
            return Err(TemplateError::NotAbsolute(template.to_string()).into());
        }
        let tokens = parse(template)?;
        for token in &tokens {
            if let Some(name) = token.name() {
                if upstream.binding(name).is_none() {
                    return Err(ReplaceError::Undeclared(name.to_string()));
                }
            }
        }
        Ok(Self {
            template: template.to_string(),
            tokens,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

/// Resolve the downstream path and query for a matched route.
///
/// Returns `(path, query)`; host and port are resolved later by the load
/// balancer.
pub fn replace(route: &DownstreamRoute, query: Option<&str>) -> (String, Option<String>) {
    let mut path = String::with_capacity(route.rule.downstream.template.len());

    for token in &route.rule.downstream.tokens {
        match token {
            Token::Literal(text) => path.push_str(text),
            Token::Placeholder(name) | Token::CatchAll(name) => {
                // Declared placeholders always bind, checked at load time.
                let Some(bound) = route.placeholders.get(name) else {
                    continue;
                };
                if bound.catch_all {
                    path.push_str(&bound.value);
                } else {
                    // Bytes, not UTF-8: ids that are not text must survive.
                    let decoded: Vec<u8> = percent_decode_str(&bound.value).collect();
                    path.extend(percent_encode(&decoded, SEGMENT));
                }
            }
        }
    }

    let query = query.filter(|q| !q.is_empty()).map(str::to_string);
    (path, query)
}

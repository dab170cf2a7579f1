//! Path template parsing and compilation.
//!
//! # Syntax
//! - `{name}` binds one path segment (one or more non-`/` characters)
//! - `{*name}` binds the remainder of the path, separators included; only
//!   allowed as the final token
//! - everything else is literal text
//!
//! Upstream templates compile once into an anchored regex with one positional
//! capture group per placeholder. Specificity is the number of literal
//! characters in the template.

use regex_lite::Regex;

/// A single token of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Placeholder(String),
    CatchAll(String),
}

impl Token {
    /// Placeholder name, if this token binds a value.
    pub fn name(&self) -> Option<&str> {
        match self {
            Token::Literal(_) => None,
            Token::Placeholder(name) | Token::CatchAll(name) => Some(name),
        }
    }
}

/// Template syntax error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template must start with '/': {0:?}")]
    NotAbsolute(String),
    #[error("unbalanced braces in {0:?}")]
    Unbalanced(String),
    #[error("empty placeholder name in {0:?}")]
    EmptyName(String),
    #[error("placeholder {{{name}}} declared twice")]
    Duplicate { name: String },
    #[error("catch-all placeholder {{*{name}}} must be the last token")]
    CatchAllNotLast { name: String },
    #[error("invalid pattern: {0}")]
    Pattern(String),
}

/// Split a template into literal and placeholder tokens.
pub fn parse(template: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    match n {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err(TemplateError::Unbalanced(template.to_string())),
                        other => name.push(other),
                    }
                }
                if !closed {
                    return Err(TemplateError::Unbalanced(template.to_string()));
                }

                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }

                let token = match name.strip_prefix('*') {
                    Some(rest) => Token::CatchAll(rest.trim().to_string()),
                    None => Token::Placeholder(name.trim().to_string()),
                };
                if token.name().is_some_and(str::is_empty) {
                    return Err(TemplateError::EmptyName(template.to_string()));
                }
                tokens.push(token);
            }
            '}' => return Err(TemplateError::Unbalanced(template.to_string())),
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

/// Compiled upstream template.
#[derive(Debug, Clone)]
pub struct UpstreamPattern {
    template: String,
    regex: Regex,
    /// (name, catch_all) per capture group, in group order.
    bindings: Vec<(String, bool)>,
    literal_len: usize,
}

impl UpstreamPattern {
    /// Compile a template into an anchored pattern.
    pub fn compile(template: &str, case_sensitive: bool) -> Result<Self, TemplateError> {
        if !template.starts_with('/') {
            return Err(TemplateError::NotAbsolute(template.to_string()));
        }

        let tokens = parse(template)?;
        let mut pattern = String::from(if case_sensitive { "^" } else { "(?i)^" });
        let mut bindings: Vec<(String, bool)> = Vec::new();
        let mut literal_len = 0;

        for (i, token) in tokens.iter().enumerate() {
            if let Some(name) = token.name() {
                if bindings.iter().any(|(n, _)| n == name) {
                    return Err(TemplateError::Duplicate {
                        name: name.to_string(),
                    });
                }
            }
            match token {
                Token::Literal(text) => {
                    literal_len += text.chars().count();
                    pattern.push_str(&regex_lite::escape(text));
                }
                Token::Placeholder(name) => {
                    pattern.push_str("([^/]+)");
                    bindings.push((name.clone(), false));
                }
                Token::CatchAll(name) => {
                    if i + 1 != tokens.len() {
                        return Err(TemplateError::CatchAllNotLast { name: name.clone() });
                    }
                    pattern.push_str("(.*)");
                    bindings.push((name.clone(), true));
                }
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| TemplateError::Pattern(e.to_string()))?;

        Ok(Self {
            template: template.to_string(),
            regex,
            bindings,
            literal_len,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Number of literal characters; higher means more specific.
    pub fn literal_len(&self) -> usize {
        self.literal_len
    }

    /// Whether a placeholder of this name is declared (and if it is a catch-all).
    pub fn binding(&self, name: &str) -> Option<bool> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, catch_all)| *catch_all)
    }

    /// Match the full path, returning the captured placeholder values.
    pub fn captures(&self, path: &str) -> Option<PlaceholderValues> {
        let caps = self.regex.captures(path)?;
        let values = self
            .bindings
            .iter()
            .enumerate()
            .map(|(i, (name, catch_all))| PlaceholderValue {
                name: name.clone(),
                value: caps
                    .get(i + 1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                catch_all: *catch_all,
            })
            .collect();
        Some(PlaceholderValues(values))
    }
}

/// A value bound to a placeholder by one match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderValue {
    pub name: String,
    /// Exactly the substring consumed by the capture group.
    pub value: String,
    pub catch_all: bool,
}

/// Placeholder name to value map extracted from one request path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderValues(Vec<PlaceholderValue>);

impl PlaceholderValues {
    pub fn get(&self, name: &str) -> Option<&PlaceholderValue> {
        self.0.iter().find(|v| v.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaceholderValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

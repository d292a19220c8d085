//! CoRE Link-Format (RFC 6690) parser
//!
//! A document is a comma separated list of link-values. Each link-value is a
//! `<uri-reference>` followed by `;name=value` attributes. Parsing is
//! resilient per entry: a malformed link-value is dropped and its siblings
//! are still returned.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;
use wotdisc_core::error::LinkFormatError;

static URI_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<([^<>]*)>$").expect("URI reference pattern is valid"));

/// One entry of a CoRE Link-Format document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    /// Target URI as written between the angle brackets
    pub uri: String,
    /// Attribute name to its whitespace separated values
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Link {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) an attribute.
    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the value list of an attribute.
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// True if the attribute is present and lists `value`.
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.attribute(name)
            .map(|values| values.iter().any(|v| v == value))
            .unwrap_or(false)
    }

    /// Values of the `rt` attribute
    pub fn resource_types(&self) -> &[String] {
        self.attribute("rt").unwrap_or(&[])
    }

    /// Values of the `ct` attribute
    pub fn content_formats(&self) -> &[String] {
        self.attribute("ct").unwrap_or(&[])
    }
}

/// Canonical form: `<uri>;name="v1 v2"`, attributes in name order.
impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.uri)?;
        for (name, values) in &self.attributes {
            write!(f, ";{}=\"{}\"", name, values.join(" "))?;
        }
        Ok(())
    }
}

/// Parses a Link-Format document, skipping malformed link-values.
pub fn parse(body: &str) -> Vec<Link> {
    let mut links = Vec::new();

    for raw in split_top_level(body, ',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        match parse_link_value(raw) {
            Ok(link) => links.push(link),
            Err(e) => {
                debug!(link_value = raw, error = %e, "Skipping malformed link-value");
            }
        }
    }

    links
}

/// Parses a single link-value. Any malformed attribute rejects the whole entry.
pub fn parse_link_value(raw: &str) -> Result<Link, LinkFormatError> {
    let mut tokens = split_top_level(raw, ';').into_iter();

    let first = tokens.next().unwrap_or_default().trim();
    let uri = URI_REFERENCE
        .captures(first)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| LinkFormatError::InvalidUriReference {
            token: first.to_string(),
        })?;

    let mut link = Link::new(uri);

    for token in tokens {
        let token = token.trim();
        let (name, value) =
            token
                .split_once('=')
                .ok_or_else(|| LinkFormatError::MissingAttributeValue {
                    token: token.to_string(),
                })?;

        let name = name.trim();
        if name.is_empty() {
            return Err(LinkFormatError::EmptyAttributeName {
                token: token.to_string(),
            });
        }

        let values = strip_quotes(value.trim())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        // Last occurrence of a duplicated name wins
        link.attributes.insert(name.to_string(), values);
    }

    Ok(link)
}

/// Serializes links in canonical form, comma separated.
pub fn serialize(links: &[Link]) -> String {
    links
        .iter()
        .map(Link::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Splits on `separator` outside of quoted strings and angle brackets.
fn split_top_level(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut start = 0;

    for (idx, ch) in input.char_indices() {
        match ch {
            '"' if !in_brackets => in_quotes = !in_quotes,
            '<' if !in_quotes => in_brackets = true,
            '>' if !in_quotes => in_brackets = false,
            c if c == separator && !in_quotes && !in_brackets => {
                parts.push(&input[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);

    parts
}

/// Removes one layer of surrounding double quotes.
fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

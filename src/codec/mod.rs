//! Wire codecs
//!
//! Request bodies arrive as JSON or XML and are parsed once into a
//! [`WireInput`], whose `tree` is the same `serde_json::Value` shape for
//! both formats. Responses go the other way: a schema-ordered
//! [`RenderedResource`] is written out in the requested format.

mod json;
mod xml;

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::{CimiError, Result};
use crate::resource::RenderedResource;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid XML: {0}")]
    Xml(String),
    #[error("body must be a single object")]
    NotAnObject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    #[default]
    Json,
    Xml,
}

impl WireFormat {
    /// Format from a `Content-Type`/`Accept` value
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type.split(';').next().unwrap_or("").trim();
        if essence.ends_with("json") {
            Some(Self::Json)
        } else if essence.ends_with("xml") {
            Some(Self::Xml)
        } else {
            None
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml",
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            other => Self::from_media_type(other).ok_or_else(|| format!("Unknown format: {}", s)),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Xml => f.write_str("xml"),
        }
    }
}

/// A request body, parsed once
#[derive(Debug, Clone, PartialEq)]
pub struct WireInput {
    raw: String,
    format: WireFormat,
    tree: Value,
}

impl WireInput {
    pub fn parse(raw: impl Into<String>, format: WireFormat) -> Result<Self> {
        let raw = raw.into();
        let tree = parse(&raw, format)
            .map_err(|e| CimiError::unparsable(format!("unable to parse {} body: {}", format, e), &raw))?;

        Ok(Self { raw, format, tree })
    }

    /// Body exactly as the client sent it
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        lookup(&self.tree, path)
    }

    pub fn str_at(&self, path: &[&str]) -> Option<&str> {
        str_at(&self.tree, path)
    }
}

/// Parse a body into an object tree
pub fn parse(body: &str, format: WireFormat) -> std::result::Result<Value, CodecError> {
    let tree = match format {
        WireFormat::Json => json::parse(body)?,
        WireFormat::Xml => xml::parse(body)?,
    };
    if !tree.is_object() {
        return Err(CodecError::NotAnObject);
    }
    Ok(tree)
}

pub fn render(
    resource: &RenderedResource,
    format: WireFormat,
) -> std::result::Result<String, CodecError> {
    match format {
        WireFormat::Json => json::render(resource),
        WireFormat::Xml => xml::render(resource),
    }
}

/// Walk nested objects
pub fn lookup<'a>(tree: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(tree, |node, key| node.get(*key))
}

/// String leaf at `path`; blank strings count as absent
pub fn str_at<'a>(tree: &'a Value, path: &[&str]) -> Option<&'a str> {
    lookup(tree, path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// `network_interfaces` -> `networkInterfaces`
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

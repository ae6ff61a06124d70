//! Reference Resolver
//!
//! Turns an `href` into the current representation of the resource it
//! points at. Only the trailing path segment matters: it is the backend
//! identifier, looked up in the collection the caller expects.
//!
//! Resolution may recurse (a template references a configuration which the
//! caller resolves next). There is no cycle detection; the context's depth
//! bound stops runaway chains.

use super::instance::ResourceInstance;
use crate::context::Context;
use crate::error::{CimiError, Result};

/// Parsed link: backend identifier plus the collection it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    pub collection: String,
    pub id: String,
}

impl ResourceReference {
    pub fn parse(href: &str, collection: &str) -> Result<Self> {
        Ok(Self {
            collection: collection.to_string(),
            id: Self::trailing_segment(href)?,
        })
    }

    /// Last path segment of `href`, percent-decoded
    pub fn trailing_segment(href: &str) -> Result<String> {
        let malformed = |reason: &str| CimiError::MalformedReference {
            href: href.to_string(),
            reason: reason.to_string(),
        };

        let Some((_, last)) = href.rsplit_once('/') else {
            return Err(malformed("no path separator"));
        };
        if last.is_empty() {
            return Err(malformed("empty identifier segment"));
        }

        urlencoding::decode(last)
            .map(|id| id.into_owned())
            .map_err(|_| malformed("identifier is not valid UTF-8"))
    }
}

/// Resolve `href` against `collection`.
///
/// The reference is parsed and the collection checked before any backend
/// call. `NotFound` propagates as-is; other lookup failures become
/// `ReferenceResolution`.
pub async fn resolve(href: &str, collection: &str, ctx: &Context) -> Result<ResourceInstance> {
    let reference = ResourceReference::parse(href, collection)?;
    let engine = ctx.engine();
    let def = engine.schemas().by_collection(collection)?;

    let Some(nested) = ctx.nested() else {
        return Err(depth_exceeded(href, ctx));
    };

    tracing::debug!(
        "resolve: {} -> {} '{}' (depth {})",
        href,
        def.name,
        reference.id,
        nested.depth()
    );

    match engine.find(&def.name, &reference.id, &nested).await {
        Ok(instance) => Ok(instance),
        Err(
            e @ (CimiError::NotFound { .. }
            | CimiError::Cancelled
            | CimiError::MalformedReference { .. }
            | CimiError::ReferenceResolution { .. }),
        ) => Err(e),
        Err(e) => Err(CimiError::ReferenceResolution {
            href: href.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Resolve a reference found inside an already resolved representation
pub async fn resolve_nested(
    href: &str,
    collection: &str,
    parent: &Context,
) -> Result<ResourceInstance> {
    let Some(nested) = parent.nested() else {
        return Err(depth_exceeded(href, parent));
    };
    resolve(href, collection, &nested).await
}

fn depth_exceeded(href: &str, ctx: &Context) -> CimiError {
    CimiError::ReferenceResolution {
        href: href.to_string(),
        reason: format!("reference depth bound of {} exceeded", ctx.max_depth()),
    }
}

//! CIMI resource model
//!
//! Schema registry, vocabulary tables, resource instances and the
//! request-time services built on them (capability filtering, reference
//! resolution, action dispatch, entity metadata).

pub mod capability;
pub mod dispatch;
pub mod instance;
pub mod metadata;
pub mod reference;
pub mod registry;
pub mod vocabulary;

pub use capability::{CapabilitySet, Operation};
pub use dispatch::{ActionOutcome, OutcomeHandler};
pub use instance::{AttrValue, Link, Record, RenderedResource, ResourceInstance};
pub use metadata::{EntityMetadata, MetadataCollection};
pub use reference::ResourceReference;
pub use registry::{builtin, AttributeDecl, AttributeKind, ResourceDef, SchemaRegistry};
pub use vocabulary::Vocabulary;

//! CIMI bridge
//!
//! Translates between provider-specific backend objects and DMTF CIMI
//! resources. A [`engine::Engine`] holds the schema registry and the
//! per-type mappers; each request gets a [`context::Context`] bound to one
//! [`driver::Driver`] and its credentials.

pub mod codec;
pub mod config;
pub mod context;
pub mod domain;
pub mod driver;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod resource;

pub use context::Context;
pub use engine::{Engine, EngineSettings};
pub use error::{CimiError, Result};

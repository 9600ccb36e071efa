//! # Xmlflow
//!
//! Xmlflow turns XML documents into property graphs. A mapping binds element
//! tags to node labels and attaches a small dataflow of tools and actions to
//! each binding; the engine walks the document and emits a flat array of
//! nodes and relationships.
//!
//! ## Core Features
//!
//! - **Declarative Mappings**: JSON mappings validated against an embedded JSON Schema
//! - **Typed Steps**: tool and action kinds are a closed set with typed configs
//! - **Dataflow Routing**: tool output paths select which downstream steps run
//! - **External Lookups**: fetch tools query authority providers over HTTP
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use xmlflow::EngineBuilder;
//!
//! let engine = EngineBuilder::new().build()?;
//! let mapping = engine.compile(mapping_json)?;
//!
//! let output = engine.transform(xml, &mapping).await;
//! for node in output.nodes() {
//!     println!("{} {:?}", node.primary_label(), node.properties);
//! }
//! ```

mod builder;
mod common;
mod config;
mod engine;
mod error;
mod graph;
mod model;
mod pipeline;
mod runtime;
mod utils;
mod xml;

pub use builder::EngineBuilder;
pub use common::ApiData;
pub use config::{Config, FetchConfig, FetchMode};
pub use engine::{Engine, TransformOutput};
pub use error::XmlflowError;
pub use model::*;
pub use pipeline::{
    Mapping,
    tools::{ApiClient, ApiResponse, Credentials, FetchRequest, HttpApiClient, HttpAuth, HttpCall, HttpMethod},
};

/// Result type alias for Xmlflow operations.
pub type Result<T> = std::result::Result<T, XmlflowError>;

//! XML document arena.
//!
//! Elements are stored in document order and addressed by a stable integer
//! index, so per-element side tables are plain vectors.

mod document;

pub use document::{ElementId, XmlDocument, XmlElement};

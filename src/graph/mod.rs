//! Graph assembly: id allocation, node and relationship arenas, schema-derived
//! labels and relationship types.

mod assembler;
mod schema;

pub use assembler::GraphAssembler;
pub use schema::SchemaIndex;

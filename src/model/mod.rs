mod edge;
mod graph;
mod mapping;
mod schema;
mod step;

pub use edge::EdgeModel;
pub use graph::{GraphNode, GraphRecord, GraphRelationship, NodeId, Properties, RelationshipId};
pub use mapping::{BuilderNode, MappingModel, RelationshipModel};
pub use schema::{SchemaJson, SchemaNode, SchemaProperty, SchemaRelationship};
pub use step::{ActionNodeModel, ToolNodeModel};

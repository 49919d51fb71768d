//! Relationship resolution between registered tables.
//!
//! Reference fields become edges of a [`RelationGraph`]; join requests are
//! answered with the shortest unambiguous path through it.

mod edge;
mod graph;

pub use edge::{Direction, RelationshipEdge};
pub use graph::{PathHint, RelationGraph, UnresolvedEdge};

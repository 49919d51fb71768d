//! Relationship edges.

use std::fmt;

use typedal_proto::JoinCardinality;

/// Direction of an edge relative to the reference field that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From the referencing table to the referenced one.
    BelongsTo,
    /// From the referenced table back to the referencing one.
    HasMany,
}

/// A directed link between two tables.
///
/// `source_field` is always a field of `source_table` and `target_field` a
/// field of `target_table`; joining along the edge matches
/// `source.source_field = target.target_field`. A belongs-to edge starts at
/// the reference field; its mirrored has-many edge ends at it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipEdge {
    /// Table the edge starts from.
    pub source_table: String,
    /// Field of the source table.
    pub source_field: String,
    /// Table the edge leads to.
    pub target_table: String,
    /// Field of the target table.
    pub target_field: String,
    /// Belongs-to or has-many.
    pub direction: Direction,
    /// Whether the reference field behind this edge is nullable.
    pub optional: bool,
    /// Declaration position of the reference field across the registry.
    pub ordinal: usize,
}

impl RelationshipEdge {
    /// One row or many rows per source row.
    pub fn cardinality(&self) -> JoinCardinality {
        match self.direction {
            Direction::BelongsTo => JoinCardinality::One,
            Direction::HasMany => JoinCardinality::Many,
        }
    }

    /// Name of the reference field behind this edge.
    pub fn reference_field(&self) -> &str {
        match self.direction {
            Direction::BelongsTo => &self.source_field,
            Direction::HasMany => &self.target_field,
        }
    }

    /// Table that declares the reference field.
    pub fn referencing_table(&self) -> &str {
        match self.direction {
            Direction::BelongsTo => &self.source_table,
            Direction::HasMany => &self.target_table,
        }
    }

    /// Attribute name joined rows are attached under by default: the
    /// reference field for belongs-to, the referencing table for has-many.
    pub fn attribute(&self) -> &str {
        match self.direction {
            Direction::BelongsTo => &self.source_field,
            Direction::HasMany => &self.target_table,
        }
    }

    /// Whether the edge starts and ends on the same table.
    pub fn is_self_edge(&self) -> bool {
        self.source_table == self.target_table
    }

    /// Whether `via` names this edge: either the bare reference field or
    /// `table.field` of the referencing table.
    pub fn matches_via(&self, via: &str) -> bool {
        match via.split_once('.') {
            Some((table, field)) => {
                table == self.referencing_table() && field == self.reference_field()
            }
            None => via == self.reference_field(),
        }
    }

    /// The same link walked the other way.
    pub fn reversed(&self) -> RelationshipEdge {
        RelationshipEdge {
            source_table: self.target_table.clone(),
            source_field: self.target_field.clone(),
            target_table: self.source_table.clone(),
            target_field: self.source_field.clone(),
            direction: match self.direction {
                Direction::BelongsTo => Direction::HasMany,
                Direction::HasMany => Direction::BelongsTo,
            },
            optional: self.optional,
            ordinal: self.ordinal,
        }
    }
}

impl fmt::Display for RelationshipEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            Direction::BelongsTo => "->",
            Direction::HasMany => "=>",
        };
        write!(
            f,
            "{}.{} {arrow} {}.{}",
            self.source_table, self.source_field, self.target_table, self.target_field
        )
    }
}

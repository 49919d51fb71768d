//! Relationship graph and join path search.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::catalog::TableMetadata;
use crate::error::Error;

use super::edge::{Direction, RelationshipEdge};

/// A reference field whose target table is not registered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedEdge {
    /// Table declaring the reference.
    pub table: String,
    /// Reference field.
    pub field: String,
    /// Missing target table.
    pub target: String,
}

/// Constraints for [`RelationGraph::find_path`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathHint {
    /// Reference field the path must go through, as `field` or `table.field`.
    pub via: Option<String>,
    /// Only walk edges in this direction.
    pub direction: Option<Direction>,
}

impl PathHint {
    /// No constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the path to use a reference field.
    pub fn via(mut self, field: impl Into<String>) -> Self {
        self.via = Some(field.into());
        self
    }

    /// Only walk edges in one direction.
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    fn allows(&self, edge: &RelationshipEdge) -> bool {
        self.direction.map_or(true, |d| edge.direction == d)
    }

    fn accepts(&self, path: &[&RelationshipEdge]) -> bool {
        match &self.via {
            Some(via) => path.iter().any(|e| e.matches_via(via)),
            None => true,
        }
    }
}

/// Directed graph of relationship edges between registered tables.
///
/// Every reference field whose target is registered yields a belongs-to edge
/// and the mirrored has-many edge. Each table's outgoing edges are ordered
/// belongs-to first, then has-many, each in declaration order; that order
/// breaks ties between equally short paths.
#[derive(Debug, Default)]
pub struct RelationGraph {
    tables: HashSet<String>,
    edges: Vec<RelationshipEdge>,
    outgoing: HashMap<String, Vec<usize>>,
    unresolved: Vec<UnresolvedEdge>,
}

impl RelationGraph {
    /// Build the graph for a set of tables.
    pub fn build(tables: &[Arc<TableMetadata>]) -> Self {
        let names: HashSet<String> = tables.iter().map(|t| t.name().to_string()).collect();

        let mut belongs_to = Vec::new();
        let mut unresolved = Vec::new();
        let mut ordinal = 0;

        for table in tables {
            for field in table.references() {
                let Some((target_table, target_field)) = field.kind.reference_target() else {
                    continue;
                };
                if names.contains(target_table) {
                    belongs_to.push(RelationshipEdge {
                        source_table: table.name().to_string(),
                        source_field: field.name.clone(),
                        target_table: target_table.to_string(),
                        target_field: target_field.to_string(),
                        direction: Direction::BelongsTo,
                        optional: field.nullable,
                        ordinal,
                    });
                } else {
                    unresolved.push(UnresolvedEdge {
                        table: table.name().to_string(),
                        field: field.name.clone(),
                        target: target_table.to_string(),
                    });
                }
                ordinal += 1;
            }
        }

        let has_many: Vec<RelationshipEdge> =
            belongs_to.iter().map(RelationshipEdge::reversed).collect();
        let edges: Vec<RelationshipEdge> = belongs_to.into_iter().chain(has_many).collect();

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            outgoing
                .entry(edge.source_table.clone())
                .or_default()
                .push(i);
        }

        Self {
            tables: names,
            edges,
            outgoing,
            unresolved,
        }
    }

    /// Every resolved edge, belongs-to edges first.
    pub fn edges(&self) -> &[RelationshipEdge] {
        &self.edges
    }

    /// Edges leaving a table, in search order.
    pub fn outgoing<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a RelationshipEdge> + 'a {
        self.outgoing
            .get(table)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    /// Belongs-to edges that point at a table: its incoming references.
    pub fn back_references(&self, table: &str) -> Vec<&RelationshipEdge> {
        self.edges
            .iter()
            .filter(|e| e.direction == Direction::BelongsTo && e.target_table == table)
            .collect()
    }

    /// References whose target is not registered.
    pub fn unresolved(&self) -> &[UnresolvedEdge] {
        &self.unresolved
    }

    /// Shortest edge sequence from `from` to `to`.
    ///
    /// Paths never revisit a table. When `from == to` only direct self-edges
    /// qualify. Without `via`, two or more shortest paths are ambiguous; with
    /// `via`, remaining ties go to the earliest declared path. Paths longer
    /// than `max_depth` fail with `JoinTooDeep`.
    pub fn find_path(
        &self,
        from: &str,
        to: &str,
        hint: &PathHint,
        max_depth: usize,
    ) -> Result<Vec<RelationshipEdge>, Error> {
        if !self.tables.contains(from) {
            return Err(Error::UnknownTable(from.to_string()));
        }
        if !self.tables.contains(to) {
            return Err(match self.unresolved.iter().find(|u| u.target == to) {
                Some(u) => unresolved_error(u),
                None => Error::UnknownTable(to.to_string()),
            });
        }

        let path = if from == to {
            self.find_self_edge(from, hint)?
        } else {
            self.search(from, to, hint, max_depth)?
        };

        match path {
            Some(path) => {
                trace!(
                    from,
                    to,
                    hops = path.len(),
                    "resolved relationship path"
                );
                Ok(path.into_iter().cloned().collect())
            }
            None => Err(self.not_found(from, to, hint)),
        }
    }

    fn find_self_edge(
        &self,
        table: &str,
        hint: &PathHint,
    ) -> Result<Option<Vec<&RelationshipEdge>>, Error> {
        let candidates: Vec<&RelationshipEdge> = self
            .outgoing(table)
            .filter(|e| e.is_self_edge() && hint.allows(e) && hint.accepts(&[e]))
            .collect();

        if candidates.len() > 1 && hint.via.is_none() {
            return Err(ambiguous(
                table,
                table,
                candidates.iter().map(|e| vec![*e]).collect(),
            ));
        }
        Ok(candidates.first().map(|e| vec![*e]))
    }

    fn search(
        &self,
        from: &str,
        to: &str,
        hint: &PathHint,
        max_depth: usize,
    ) -> Result<Option<Vec<&RelationshipEdge>>, Error> {
        // Breadth-first over whole paths, so every shortest path is seen and
        // paths come out in edge declaration order.
        let mut frontier: Vec<(Vec<&RelationshipEdge>, Vec<&str>)> = vec![(Vec::new(), vec![from])];

        for depth in 1..=max_depth.saturating_add(1) {
            let mut found = Vec::new();
            let mut next = Vec::new();

            for (path, visited) in &frontier {
                let at = visited.last().copied().unwrap_or(from);
                for edge in self.outgoing(at) {
                    if !hint.allows(edge) || visited.contains(&edge.target_table.as_str()) {
                        continue;
                    }
                    let mut extended = path.clone();
                    extended.push(edge);
                    if edge.target_table == to {
                        if hint.accepts(&extended) {
                            found.push(extended);
                        }
                    } else {
                        let mut seen = visited.clone();
                        seen.push(edge.target_table.as_str());
                        next.push((extended, seen));
                    }
                }
            }

            if !found.is_empty() {
                if depth > max_depth {
                    return Err(Error::JoinTooDeep {
                        depth,
                        max: max_depth,
                    });
                }
                if found.len() > 1 && hint.via.is_none() {
                    return Err(ambiguous(from, to, found));
                }
                return Ok(found.into_iter().next());
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        Ok(None)
    }

    fn not_found(&self, from: &str, to: &str, hint: &PathHint) -> Error {
        let unresolved_via = hint.via.as_deref().and_then(|via| {
            self.unresolved.iter().find(|u| match via.split_once('.') {
                Some((table, field)) => u.table == table && u.field == field,
                None => u.field == via && u.table == from,
            })
        });
        match unresolved_via {
            Some(u) => unresolved_error(u),
            None => Error::NoRelationshipPath {
                from: from.to_string(),
                to: to.to_string(),
            },
        }
    }
}

fn unresolved_error(u: &UnresolvedEdge) -> Error {
    Error::UnresolvedReference {
        table: u.table.clone(),
        field: u.field.clone(),
        target: u.target.clone(),
    }
}

fn ambiguous(from: &str, to: &str, paths: Vec<Vec<&RelationshipEdge>>) -> Error {
    Error::AmbiguousRelationship {
        from: from.to_string(),
        to: to.to_string(),
        candidates: paths
            .iter()
            .map(|path| {
                path.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect(),
    }
}

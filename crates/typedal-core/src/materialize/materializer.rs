//! Raw row to typed row conversion.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use typedal_proto::{JoinCardinality, Query, RawRow, SelectItem, Value, ValueKey};

use crate::catalog::{Snapshot, TableMetadata};
use crate::error::Error;
use crate::mapper;

use super::row::{Related, Row};

/// One table occurrence of a query: the root or a join.
struct Occurrence {
    alias: String,
    table: Arc<TableMetadata>,
    parent: Option<usize>,
    attribute: String,
    cardinality: JoinCardinality,
    children: Vec<usize>,
}

#[derive(Clone)]
enum Target {
    Field { occurrence: usize, field: String },
    Extra(String),
}

/// Column attribution and nesting layout derived from a query.
struct Plan {
    occurrences: Vec<Occurrence>,
    extras: Vec<String>,
    targets: HashMap<String, Target>,
}

impl Plan {
    fn new(query: &Query, snapshot: &Snapshot) -> Result<Self, Error> {
        let mut occurrences = vec![Occurrence {
            alias: query.root.alias.clone(),
            table: snapshot.lookup(&query.root.table)?.clone(),
            parent: None,
            attribute: String::new(),
            cardinality: JoinCardinality::One,
            children: Vec::new(),
        }];

        for join in query.joins.iter() {
            let parent = occurrences
                .iter()
                .position(|o| o.alias == join.parent_alias)
                .ok_or_else(|| Error::UnknownAlias(join.parent_alias.clone()))?;
            let index = occurrences.len();
            occurrences[parent].children.push(index);
            occurrences.push(Occurrence {
                alias: join.alias().to_string(),
                table: snapshot.lookup(&join.target.table)?.clone(),
                parent: Some(parent),
                attribute: join.attribute.clone(),
                cardinality: join.cardinality,
                children: Vec::new(),
            });
        }

        let extras = query
            .selection
            .iter()
            .filter_map(|item| match item {
                SelectItem::Aggregate(agg) => Some(agg.alias.clone()),
                SelectItem::Column(_) => None,
            })
            .collect();

        Ok(Self {
            occurrences,
            extras,
            targets: HashMap::new(),
        })
    }

    fn root_table(&self) -> &str {
        self.occurrences[0].table.name()
    }

    fn target(&mut self, column: &str) -> Result<Target, Error> {
        if let Some(target) = self.targets.get(column) {
            return Ok(target.clone());
        }
        let target = self.attribute(column)?;
        self.targets.insert(column.to_string(), target.clone());
        Ok(target)
    }

    fn attribute(&self, column: &str) -> Result<Target, Error> {
        let fail = |reason: String| Error::Materialization {
            table: self.root_table().to_string(),
            reason,
        };

        if let Some((alias, field)) = column.split_once('.') {
            let occurrence = self
                .occurrences
                .iter()
                .position(|o| o.alias == alias)
                .ok_or_else(|| fail(format!("column {column} names an alias not in the query")))?;
            if !self.occurrences[occurrence].table.has_field(field) {
                return Err(fail(format!("column {column} is not a field of its table")));
            }
            return Ok(Target::Field {
                occurrence,
                field: field.to_string(),
            });
        }

        if self.extras.iter().any(|e| e == column) {
            return Ok(Target::Extra(column.to_string()));
        }

        let owners: Vec<usize> = self
            .occurrences
            .iter()
            .enumerate()
            .filter(|(_, o)| o.table.has_field(column))
            .map(|(i, _)| i)
            .collect();
        match owners.as_slice() {
            [occurrence] => Ok(Target::Field {
                occurrence: *occurrence,
                field: column.to_string(),
            }),
            [] => Err(fail(format!("column {column} matches no table in the query"))),
            _ => Err(fail(format!(
                "column {column} is ambiguous between {}",
                owners
                    .iter()
                    .map(|&i| self.occurrences[i].alias.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// A row under construction.
struct Node {
    occurrence: usize,
    values: Vec<(String, Value)>,
    children: HashMap<usize, Vec<usize>>,
    seen: HashMap<(usize, ValueKey), usize>,
}

impl Node {
    fn new(occurrence: usize, values: Vec<(String, Value)>) -> Self {
        Self {
            occurrence,
            values,
            children: HashMap::new(),
            seen: HashMap::new(),
        }
    }
}

struct Assembler<'a> {
    snapshot: &'a Snapshot,
    plan: Plan,
    nodes: Vec<Node>,
    roots: Vec<(usize, Vec<(String, Value)>)>,
    root_index: HashMap<ValueKey, usize>,
    collapse: bool,
}

impl Assembler<'_> {
    fn add(&mut self, raw: RawRow) -> Result<(), Error> {
        let occurrence_count = self.plan.occurrences.len();
        let mut split: Vec<Vec<(String, Value)>> = vec![Vec::new(); occurrence_count];
        let mut extras = Vec::new();

        for (column, raw_value) in raw.columns {
            match self.plan.target(&column)? {
                Target::Field { occurrence, field } => {
                    let table = &self.plan.occurrences[occurrence].table;
                    let descriptor =
                        mapper::storage_field(table.require_field(&field)?, self.snapshot);
                    let value = mapper::from_backend(&raw_value, &descriptor, table.name())?;
                    split[occurrence].push((field, value));
                }
                Target::Extra(name) => extras.push((name, raw_value)),
            }
        }

        let mut split = split.into_iter();
        let root_values = split.next().unwrap_or_default();
        let root = self.root_node(root_values, extras)?;

        let mut placed: Vec<Option<usize>> = vec![None; occurrence_count];
        placed[0] = Some(root);

        for (offset, values) in split.enumerate() {
            let index = offset + 1;
            let Some(parent) = self.plan.occurrences[index].parent.and_then(|p| placed[p]) else {
                continue;
            };
            placed[index] = self.child_node(parent, index, values);
        }

        Ok(())
    }

    fn root_node(
        &mut self,
        values: Vec<(String, Value)>,
        extras: Vec<(String, Value)>,
    ) -> Result<usize, Error> {
        let table = &self.plan.occurrences[0].table;
        let key = values
            .iter()
            .find(|(name, _)| name == table.primary_key())
            .map(|(_, v)| v);

        if let Some(Value::Null) = key {
            return Err(Error::Materialization {
                table: table.name().to_string(),
                reason: format!("null primary key {}", table.primary_key()),
            });
        }

        let key = key.map(Value::key);
        if self.collapse {
            if let Some(&existing) = key.as_ref().and_then(|k| self.root_index.get(k)) {
                return Ok(existing);
            }
        }

        let node = self.nodes.len();
        self.nodes.push(Node::new(0, values));
        self.roots.push((node, extras));
        if let Some(key) = key {
            self.root_index.entry(key).or_insert(node);
        }
        Ok(node)
    }

    fn child_node(
        &mut self,
        parent: usize,
        occurrence: usize,
        values: Vec<(String, Value)>,
    ) -> Option<usize> {
        let plan = &self.plan.occurrences[occurrence];
        let primary_key = plan.table.primary_key();
        let key = values
            .iter()
            .find(|(name, _)| name == primary_key)
            .map(|(_, v)| v);

        // An outer join with no match yields nulls for every column.
        let absent = match key {
            Some(value) => value.is_null(),
            None => values.iter().all(|(_, v)| v.is_null()),
        };
        if absent {
            return None;
        }

        if plan.cardinality == JoinCardinality::One {
            if let Some(&existing) = self.nodes[parent]
                .children
                .get(&occurrence)
                .and_then(|c| c.first())
            {
                return Some(existing);
            }
        }

        let key = key.map(Value::key);
        if let Some(key) = &key {
            if let Some(&existing) = self.nodes[parent].seen.get(&(occurrence, key.clone())) {
                return Some(existing);
            }
        }

        let node = self.nodes.len();
        self.nodes.push(Node::new(occurrence, values));
        let parent_node = &mut self.nodes[parent];
        parent_node.children.entry(occurrence).or_default().push(node);
        if let Some(key) = key {
            parent_node.seen.insert((occurrence, key), node);
        }
        Some(node)
    }

    fn build(&self, node: usize) -> Row {
        let n = &self.nodes[node];
        let occurrence = &self.plan.occurrences[n.occurrence];
        let mut row = Row::new(occurrence.table.clone(), n.values.clone());

        for &child in &occurrence.children {
            let child_nodes = n.children.get(&child).map(Vec::as_slice).unwrap_or(&[]);
            let child_occurrence = &self.plan.occurrences[child];
            let related = match child_occurrence.cardinality {
                JoinCardinality::One => Related::One(
                    child_nodes
                        .first()
                        .map(|&c| Box::new(self.build(c))),
                ),
                JoinCardinality::Many => {
                    Related::Many(child_nodes.iter().map(|&c| self.build(c)).collect())
                }
            };
            row = row.with_related(child_occurrence.attribute.clone(), related);
        }

        row
    }

    fn finish(self) -> Vec<Row> {
        self.roots
            .iter()
            .map(|(node, extras)| self.build(*node).with_extras(extras.clone()))
            .collect()
    }
}

/// Turn raw backend rows into typed rows.
///
/// Columns are attributed to table occurrences by `alias.field`; a bare name
/// is an aggregate alias or a field owned by exactly one occurrence. When the
/// query has a has-many join, raw rows that share a root primary key collapse
/// into one row whose has-many attributes collect the distinct related rows
/// in backend order. Otherwise every raw row yields one row.
pub fn materialize(
    query: &Query,
    snapshot: &Snapshot,
    raw_rows: Vec<RawRow>,
) -> Result<Vec<Row>, Error> {
    let raw_count = raw_rows.len();
    let mut assembler = Assembler {
        snapshot,
        plan: Plan::new(query, snapshot)?,
        nodes: Vec::new(),
        roots: Vec::new(),
        root_index: HashMap::new(),
        collapse: query.has_many_joins() && !query.is_aggregate(),
    };

    for raw in raw_rows {
        assembler.add(raw)?;
    }

    let rows = assembler.finish();
    debug!(
        table = %query.root.table,
        raw = raw_count,
        rows = rows.len(),
        "materialized rows"
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDescriptor, FieldKind, Registry};
    use typedal_proto::{
        col, AggregateExpr, Join, JoinCondition, JoinKind, TableRef,
    };

    fn registry() -> Registry {
        let registry = Registry::new();
        registry
            .register(
                "author",
                vec![
                    FieldDescriptor::new("id", FieldKind::Integer),
                    FieldDescriptor::new("name", FieldKind::String),
                    FieldDescriptor::new("active", FieldKind::Boolean),
                ],
                None,
            )
            .unwrap();
        registry
            .register(
                "book",
                vec![
                    FieldDescriptor::new("id", FieldKind::Integer),
                    FieldDescriptor::new("title", FieldKind::String),
                    FieldDescriptor::nullable("author", FieldKind::reference("author", "id")),
                ],
                None,
            )
            .unwrap();
        registry
    }

    fn books_of_author() -> Query {
        Query::new("author").with_join(Join {
            target: TableRef::new("book"),
            parent_alias: "author".into(),
            attribute: "books".into(),
            kind: JoinKind::Left,
            cardinality: JoinCardinality::Many,
            on: JoinCondition::Columns {
                left: col("author", "id"),
                right: col("book", "author"),
            },
        })
    }

    fn author_of_book() -> Query {
        Query::new("book").with_join(Join {
            target: TableRef::new("author"),
            parent_alias: "book".into(),
            attribute: "author".into(),
            kind: JoinKind::Left,
            cardinality: JoinCardinality::One,
            on: JoinCondition::Columns {
                left: col("book", "author"),
                right: col("author", "id"),
            },
        })
    }

    fn author_book_row(author: i64, book: Option<i64>) -> RawRow {
        RawRow::from_pairs([
            ("author.id", Value::Int(author)),
            ("author.name", Value::Text(format!("a{author}"))),
            ("author.active", Value::Int(1)),
            ("book.id", book.map_or(Value::Null, Value::Int)),
            (
                "book.title",
                book.map_or(Value::Null, |b| Value::Text(format!("b{b}"))),
            ),
        ])
    }

    #[test]
    fn test_has_many_collapses_by_root_key() {
        let registry = registry();
        let raw = vec![
            author_book_row(7, Some(3)),
            author_book_row(7, Some(1)),
            author_book_row(8, None),
            author_book_row(7, Some(2)),
            author_book_row(7, Some(1)),
        ];

        let rows = materialize(&books_of_author(), &registry.snapshot(), raw).unwrap();
        assert_eq!(rows.len(), 2);

        let books: Vec<&Value> = rows[0]
            .related_many("books")
            .iter()
            .map(|b| b.key())
            .collect();
        assert_eq!(books, vec![&Value::Int(3), &Value::Int(1), &Value::Int(2)]);
        assert_eq!(rows[0].get("active"), Some(&Value::Bool(true)));

        assert_eq!(rows[1].key(), &Value::Int(8));
        assert!(rows[1].related_many("books").is_empty());
        assert!(matches!(rows[1].related("books"), Some(Related::Many(_))));
    }

    #[test]
    fn test_belongs_to_nests_single_row() {
        let registry = registry();
        let raw = vec![
            RawRow::from_pairs([
                ("book.id", Value::Int(10)),
                ("book.author", Value::Int(1)),
                ("author.id", Value::Int(1)),
                ("author.name", Value::Text("Ada".into())),
            ]),
            RawRow::from_pairs([
                ("book.id", Value::Int(11)),
                ("book.author", Value::Null),
                ("author.id", Value::Null),
                ("author.name", Value::Null),
            ]),
        ];

        let rows = materialize(&author_of_book(), &registry.snapshot(), raw).unwrap();
        assert_eq!(rows.len(), 2);
        let author = rows[0].related_one("author").unwrap();
        assert_eq!(author.get("name"), Some(&Value::Text("Ada".into())));
        assert_eq!(author.table_name(), "author");
        assert!(rows[1].related_one("author").is_none());
    }

    #[test]
    fn test_bare_column_names() {
        let registry = registry();
        let raw = vec![RawRow::from_pairs([
            ("id", Value::Int(10)),
            ("title", Value::Text("X".into())),
        ])];
        let err = materialize(&author_of_book(), &registry.snapshot(), raw).unwrap_err();
        assert!(matches!(err, Error::Materialization { ref reason, .. } if reason.contains("ambiguous")));

        let raw = vec![RawRow::from_pairs([("title", Value::Text("X".into()))])];
        let rows = materialize(&author_of_book(), &registry.snapshot(), raw).unwrap();
        assert_eq!(rows[0].get("title"), Some(&Value::Text("X".into())));

        let raw = vec![RawRow::from_pairs([("pages", Value::Int(3))])];
        assert!(matches!(
            materialize(&author_of_book(), &registry.snapshot(), raw),
            Err(Error::Materialization { .. })
        ));
    }

    #[test]
    fn test_null_root_key_rejected() {
        let registry = registry();
        let raw = vec![author_book_row(7, Some(3)), RawRow::from_pairs([("author.id", Value::Null)])];
        let err = materialize(&books_of_author(), &registry.snapshot(), raw).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_corrupt_value_rejected() {
        let registry = registry();
        let raw = vec![RawRow::from_pairs([
            ("author.id", Value::Int(1)),
            ("author.active", Value::Text("yes".into())),
        ])];
        assert!(matches!(
            materialize(&Query::new("author"), &registry.snapshot(), raw),
            Err(Error::DataCorruption { .. })
        ));
    }

    #[test]
    fn test_aggregate_extras() {
        let registry = registry();
        let query = Query::new("book")
            .with_selection(vec![
                SelectItem::Column(col("book", "author")),
                SelectItem::Aggregate(AggregateExpr::count_all("books")),
            ])
            .with_group_by(col("book", "author"));
        let raw = vec![
            RawRow::from_pairs([("book.author", Value::Int(1)), ("books", Value::Int(2))]),
            RawRow::from_pairs([("book.author", Value::Int(2)), ("books", Value::Int(5))]),
        ];

        let rows = materialize(&query, &registry.snapshot(), raw).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].extra("books"), Some(&Value::Int(5)));
        assert_eq!(rows[1].key(), &Value::Null);
    }
}

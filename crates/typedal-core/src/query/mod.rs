//! Query building.
//!
//! A [`QueryBuilder`] is obtained from [`crate::Database::table`] or
//! [`crate::Database::query`] and refined through chained calls that each
//! return a new builder.

mod builder;
mod column;
mod options;

pub use builder::QueryBuilder;
pub use column::IntoColumn;
pub use options::JoinOptions;

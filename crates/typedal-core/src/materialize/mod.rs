//! Turning raw backend rows into typed, nested rows.

mod materializer;
mod row;
mod rows;

pub use materializer::materialize;
pub use row::{Related, Row};
pub use rows::TypedRows;

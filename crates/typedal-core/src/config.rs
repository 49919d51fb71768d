//! Query-layer configuration.

use serde::Deserialize;
use typedal_proto::JoinKind;

/// Default limit on the number of hops a single `join` call may traverse.
pub const DEFAULT_MAX_JOIN_DEPTH: usize = 4;

/// Behavior switches for the query layer.
///
/// All fields have defaults, so embedding applications can deserialize a
/// partial table from their own configuration source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DalConfig {
    /// Join kind used when a join call does not name one.
    ///
    /// `None` picks per edge: left for has-many and nullable belongs-to
    /// references, inner for required belongs-to references.
    pub default_join: Option<JoinKind>,

    /// Make `first()` fail with `NotFound` instead of returning `None`.
    pub strict_first: bool,

    /// Maximum number of edges a single join call may traverse.
    pub max_join_depth: usize,
}

impl DalConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            default_join: None,
            strict_first: false,
            max_join_depth: DEFAULT_MAX_JOIN_DEPTH,
        }
    }

    /// Force one join kind for every join that does not name its own.
    pub fn with_default_join(mut self, kind: JoinKind) -> Self {
        self.default_join = Some(kind);
        self
    }

    /// Set whether `first()` fails on an empty result.
    pub fn with_strict_first(mut self, strict: bool) -> Self {
        self.strict_first = strict;
        self
    }

    /// Set the maximum join depth.
    pub fn with_max_join_depth(mut self, depth: usize) -> Self {
        self.max_join_depth = depth;
        self
    }
}

impl Default for DalConfig {
    fn default() -> Self {
        Self::new()
    }
}

use std::fmt;
use std::str::FromStr;

use common_exception::{ErrorCode, Result};

use crate::join::spatial_predicate::SpatialPredicate;

/// Default minimum number of indexed features for building a packed R-tree.
/// Smaller inputs are scanned linearly.
pub const DEFAULT_LINEAR_SCAN_THRESHOLD: usize = 64;

/// Default suffix for colliding left column names.
pub const DEFAULT_LEFT_SUFFIX: &str = "left";

/// Default suffix for colliding right column names.
pub const DEFAULT_RIGHT_SUFFIX: &str = "right";

/// Join mode (`how`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinType {
    /// Every left feature appears at least once; unmatched ones with a null
    /// right side.
    #[default]
    Left,
    /// Every right feature appears at least once; unmatched ones with a null
    /// left side.
    Right,
    /// Only matched pairs.
    Inner,
}

impl JoinType {
    pub const ALL: [JoinType; 3] = [JoinType::Left, JoinType::Right, JoinType::Inner];

    pub fn name(&self) -> &'static str {
        match self {
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Inner => "inner",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|join_type| join_type.name() == lower)
            .ok_or_else(|| {
                ErrorCode::InvalidJoinType {
                    value: name.to_owned(),
                    valid: Self::ALL
                        .iter()
                        .map(JoinType::name)
                        .collect::<Vec<_>>()
                        .join(", "),
                }
            })
    }

    /// The side iterated feature by feature. The other side is indexed.
    pub fn driver_side(&self) -> JoinSide {
        match self {
            JoinType::Left | JoinType::Inner => JoinSide::Left,
            JoinType::Right => JoinSide::Right,
        }
    }

    /// Whether driver features without any match still produce a row.
    pub fn emits_unmatched(&self) -> bool {
        !matches!(self, JoinType::Inner)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JoinType {
    type Err = ErrorCode;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

/// One input of the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    pub fn name(&self) -> &'static str {
        match self {
            JoinSide::Left => "left",
            JoinSide::Right => "right",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            JoinSide::Left => JoinSide::Right,
            JoinSide::Right => JoinSide::Left,
        }
    }
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration options for spatial join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialJoinOptions {
    /// Join mode
    pub join_type: JoinType,
    /// Spatial relation between the left and the right geometry
    pub predicate: SpatialPredicate,
    /// Number of contiguous driver ranges probed in parallel
    pub target_partitions: usize,
    /// Indexed sides with fewer features than this are scanned linearly
    pub linear_scan_threshold: usize,
    /// Suffix appended to left column names colliding with right ones
    pub lsuffix: String,
    /// Suffix appended to right column names colliding with left ones
    pub rsuffix: String,
}

impl Default for SpatialJoinOptions {
    fn default() -> Self {
        Self {
            join_type: JoinType::default(),
            predicate: SpatialPredicate::default(),
            target_partitions: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            linear_scan_threshold: DEFAULT_LINEAR_SCAN_THRESHOLD,
            lsuffix: DEFAULT_LEFT_SUFFIX.to_owned(),
            rsuffix: DEFAULT_RIGHT_SUFFIX.to_owned(),
        }
    }
}

impl SpatialJoinOptions {
    /// Options from the `how` and `op` parameter strings. Both are validated
    /// here, before any join work starts.
    pub fn try_new(how: &str, op: &str) -> Result<Self> {
        let join_type = JoinType::from_name(how)?;
        let predicate = SpatialPredicate::from_name(op)?;
        Ok(Self {
            join_type,
            predicate,
            ..Default::default()
        })
    }

    pub fn with_join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    pub fn with_predicate(mut self, predicate: SpatialPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_target_partitions(mut self, target_partitions: usize) -> Self {
        self.target_partitions = target_partitions.max(1);
        self
    }

    pub fn with_linear_scan_threshold(mut self, linear_scan_threshold: usize) -> Self {
        self.linear_scan_threshold = linear_scan_threshold;
        self
    }

    pub fn with_suffixes(mut self, lsuffix: impl Into<String>, rsuffix: impl Into<String>) -> Self {
        self.lsuffix = lsuffix.into();
        self.rsuffix = rsuffix.into();
        self
    }
}

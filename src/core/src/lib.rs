pub mod feature;
pub mod geometry;
pub mod join;

pub use feature::{Attributes, Feature, FeatureCollection};
pub use join::{
    Diagnostic, JoinResult, JoinRow, JoinType, SpatialJoinOptions, SpatialPredicate, sjoin,
    spatial_join,
};

mod diagnostic;
pub mod exec;
pub mod index;
mod materialize;
pub mod option;
mod spatial_predicate;
pub mod stream;

pub use diagnostic::{Diagnostic, check_crs};
pub use exec::{JoinMetrics, nested_loop_join, sjoin, spatial_join, spatial_join_stream};
pub use materialize::{ColumnSource, GEOMETRY_COLUMN, JoinResult, JoinRow, JoinSchema, OutputColumn};
pub use option::{JoinSide, JoinType, SpatialJoinOptions};
pub use spatial_predicate::{InvalidGeometry, RelationEvaluator, SpatialPredicate};
pub use stream::SpatialJoinStream;

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::Once;

use common_exception::{ErrorCode, Result};
use geo::{HasDimensions, Intersects, Relate};
use geo_types::Geometry;
use tracing::debug;

/// Type of spatial relation used as the join condition.
///
/// The relation is always read as `left <relation> right`, whichever side
/// drives the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpatialPredicate {
    #[default]
    Intersects,
    Within,
    Contains,
    Crosses,
    Touches,
    Overlaps,
    Disjoint,
    Equals,
}

impl SpatialPredicate {
    pub const ALL: [SpatialPredicate; 8] = [
        SpatialPredicate::Intersects,
        SpatialPredicate::Within,
        SpatialPredicate::Contains,
        SpatialPredicate::Crosses,
        SpatialPredicate::Touches,
        SpatialPredicate::Overlaps,
        SpatialPredicate::Disjoint,
        SpatialPredicate::Equals,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SpatialPredicate::Intersects => "intersects",
            SpatialPredicate::Within => "within",
            SpatialPredicate::Contains => "contains",
            SpatialPredicate::Crosses => "crosses",
            SpatialPredicate::Touches => "touches",
            SpatialPredicate::Overlaps => "overlaps",
            SpatialPredicate::Disjoint => "disjoint",
            SpatialPredicate::Equals => "equals",
        }
    }

    /// Comma separated list of accepted predicate names.
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(SpatialPredicate::name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Parse a predicate name. Matching is case-insensitive and accepts the
    /// `st_` prefixed SQL spelling.
    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.trim().to_lowercase();
        let bare = lower.strip_prefix("st_").unwrap_or(&lower);
        Self::ALL
            .into_iter()
            .find(|predicate| predicate.name() == bare)
            .ok_or_else(|| {
                ErrorCode::InvalidPredicate {
                    value: name.to_owned(),
                    valid: Self::valid_names(),
                }
            })
    }

    /// Whether every pair satisfying this predicate has overlapping bounding
    /// boxes. Only then may candidates be pruned through the spatial index.
    pub fn implies_bbox_overlap(&self) -> bool {
        !matches!(self, SpatialPredicate::Disjoint)
    }

    /// The strategy evaluating this predicate.
    pub fn evaluator(&self) -> &'static dyn RelationEvaluator {
        match self {
            SpatialPredicate::Intersects => &IntersectsEvaluator,
            SpatialPredicate::Within => &WithinEvaluator,
            SpatialPredicate::Contains => &ContainsEvaluator,
            SpatialPredicate::Crosses => &CrossesEvaluator,
            SpatialPredicate::Touches => &TouchesEvaluator,
            SpatialPredicate::Overlaps => &OverlapsEvaluator,
            SpatialPredicate::Disjoint => &DisjointEvaluator,
            SpatialPredicate::Equals => &EqualsEvaluator,
        }
    }

    /// Evaluate `left <predicate> right`.
    ///
    /// Empty geometries satisfy nothing, except that two empty geometries are
    /// disjoint. Failures inside the geometry kernel degrade to `false`.
    pub fn evaluate(&self, left: &Geometry<f64>, right: &Geometry<f64>) -> bool {
        self.try_evaluate(left, right).unwrap_or(false)
    }

    /// Like [`SpatialPredicate::evaluate`], but reports a kernel failure on
    /// malformed input as [`InvalidGeometry`] instead of swallowing it.
    ///
    /// The panic message of a failed evaluation goes to the `debug` log
    /// instead of stderr.
    pub fn try_evaluate(
        &self, left: &Geometry<f64>, right: &Geometry<f64>,
    ) -> std::result::Result<bool, InvalidGeometry> {
        self.try_evaluate_with(self.evaluator(), left, right)
    }

    /// [`SpatialPredicate::try_evaluate`] with an explicit strategy for
    /// non-empty inputs.
    pub(crate) fn try_evaluate_with(
        &self, evaluator: &dyn RelationEvaluator, left: &Geometry<f64>, right: &Geometry<f64>,
    ) -> std::result::Result<bool, InvalidGeometry> {
        match (left.is_empty(), right.is_empty()) {
            (true, true) => return Ok(*self == SpatialPredicate::Disjoint),
            (true, false) | (false, true) => return Ok(false),
            (false, false) => {}
        }

        install_kernel_panic_hook();
        IN_KERNEL.set(true);
        let outcome = catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(left, right)));
        IN_KERNEL.set(false);
        outcome.map_err(|_| InvalidGeometry)
    }
}

impl fmt::Display for SpatialPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpatialPredicate {
    type Err = ErrorCode;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

thread_local! {
    /// Set while the current thread runs a relation evaluator.
    static IN_KERNEL: Cell<bool> = const { Cell::new(false) };
}

/// Wrap the process panic hook once so that panics raised inside a relation
/// evaluator are logged instead of printed. Panics elsewhere still reach the
/// previous hook.
fn install_kernel_panic_hook() {
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_KERNEL.get() {
                debug!("Geometry kernel panicked: {info}");
            } else {
                previous(info);
            }
        }));
    });
}

/// Marker for a predicate evaluation that failed on malformed geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidGeometry;

/// Evaluator for one spatial relation on two non-empty geometries.
pub trait RelationEvaluator: fmt::Debug + Send + Sync {
    fn evaluate(&self, left: &Geometry<f64>, right: &Geometry<f64>) -> bool;
}

#[derive(Debug)]
pub struct IntersectsEvaluator;

impl RelationEvaluator for IntersectsEvaluator {
    fn evaluate(&self, left: &Geometry<f64>, right: &Geometry<f64>) -> bool {
        left.intersects(right)
    }
}

#[derive(Debug)]
pub struct DisjointEvaluator;

impl RelationEvaluator for DisjointEvaluator {
    fn evaluate(&self, left: &Geometry<f64>, right: &Geometry<f64>) -> bool {
        !left.intersects(right)
    }
}

/// Macro to generate relation evaluators that use the relate() method
macro_rules! impl_relate_evaluator {
    ($struct_name:ident, $method:ident) => {
        #[derive(Debug)]
        pub struct $struct_name;

        impl RelationEvaluator for $struct_name {
            fn evaluate(&self, left: &Geometry<f64>, right: &Geometry<f64>) -> bool {
                left.relate(right).$method()
            }
        }
    };
}

impl_relate_evaluator!(WithinEvaluator, is_within);
impl_relate_evaluator!(ContainsEvaluator, is_contains);
impl_relate_evaluator!(TouchesEvaluator, is_touches);
impl_relate_evaluator!(CrossesEvaluator, is_crosses);
impl_relate_evaluator!(OverlapsEvaluator, is_overlaps);
impl_relate_evaluator!(EqualsEvaluator, is_equal_topo);

#[cfg(test)]
mod tests {
    use geo_types::{Coord, GeometryCollection, LineString, Point, Rect};
    use rstest::rstest;

    use super::*;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry<f64> {
        Geometry::Polygon(Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 }).to_polygon())
    }

    fn point(x: f64, y: f64) -> Geometry<f64> {
        Geometry::Point(Point::new(x, y))
    }

    fn line(coords: Vec<(f64, f64)>) -> Geometry<f64> {
        Geometry::LineString(LineString::from(coords))
    }

    fn empty() -> Geometry<f64> {
        Geometry::GeometryCollection(GeometryCollection::<f64>(vec![]))
    }

    #[rstest]
    #[case("intersects", SpatialPredicate::Intersects)]
    #[case("WITHIN", SpatialPredicate::Within)]
    #[case("st_contains", SpatialPredicate::Contains)]
    #[case("ST_Touches", SpatialPredicate::Touches)]
    #[case(" overlaps ", SpatialPredicate::Overlaps)]
    #[case("disjoint", SpatialPredicate::Disjoint)]
    #[case("equals", SpatialPredicate::Equals)]
    #[case("crosses", SpatialPredicate::Crosses)]
    fn test_parse_predicate(#[case] name: &str, #[case] expected: SpatialPredicate) {
        assert_eq!(name.parse::<SpatialPredicate>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_predicate_lists_valid_set() {
        let err = SpatialPredicate::from_name("nearby").unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "Invalid spatial predicate 'nearby', expected one of: intersects, within, contains, \
             crosses, touches, overlaps, disjoint, equals"
        );
    }

    #[test]
    fn test_display_round_trips_names() {
        for predicate in SpatialPredicate::ALL {
            assert_eq!(SpatialPredicate::from_name(&predicate.to_string()).unwrap(), predicate);
        }
        assert_eq!(SpatialPredicate::default(), SpatialPredicate::Intersects);
    }

    #[test]
    fn test_point_in_polygon() {
        let poly = square(0.0, 0.0, 4.0, 4.0);
        let inside = point(1.0, 1.0);
        let on_edge = point(0.0, 2.0);
        let outside = point(5.0, 5.0);

        assert!(SpatialPredicate::Within.evaluate(&inside, &poly));
        assert!(SpatialPredicate::Contains.evaluate(&poly, &inside));
        assert!(!SpatialPredicate::Contains.evaluate(&inside, &poly));
        assert!(SpatialPredicate::Intersects.evaluate(&inside, &poly));

        // Boundary contact is not interior containment.
        assert!(!SpatialPredicate::Within.evaluate(&on_edge, &poly));
        assert!(SpatialPredicate::Touches.evaluate(&on_edge, &poly));
        assert!(SpatialPredicate::Intersects.evaluate(&on_edge, &poly));

        assert!(SpatialPredicate::Disjoint.evaluate(&outside, &poly));
        assert!(!SpatialPredicate::Intersects.evaluate(&outside, &poly));
    }

    #[test]
    fn test_adjacent_polygons_touch_but_do_not_overlap() {
        let a = square(0.0, 0.0, 2.0, 2.0);
        let b = square(2.0, 0.0, 4.0, 2.0);
        let c = square(1.0, 1.0, 3.0, 3.0);

        assert!(SpatialPredicate::Touches.evaluate(&a, &b));
        assert!(SpatialPredicate::Intersects.evaluate(&a, &b));
        assert!(!SpatialPredicate::Overlaps.evaluate(&a, &b));
        assert!(!SpatialPredicate::Disjoint.evaluate(&a, &b));

        assert!(SpatialPredicate::Overlaps.evaluate(&a, &c));
        assert!(!SpatialPredicate::Touches.evaluate(&a, &c));
        assert!(!SpatialPredicate::Within.evaluate(&a, &c));
    }

    #[test]
    fn test_line_crosses_polygon() {
        let poly = square(0.0, 0.0, 2.0, 2.0);
        let through = line(vec![(-1.0, 1.0), (3.0, 1.0)]);
        let along_edge = line(vec![(0.0, 0.0), (2.0, 0.0)]);

        assert!(SpatialPredicate::Crosses.evaluate(&through, &poly));
        assert!(!SpatialPredicate::Crosses.evaluate(&along_edge, &poly));
        assert!(SpatialPredicate::Touches.evaluate(&along_edge, &poly));
    }

    #[test]
    fn test_topological_equality() {
        let a = square(0.0, 0.0, 1.0, 1.0);
        let b = Geometry::Polygon(geo_types::Polygon::new(
            LineString::from(vec![(1.0, 1.0), (0.0, 1.0), (0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]),
            vec![],
        ));
        assert!(SpatialPredicate::Equals.evaluate(&a, &b));
        assert!(!SpatialPredicate::Equals.evaluate(&a, &square(0.0, 0.0, 1.0, 2.0)));
    }

    #[rstest]
    fn test_empty_geometries(
        #[values(
            SpatialPredicate::Intersects,
            SpatialPredicate::Within,
            SpatialPredicate::Contains,
            SpatialPredicate::Crosses,
            SpatialPredicate::Touches,
            SpatialPredicate::Overlaps,
            SpatialPredicate::Disjoint,
            SpatialPredicate::Equals
        )]
        predicate: SpatialPredicate,
    ) {
        let poly = square(0.0, 0.0, 1.0, 1.0);
        assert!(!predicate.evaluate(&empty(), &poly));
        assert!(!predicate.evaluate(&poly, &empty()));
        assert_eq!(
            predicate.evaluate(&empty(), &empty()),
            predicate == SpatialPredicate::Disjoint
        );
    }

    #[derive(Debug)]
    struct PanickingEvaluator;

    impl RelationEvaluator for PanickingEvaluator {
        fn evaluate(&self, _left: &Geometry<f64>, _right: &Geometry<f64>) -> bool {
            panic!("unsupported geometry")
        }
    }

    #[test]
    fn test_kernel_panic_degrades_to_invalid_geometry() {
        let poly = square(0.0, 0.0, 1.0, 1.0);
        let inside = point(0.5, 0.5);

        let outcome =
            SpatialPredicate::Intersects.try_evaluate_with(&PanickingEvaluator, &inside, &poly);
        assert_eq!(outcome, Err(InvalidGeometry));
        assert!(!IN_KERNEL.get());

        // Empty inputs never reach the evaluator.
        let outcome =
            SpatialPredicate::Disjoint.try_evaluate_with(&PanickingEvaluator, &empty(), &empty());
        assert_eq!(outcome, Ok(true));

        // The thread keeps evaluating normally afterwards.
        assert_eq!(SpatialPredicate::Within.try_evaluate(&inside, &poly), Ok(true));
    }

    #[test]
    fn test_bbox_pruning_capability() {
        for predicate in SpatialPredicate::ALL {
            assert_eq!(
                predicate.implies_bbox_overlap(),
                predicate != SpatialPredicate::Disjoint
            );
        }
    }
}

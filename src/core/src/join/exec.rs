use std::ops::Range;
use std::sync::Arc;

use common_exception::{ErrorCode, Result};
use geo_types::Rect;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::feature::FeatureCollection;
use crate::geometry::{BoundsError, geometry_bounds};
use crate::join::diagnostic::{Diagnostic, check_crs};
use crate::join::index::{CandidateGenerator, SpatialIndex};
use crate::join::materialize::{JoinResult, JoinRow, JoinSchema};
use crate::join::option::{JoinSide, JoinType, SpatialJoinOptions};
use crate::join::spatial_predicate::{RelationEvaluator, SpatialPredicate};
use crate::join::stream::SpatialJoinStream;

/// Counters describing the work done by one join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinMetrics {
    /// Number of (driver, candidate) pairs handed to the predicate evaluator
    pub candidates: usize,
    /// Number of pairs satisfying the predicate
    pub matches: usize,
}

impl JoinMetrics {
    pub fn merge(&mut self, other: &JoinMetrics) {
        self.candidates += other.candidates;
        self.matches += other.matches;
    }
}

/// Join `left` and `right` on a spatial predicate.
///
/// The side that is not iterated is indexed once: `right` for left and inner
/// joins, `left` for right joins. Rows are ordered by ascending driver id,
/// then by ascending id of the matched feature.
pub fn spatial_join<'a>(
    left: &'a FeatureCollection, right: &'a FeatureCollection, options: &SpatialJoinOptions,
) -> Result<JoinResult<'a>> {
    Ok(SpatialJoinPlan::try_new(left, right, options, false)?.execute())
}

/// [`spatial_join`] taking the join type and predicate by name.
pub fn sjoin<'a>(
    left: &'a FeatureCollection, right: &'a FeatureCollection, how: &str, op: &str,
) -> Result<JoinResult<'a>> {
    let options = SpatialJoinOptions::try_new(how, op)?;
    spatial_join(left, right, &options)
}

/// Lazy variant of [`spatial_join`]: rows are produced one driver feature at
/// a time, in the same order. Validation and index construction still happen
/// up front, so every error surfaces here rather than mid-iteration.
pub fn spatial_join_stream<'a>(
    left: &'a FeatureCollection, right: &'a FeatureCollection, options: &SpatialJoinOptions,
) -> Result<SpatialJoinStream<'a>> {
    let plan = SpatialJoinPlan::try_new(left, right, options, false)?;
    Ok(SpatialJoinStream::new(plan))
}

/// Reference join testing every (driver, indexed) pair without consulting the
/// index. Same output contract as [`spatial_join`], quadratic cost.
pub fn nested_loop_join<'a>(
    left: &'a FeatureCollection, right: &'a FeatureCollection, options: &SpatialJoinOptions,
) -> Result<JoinResult<'a>> {
    Ok(SpatialJoinPlan::try_new(left, right, options, true)?.execute())
}

/// Rows, diagnostics and metrics produced by probing a range of drivers.
#[derive(Default)]
pub(crate) struct ProbeOutput<'a> {
    pub(crate) rows: Vec<JoinRow<'a>>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) metrics: JoinMetrics,
}

impl ProbeOutput<'_> {
    fn report(&mut self, diagnostic: Diagnostic) {
        debug!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }
}

/// A validated join ready to run: output schema resolved, driver bounding
/// boxes computed and the other side indexed.
pub(crate) struct SpatialJoinPlan<'a> {
    left: &'a FeatureCollection,
    right: &'a FeatureCollection,
    join_type: JoinType,
    predicate: SpatialPredicate,
    /// Strategy evaluating `predicate` on non-empty geometries
    evaluator: &'static dyn RelationEvaluator,
    target_partitions: usize,
    /// Test every pair instead of querying the index
    exhaustive: bool,
    schema: Arc<JoinSchema>,
    index: SpatialIndex,
    /// Bounding box per driver feature; `None` for null or empty geometries
    driver_rects: Vec<Option<Rect<f64>>>,
    crs_mismatch: Option<Diagnostic>,
}

impl<'a> SpatialJoinPlan<'a> {
    pub(crate) fn try_new(
        left: &'a FeatureCollection, right: &'a FeatureCollection, options: &SpatialJoinOptions,
        exhaustive: bool,
    ) -> Result<Self> {
        let schema = Arc::new(JoinSchema::try_new(left, right, options)?);

        let driver_side = options.join_type.driver_side();
        let indexed_side = driver_side.opposite();
        let (driver, indexed) = match driver_side {
            JoinSide::Left => (left, right),
            JoinSide::Right => (right, left),
        };

        let driver_rects = driver
            .features()
            .iter()
            .enumerate()
            .map(|(id, feature)| {
                match geometry_bounds(feature.geometry()) {
                    Ok(rect) => Ok(Some(rect)),
                    Err(BoundsError::Missing | BoundsError::Empty) => Ok(None),
                    Err(reason @ BoundsError::NonFinite) => {
                        Err(ErrorCode::UnindexableGeometry {
                            side: driver_side.name(),
                            id,
                            reason: reason.to_string(),
                        })
                    }
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let index = SpatialIndex::build(indexed, indexed_side, options.linear_scan_threshold)?;

        let crs_mismatch = check_crs(left.crs(), right.crs());
        if let Some(diagnostic) = &crs_mismatch {
            debug!("{diagnostic}");
        }

        debug!(
            join_type = %options.join_type,
            predicate = %options.predicate,
            driver = %driver_side,
            num_drivers = driver.len(),
            num_indexed = index.len(),
            rtree = index.is_rtree(),
            exhaustive,
            "Planned spatial join"
        );

        Ok(Self {
            left,
            right,
            join_type: options.join_type,
            predicate: options.predicate,
            evaluator: options.predicate.evaluator(),
            target_partitions: options.target_partitions.max(1),
            exhaustive,
            schema,
            index,
            driver_rects,
            crs_mismatch,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_evaluator(mut self, evaluator: &'static dyn RelationEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub(crate) fn schema(&self) -> &Arc<JoinSchema> {
        &self.schema
    }

    pub(crate) fn crs_mismatch(&self) -> Option<&Diagnostic> {
        self.crs_mismatch.as_ref()
    }

    pub(crate) fn num_drivers(&self) -> usize {
        self.driver_rects.len()
    }

    fn driver_side(&self) -> JoinSide {
        self.join_type.driver_side()
    }

    /// Probe one driver feature and append its rows to `output`.
    pub(crate) fn probe(&self, driver_id: usize, output: &mut ProbeOutput<'a>) {
        let driver_side = self.driver_side();
        let (driver, indexed) = match driver_side {
            JoinSide::Left => (self.left, self.right),
            JoinSide::Right => (self.right, self.left),
        };
        let driver_feature = &driver.features()[driver_id];
        let window = self.driver_rects[driver_id].as_ref();

        let candidates = match window {
            None => {
                output.report(Diagnostic::EmptyGeometry {
                    side: driver_side,
                    id: driver_id,
                });
                Vec::new()
            }
            Some(_) if self.exhaustive => (0..self.index.len()).collect(),
            Some(window) => {
                CandidateGenerator::new(&self.index, self.predicate).candidates(Some(window))
            }
        };
        output.metrics.candidates += candidates.len();

        let mut matched = false;
        for candidate_id in candidates {
            let indexed_feature = &indexed.features()[candidate_id];
            let (Some(driver_geom), Some(indexed_geom)) =
                (driver_feature.geometry(), indexed_feature.geometry())
            else {
                continue;
            };

            let (left_id, right_id, left_geom, right_geom) = match driver_side {
                JoinSide::Left => (driver_id, candidate_id, driver_geom, indexed_geom),
                JoinSide::Right => (candidate_id, driver_id, indexed_geom, driver_geom),
            };
            match self
                .predicate
                .try_evaluate_with(self.evaluator, left_geom, right_geom)
            {
                Ok(true) => {
                    matched = true;
                    output.metrics.matches += 1;
                    output.rows.push(self.schema.materialize(
                        Some((left_id, &self.left.features()[left_id])),
                        Some((right_id, &self.right.features()[right_id])),
                    ));
                }
                Ok(false) => {}
                Err(_) => output.report(Diagnostic::InvalidGeometry { left_id, right_id }),
            }
        }

        if !matched && self.join_type.emits_unmatched() {
            let driver_entry = Some((driver_id, driver_feature));
            let row = match driver_side {
                JoinSide::Left => self.schema.materialize(driver_entry, None),
                JoinSide::Right => self.schema.materialize(None, driver_entry),
            };
            output.rows.push(row);
        }
    }

    fn probe_range(&self, range: Range<usize>) -> ProbeOutput<'a> {
        let mut output = ProbeOutput::default();
        for driver_id in range {
            self.probe(driver_id, &mut output);
        }
        output
    }

    /// Run the join. Contiguous driver ranges are probed in parallel and
    /// concatenated in range order, so the output order does not depend on
    /// scheduling.
    pub(crate) fn execute(self) -> JoinResult<'a> {
        let ranges = partition_ranges(self.num_drivers(), self.target_partitions);
        let partials: Vec<ProbeOutput<'a>> = if ranges.len() > 1 {
            ranges
                .into_par_iter()
                .map(|range| self.probe_range(range))
                .collect()
        } else {
            ranges
                .into_iter()
                .map(|range| self.probe_range(range))
                .collect()
        };

        let num_rows = partials.iter().map(|p| p.rows.len()).sum();
        let mut rows = Vec::with_capacity(num_rows);
        let mut diagnostics: Vec<Diagnostic> = self.crs_mismatch.iter().cloned().collect();
        let mut metrics = JoinMetrics::default();
        for partial in partials {
            rows.extend(partial.rows);
            diagnostics.extend(partial.diagnostics);
            metrics.merge(&partial.metrics);
        }

        info!(
            join_type = %self.join_type,
            predicate = %self.predicate,
            num_rows = rows.len(),
            candidates = metrics.candidates,
            matches = metrics.matches,
            diagnostics = diagnostics.len(),
            "Spatial join finished"
        );

        JoinResult::new(self.schema, rows, diagnostics, metrics)
    }
}

/// Split `0..len` into at most `partitions` contiguous, non-empty ranges.
fn partition_ranges(len: usize, partitions: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let chunk = len.div_ceil(partitions.clamp(1, len));
    (0..len)
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(len))
        .collect()
}

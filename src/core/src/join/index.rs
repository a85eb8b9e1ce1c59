use common_exception::{ErrorCode, Result};
use geo_index::rtree::sort::STRSort;
use geo_index::rtree::{RTree, RTreeBuilder, RTreeIndex};
use geo_types::Rect;
use tracing::debug;

use crate::feature::FeatureCollection;
use crate::geometry::{geometry_bounds, rects_intersect};
use crate::join::option::JoinSide;
use crate::join::spatial_predicate::SpatialPredicate;

/// Bounding-box index over one side of the join.
///
/// The index owns a copy of the bounding boxes only; geometries stay with
/// their [`FeatureCollection`]. Queries return a conservative superset of the
/// features whose geometry may interact with the query window: false positives
/// are allowed, false negatives are not.
pub struct SpatialIndex {
    /// Bounding box of every indexed feature, keyed by positional id.
    rects: Vec<Rect<f64>>,

    /// Packed R-tree over `rects`. Boxes are added in positional id order, so
    /// the R-tree data index of a box equals the positional id of its feature.
    /// `None` selects a linear scan, used for small inputs where building the
    /// tree costs more than it saves.
    rtree: Option<RTree<f64>>,
}

impl SpatialIndex {
    /// Build the index over every feature of `features`.
    ///
    /// Fails when a feature has no computable bounding box.
    pub fn build(
        features: &FeatureCollection, side: JoinSide, linear_scan_threshold: usize,
    ) -> Result<Self> {
        let rects = features
            .features()
            .iter()
            .enumerate()
            .map(|(id, feature)| {
                geometry_bounds(feature.geometry()).map_err(|reason| {
                    ErrorCode::UnindexableGeometry {
                        side: side.name(),
                        id,
                        reason: reason.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_rects(rects, linear_scan_threshold)
    }

    /// Build the index from precomputed bounding boxes.
    pub fn from_rects(rects: Vec<Rect<f64>>, linear_scan_threshold: usize) -> Result<Self> {
        if rects.is_empty() || rects.len() < linear_scan_threshold {
            debug!(num_rects = rects.len(), "Using linear scan spatial index");
            return Ok(Self { rects, rtree: None });
        }

        let mut rtree_builder = RTreeBuilder::<f64>::new(rtree_capacity(rects.len())?);
        for rect in &rects {
            let min = rect.min();
            let max = rect.max();
            rtree_builder.add(min.x, min.y, max.x, max.y);
        }
        let rtree = rtree_builder.finish::<STRSort>();
        debug!(num_rects = rects.len(), "Built packed R-tree spatial index");

        Ok(Self {
            rects,
            rtree: Some(rtree),
        })
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn is_rtree(&self) -> bool {
        self.rtree.is_some()
    }

    /// Ids of all indexed features whose bounding box intersects `window`
    /// (edges inclusive), in ascending order without duplicates.
    pub fn query(&self, window: &Rect<f64>) -> Vec<usize> {
        match &self.rtree {
            Some(rtree) => {
                let min = window.min();
                let max = window.max();
                let mut candidates = rtree.search(min.x, min.y, max.x, max.y);
                candidates.sort_unstable();
                candidates.dedup();
                candidates.into_iter().map(|idx| idx as usize).collect()
            }
            None => {
                self.rects
                    .iter()
                    .enumerate()
                    .filter(|(_, rect)| rects_intersect(rect, window))
                    .map(|(id, _)| id)
                    .collect()
            }
        }
    }
}

/// Number of items for the packed R-tree, which addresses them with `u32`.
fn rtree_capacity(num_rects: usize) -> Result<u32> {
    u32::try_from(num_rects).map_err(|_| {
        ErrorCode::Internal(format!(
            "Cannot build an R-tree over {num_rects} bounding boxes, at most {} are supported",
            u32::MAX
        ))
    })
}

/// Produces the index-filtered candidate ids for one driver geometry.
pub struct CandidateGenerator<'a> {
    index: &'a SpatialIndex,
    predicate: SpatialPredicate,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(index: &'a SpatialIndex, predicate: SpatialPredicate) -> Self {
        Self { index, predicate }
    }

    /// Candidate ids in ascending order. A driver without bounding box has no
    /// candidates. Predicates that hold for bbox-disjoint pairs cannot be
    /// pruned through the index and get every indexed feature instead.
    pub fn candidates(&self, window: Option<&Rect<f64>>) -> Vec<usize> {
        let Some(window) = window else {
            return Vec::new();
        };
        if self.predicate.implies_bbox_overlap() {
            self.index.query(window)
        } else {
            (0..self.index.len()).collect()
        }
    }
}

use std::collections::VecDeque;
use std::iter::FusedIterator;

use crate::join::diagnostic::Diagnostic;
use crate::join::exec::{JoinMetrics, ProbeOutput, SpatialJoinPlan};
use crate::join::materialize::{JoinRow, JoinSchema};

/// Iterator over the rows of a spatial join, probing one driver feature at a
/// time.
///
/// Yields exactly the rows of [`spatial_join`](crate::join::spatial_join) in
/// the same order. Diagnostics and metrics grow as the stream advances and are
/// complete once it is exhausted.
pub struct SpatialJoinStream<'a> {
    plan: SpatialJoinPlan<'a>,
    next_driver: usize,
    pending: VecDeque<JoinRow<'a>>,
    diagnostics: Vec<Diagnostic>,
    metrics: JoinMetrics,
}

impl<'a> SpatialJoinStream<'a> {
    pub(crate) fn new(plan: SpatialJoinPlan<'a>) -> Self {
        let diagnostics = plan.crs_mismatch().cloned().into_iter().collect();
        Self {
            plan,
            next_driver: 0,
            pending: VecDeque::new(),
            diagnostics,
            metrics: JoinMetrics::default(),
        }
    }

    pub fn schema(&self) -> &JoinSchema {
        self.plan.schema()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn metrics(&self) -> &JoinMetrics {
        &self.metrics
    }
}

impl<'a> Iterator for SpatialJoinStream<'a> {
    type Item = JoinRow<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(row);
            }
            if self.next_driver >= self.plan.num_drivers() {
                return None;
            }

            let mut output = ProbeOutput::default();
            self.plan.probe(self.next_driver, &mut output);
            self.next_driver += 1;

            self.pending.extend(output.rows);
            self.diagnostics.extend(output.diagnostics);
            self.metrics.merge(&output.metrics);
        }
    }
}

impl FusedIterator for SpatialJoinStream<'_> {}

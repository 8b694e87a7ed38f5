use super::config::Property;
use crate::core::models::prediction::EnsembleResult;
use nalgebra::Point3;

/// The memoized outcome of the last successful evaluation round.
///
/// A round is served from cache when the requested positions are identical to
/// the cached snapshot and every requested property was computed by it.
#[derive(Debug, Clone)]
pub(crate) struct RoundCache {
    positions: Vec<Point3<f64>>,
    computed: Vec<Property>,
    result: EnsembleResult,
}

impl RoundCache {
    pub fn new(
        positions: Vec<Point3<f64>>,
        computed: Vec<Property>,
        result: EnsembleResult,
    ) -> Self {
        Self {
            positions,
            computed,
            result,
        }
    }

    pub fn serves(&self, positions: &[Point3<f64>], requested: &[Property]) -> bool {
        self.positions.as_slice() == positions
            && requested.iter().all(|p| self.computed.contains(p))
    }

    pub fn result(&self) -> &EnsembleResult {
        &self.result
    }
}

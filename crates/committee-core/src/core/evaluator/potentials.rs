use super::{Evaluator, EvaluatorError};
use crate::core::models::prediction::Evaluation;
use nalgebra::{Point3, Vector3};

#[inline]
pub fn lennard_jones_12_6(dist: f64, r_min: f64, well_depth: f64) -> f64 {
    if dist < 1e-6 {
        return 1e10;
    }
    let rho = r_min / dist;
    let rho6 = rho.powi(6);
    let rho12 = rho6 * rho6;
    well_depth * (rho12 - 2.0 * rho6)
}

/// Radial derivative dE/dr of [`lennard_jones_12_6`].
#[inline]
pub fn lennard_jones_12_6_deriv(dist: f64, r_min: f64, well_depth: f64) -> f64 {
    if dist < 1e-6 {
        return 0.0;
    }
    let rho = r_min / dist;
    let rho6 = rho.powi(6);
    let rho12 = rho6 * rho6;
    -12.0 * well_depth * (rho12 - rho6) / dist
}

/// A single-species 12-6 Lennard-Jones potential with analytic forces.
///
/// `r_min` is the pair distance at the energy minimum in Å and `well_depth`
/// the depth of the well in eV. All pairs interact; there is no cutoff and
/// no minimum-image convention, so the evaluator is intended for isolated
/// clusters and for exercising the ensemble machinery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LennardJonesEvaluator {
    r_min: f64,
    well_depth: f64,
}

impl LennardJonesEvaluator {
    pub fn new(r_min: f64, well_depth: f64) -> Self {
        Self { r_min, well_depth }
    }
}

impl Evaluator for LennardJonesEvaluator {
    fn compute(&mut self, positions: &[Point3<f64>]) -> Result<Evaluation, EvaluatorError> {
        let mut energy = 0.0;
        let mut forces = vec![Vector3::zeros(); positions.len()];

        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                let separation = positions[i] - positions[j];
                let dist = separation.norm();
                energy += lennard_jones_12_6(dist, self.r_min, self.well_depth);

                if dist < 1e-6 {
                    continue;
                }
                let dedr = lennard_jones_12_6_deriv(dist, self.r_min, self.well_depth);
                let pair_force = -(dedr / dist) * separation;
                forces[i] += pair_force;
                forces[j] -= pair_force;
            }
        }

        Ok(Evaluation::new(energy, forces))
    }
}

/// A harmonic restraint anchoring every atom to a reference position.
///
/// `E = k/2 · Σ |p_i − a_i|²` with `F_i = −k (p_i − a_i)`. Useful as a
/// deterministic, trivially differentiable member when testing ensemble
/// aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicEvaluator {
    anchors: Vec<Point3<f64>>,
    spring: f64,
}

impl HarmonicEvaluator {
    pub fn new(anchors: Vec<Point3<f64>>, spring: f64) -> Self {
        Self { anchors, spring }
    }
}

impl Evaluator for HarmonicEvaluator {
    fn compute(&mut self, positions: &[Point3<f64>]) -> Result<Evaluation, EvaluatorError> {
        if positions.len() != self.anchors.len() {
            return Err(EvaluatorError::Evaluation(format!(
                "got {} positions for {} anchors",
                positions.len(),
                self.anchors.len()
            )));
        }

        let mut energy = 0.0;
        let mut forces = Vec::with_capacity(positions.len());
        for (position, anchor) in positions.iter().zip(&self.anchors) {
            let displacement = position - anchor;
            energy += 0.5 * self.spring * displacement.norm_squared();
            forces.push(-self.spring * displacement);
        }

        Ok(Evaluation::new(energy, forces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn lennard_jones_energy_at_minimum_is_negative_well_depth() {
        assert!(f64_approx_equal(lennard_jones_12_6(3.0, 3.0, 0.2), -0.2));
    }

    #[test]
    fn lennard_jones_derivative_vanishes_at_minimum() {
        assert!(f64_approx_equal(lennard_jones_12_6_deriv(3.0, 3.0, 0.2), 0.0));
    }

    #[test]
    fn lennard_jones_guards_against_overlapping_atoms() {
        assert!(lennard_jones_12_6(1e-9, 3.0, 0.2) > 1e9);
        assert_eq!(lennard_jones_12_6_deriv(1e-9, 3.0, 0.2), 0.0);
    }

    #[test]
    fn dimer_at_minimum_distance_has_no_net_force() {
        let mut lj = LennardJonesEvaluator::new(3.0, 0.2);
        let eval = lj
            .compute(&[Point3::origin(), Point3::new(3.0, 0.0, 0.0)])
            .unwrap();
        assert!(f64_approx_equal(eval.energy, -0.2));
        assert!(eval.forces[0].norm() < 1e-9);
        assert!(eval.forces[1].norm() < 1e-9);
    }

    #[test]
    fn stretched_dimer_attracts() {
        let mut lj = LennardJonesEvaluator::new(3.0, 0.2);
        let eval = lj
            .compute(&[Point3::origin(), Point3::new(4.0, 0.0, 0.0)])
            .unwrap();
        // Atom 0 sits at lower x than atom 1; attraction pulls it to +x.
        assert!(eval.forces[0].x > 0.0);
        assert!(f64_approx_equal(eval.forces[0].x, -eval.forces[1].x));
    }

    #[test]
    fn lennard_jones_forces_match_finite_difference() {
        let mut lj = LennardJonesEvaluator::new(3.0, 0.2);
        let base = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(3.2, 0.1, -0.2),
            Point3::new(1.4, 2.9, 0.3),
        ];
        let eval = lj.compute(&base).unwrap();

        let h = 1e-6;
        for atom in 0..base.len() {
            for axis in 0..3 {
                let mut plus = base.clone();
                let mut minus = base.clone();
                plus[atom][axis] += h;
                minus[atom][axis] -= h;
                let numeric =
                    -(lj.compute(&plus).unwrap().energy - lj.compute(&minus).unwrap().energy)
                        / (2.0 * h);
                assert!(
                    (numeric - eval.forces[atom][axis]).abs() < 1e-5,
                    "atom {atom} axis {axis}: {numeric} vs {}",
                    eval.forces[atom][axis]
                );
            }
        }
    }

    #[test]
    fn harmonic_is_zero_at_anchors() {
        let anchors = vec![Point3::origin(), Point3::new(1.0, 1.0, 1.0)];
        let mut harmonic = HarmonicEvaluator::new(anchors.clone(), 2.0);
        let eval = harmonic.compute(&anchors).unwrap();
        assert_eq!(eval.energy, 0.0);
        assert!(eval.forces.iter().all(|f| f.norm() == 0.0));
    }

    #[test]
    fn harmonic_restoring_force_opposes_displacement() {
        let anchors = vec![Point3::origin()];
        let mut harmonic = HarmonicEvaluator::new(anchors, 2.0);
        let eval = harmonic.compute(&[Point3::new(0.5, 0.0, 0.0)]).unwrap();
        assert!(f64_approx_equal(eval.energy, 0.25));
        assert!(f64_approx_equal(eval.forces[0].x, -1.0));
    }

    #[test]
    fn harmonic_rejects_mismatched_atom_count() {
        let mut harmonic = HarmonicEvaluator::new(vec![Point3::origin()], 1.0);
        let result = harmonic.compute(&[Point3::origin(), Point3::origin()]);
        assert!(matches!(result, Err(EvaluatorError::Evaluation(_))));
    }
}

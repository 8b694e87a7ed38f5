use std::time::Duration;

use nalgebra::{Matrix3, Vector3};
use tracing::{debug, info, instrument, warn};

use super::cache::RoundCache;
use super::config::{ConfigError, EnsembleSettings, IMPLEMENTED_PROPERTIES, Property};
use super::error::EngineError;
use super::worker::WorkerHandle;
use crate::core::bias::{BiasMode, BiasStrategy};
use crate::core::evaluator::EvaluatorFactory;
use crate::core::models::configuration::Configuration;
use crate::core::models::prediction::{EnsembleResult, MemberPrediction};

/// The immutable shape of the ensemble: species identity and ordering plus
/// the cell, fixed by the template configuration at construction.
#[derive(Debug, Clone, PartialEq)]
struct Frame {
    species: Vec<u32>,
    cell: Matrix3<f64>,
}

impl Frame {
    fn of(configuration: &Configuration) -> Self {
        Self {
            species: configuration.species().to_vec(),
            cell: *configuration.cell(),
        }
    }

    fn ensure_matches(&self, configuration: &Configuration) -> Result<(), EngineError> {
        if configuration.atom_count() != self.species.len() {
            return Err(EngineError::ConfigurationMismatch {
                reason: format!(
                    "atom count changed from {} to {}",
                    self.species.len(),
                    configuration.atom_count()
                ),
            });
        }
        if configuration.species() != self.species {
            return Err(EngineError::ConfigurationMismatch {
                reason: "species sequence changed".into(),
            });
        }
        if configuration.cell() != &self.cell {
            return Err(EngineError::ConfigurationMismatch {
                reason: "cell changed".into(),
            });
        }
        Ok(())
    }
}

/// Owns the ensemble: one worker process, control channel, and buffer triple
/// per member, plus the bias strategy that folds member predictions into the
/// reported result.
///
/// The coordinator itself is single-threaded; wall-clock parallelism comes
/// from signaling every worker before blocking on any acknowledgment. A
/// round either fully succeeds or fully fails; there is no partial
/// aggregation and no automatic retry.
pub struct EnsembleCoordinator {
    workers: Vec<WorkerHandle>,
    weights: Vec<f64>,
    strategy: BiasStrategy,
    ack_timeout: Option<Duration>,
    frame: Frame,
    cache: Option<RoundCache>,
    snapshot: u64,
    shut_down: bool,
}

impl EnsembleCoordinator {
    /// Builds the ensemble: validates the settings, sizes every shared
    /// buffer from the template configuration, and spawns one worker process
    /// per evaluator factory.
    ///
    /// The template fixes atom count, species ordering, and cell for the
    /// lifetime of the ensemble; later configurations may only move atoms.
    #[instrument(skip_all, name = "ensemble_construction", fields(members = factories.len(), atoms = template.atom_count()))]
    pub fn new(
        template: &Configuration,
        factories: Vec<EvaluatorFactory>,
        settings: EnsembleSettings,
    ) -> Result<Self, EngineError> {
        if factories.is_empty() {
            return Err(EngineError::InvalidOperation(
                "an ensemble requires at least one member",
            ));
        }
        settings.validate()?;
        let weights = settings.resolved_weights(factories.len())?;
        let strategy = BiasStrategy::new(
            settings.bias_mode,
            settings.bias_amplitude,
            settings.bias_width,
        );

        let mut workers = Vec::with_capacity(factories.len());
        for (member, factory) in factories.into_iter().enumerate() {
            let worker =
                WorkerHandle::spawn(member, template.atom_count(), factory, &mut workers)?;
            workers.push(worker);
        }

        info!(
            members = workers.len(),
            mode = ?strategy.mode(),
            "ensemble ready"
        );
        Ok(Self {
            workers,
            weights,
            strategy,
            ack_timeout: settings.ack_timeout(),
            frame: Frame::of(template),
            cache: None,
            snapshot: 0,
            shut_down: false,
        })
    }

    /// Runs one evaluation round: validates the configuration against the
    /// ensemble's frame, serves an unchanged round from cache, and otherwise
    /// publishes the snapshot to every worker, signals all of them before
    /// blocking on any reply, waits at the barrier for every acknowledgment,
    /// and aggregates through the bias strategy.
    ///
    /// A single failed or stalled member fails the whole round with
    /// [`EngineError::EvaluatorFailure`]; the previous cached result is left
    /// untouched. A member that timed out may still be computing, leaving its
    /// rendezvous out of step; `shutdown` is the only safe recovery from a
    /// wedged member, whereas a dead member keeps failing cleanly.
    #[instrument(skip_all, name = "ensemble_evaluate", fields(atoms = configuration.atom_count()))]
    pub fn evaluate(
        &mut self,
        configuration: &Configuration,
        properties: &[Property],
    ) -> Result<EnsembleResult, EngineError> {
        if self.shut_down {
            return Err(EngineError::InvalidOperation(
                "evaluate called after shutdown",
            ));
        }
        if let Some(unsupported) = properties
            .iter()
            .find(|p| !IMPLEMENTED_PROPERTIES.contains(p))
        {
            return Err(EngineError::UnsupportedProperty(*unsupported));
        }
        self.frame.ensure_matches(configuration)?;

        if let Some(cache) = &self.cache {
            if cache.serves(configuration.positions(), properties) {
                debug!("round served from cache");
                return Ok(cache.result().clone());
            }
        }

        self.snapshot += 1;
        let snapshot = self.snapshot;
        let timeout = self.ack_timeout;

        // Fan-out: publish the immutable snapshot and signal every worker
        // before blocking on any reply, so the member evaluations overlap.
        let mut first_failure: Option<(usize, String)> = None;
        let mut signaled = vec![false; self.workers.len()];
        for (index, worker) in self.workers.iter_mut().enumerate() {
            worker.publish(configuration.positions());
            match worker.request(snapshot) {
                Ok(()) => signaled[index] = true,
                Err(reason) => {
                    first_failure.get_or_insert((worker.member(), reason));
                }
            }
        }

        // Fan-in barrier: collect every acknowledgment, draining stragglers
        // even after a failure so the rendezvous stays aligned for the next
        // round.
        for (index, worker) in self.workers.iter_mut().enumerate() {
            if !signaled[index] {
                continue;
            }
            if let Err(reason) = worker.await_ack(snapshot, timeout) {
                first_failure.get_or_insert((worker.member(), reason));
            }
        }

        if let Some((member, reason)) = first_failure {
            warn!(member, %reason, "evaluation round failed");
            return Err(EngineError::EvaluatorFailure { member, reason });
        }

        let members: Vec<MemberPrediction> = self
            .workers
            .iter()
            .zip(&self.weights)
            .map(|(worker, &weight)| worker.prediction(weight))
            .collect();
        let result = self.strategy.aggregate(&members);
        debug!(
            energy = result.energy,
            energy_std = result.energy_std,
            "round aggregated"
        );

        self.cache = Some(RoundCache::new(
            configuration.positions().to_vec(),
            IMPLEMENTED_PROPERTIES.to_vec(),
            result.clone(),
        ));
        Ok(result)
    }

    /// Changes the bias width at runtime. Only meaningful when a
    /// variance-derived surface is being reported; rejected in `average`
    /// mode. Invalidates the cached round, which was aggregated with the old
    /// width.
    pub fn reset_bias_width(&mut self, width: f64) -> Result<(), EngineError> {
        if self.strategy.mode() == BiasMode::Average {
            return Err(EngineError::InvalidOperation(
                "bias width is only meaningful in vargrad, metadynamics, or metamix mode",
            ));
        }
        if !(width.is_finite() && width > 0.0) {
            return Err(ConfigError::InvalidBiasWidth(width).into());
        }
        debug!(width, "bias width reset");
        self.strategy.set_width(width);
        self.cache = None;
        Ok(())
    }

    /// Drops the memoized round so the next `evaluate` re-runs every worker.
    pub fn reset(&mut self) {
        self.cache = None;
    }

    /// Stops every worker, reaps the processes, and releases every shared
    /// buffer. Idempotent: a second call is a no-op. Also invoked
    /// best-effort when the coordinator is dropped.
    #[instrument(skip_all, name = "ensemble_shutdown")]
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let mut first_failure: Option<String> = None;
        for worker in &mut self.workers {
            if let Err(reason) = worker.stop() {
                first_failure
                    .get_or_insert(format!("stopping member {}: {reason}", worker.member()));
            }
        }
        for worker in &mut self.workers {
            if let Err(reason) = worker.join() {
                first_failure
                    .get_or_insert(format!("reaping member {}: {reason}", worker.member()));
            }
        }
        // Dropping the handles unlinks every shared segment.
        self.workers.clear();

        match first_failure {
            Some(reason) => Err(EngineError::Shutdown { reason }),
            None => {
                info!("ensemble shut down");
                Ok(())
            }
        }
    }

    /// Weighted standard deviation of member energies from the last
    /// successful round.
    pub fn energy_std(&self) -> Option<f64> {
        self.cache.as_ref().map(|c| c.result().energy_std)
    }

    /// Weighted standard deviation of member force fields from the last
    /// successful round.
    pub fn forces_std(&self) -> Option<f64> {
        self.cache.as_ref().map(|c| c.result().forces_std)
    }

    /// The plain weighted-mean energy of the last successful round,
    /// independent of the bias mode.
    pub fn ensemble_energy(&self) -> Option<f64> {
        self.cache.as_ref().map(|c| c.result().mean_energy)
    }

    /// The plain weighted-mean forces of the last successful round.
    pub fn ensemble_forces(&self) -> Option<&[Vector3<f64>]> {
        self.cache
            .as_ref()
            .map(|c| c.result().mean_forces.as_slice())
    }

    pub fn bias_mode(&self) -> BiasMode {
        self.strategy.mode()
    }

    pub fn atom_count(&self) -> usize {
        self.frame.species.len()
    }

    pub fn member_count(&self) -> usize {
        self.weights.len()
    }

    /// Process ids of the worker processes, for external monitoring.
    pub fn worker_pids(&self) -> Vec<i32> {
        self.workers.iter().map(WorkerHandle::pid_raw).collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for EnsembleCoordinator {
    fn drop(&mut self) {
        if !self.shut_down {
            if let Err(error) = self.shutdown() {
                warn!(%error, "ensemble shutdown during drop failed");
            }
        }
    }
}

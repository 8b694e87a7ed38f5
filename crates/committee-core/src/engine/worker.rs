use std::os::unix::net::UnixStream;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use nalgebra::Point3;
use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, fork};
use thiserror::Error;
use tracing::{debug, instrument};

use super::error::EngineError;
use super::protocol::{self, ProtocolError, Reply, Request};
use super::shm::{self, SharedArray, SharedArrayView, ShmError};
use crate::core::evaluator::{Evaluator, EvaluatorError, EvaluatorFactory};
use crate::core::models::prediction::MemberPrediction;

#[derive(Debug, Error)]
enum ChildError {
    #[error(transparent)]
    Shm(#[from] ShmError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// One ensemble member's process identity, control channel, and the three
/// shared buffers the coordinator owns for it.
///
/// Created once at ensemble construction and destroyed only at explicit
/// shutdown; never recreated mid-run.
pub(crate) struct WorkerHandle {
    member: usize,
    pid: Pid,
    control: Option<UnixStream>,
    positions: SharedArray,
    forces: SharedArray,
    energy: SharedArray,
}

impl WorkerHandle {
    /// Creates the member's buffers and control channel, then forks the
    /// worker process. The evaluator factory runs only inside the child.
    ///
    /// `earlier` are the handles spawned before this one; the child closes
    /// their inherited parent-side control streams so that a worker's death
    /// is observable as a closed channel no matter the spawn order.
    #[instrument(skip_all, name = "spawn_worker", fields(member = member, atoms = atom_count))]
    pub fn spawn(
        member: usize,
        atom_count: usize,
        factory: EvaluatorFactory,
        earlier: &mut [WorkerHandle],
    ) -> Result<Self, EngineError> {
        let positions = SharedArray::create(3 * atom_count).map_err(spawn_error)?;
        let forces = SharedArray::create(3 * atom_count).map_err(spawn_error)?;
        let energy = SharedArray::create(1).map_err(spawn_error)?;
        let (parent_side, child_side) = UnixStream::pair().map_err(spawn_error)?;

        let positions_id = positions.os_id().to_owned();
        let forces_id = forces.os_id().to_owned();
        let energy_id = energy.os_id().to_owned();

        match unsafe { fork() }.map_err(spawn_error)? {
            ForkResult::Child => {
                // This branch never returns: the inherited segment owners on
                // the stack must not run their destructors in the child, so
                // every exit path goes through process::exit.
                drop(parent_side);
                for handle in earlier.iter_mut() {
                    handle.drop_control();
                }
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    run(
                        child_side,
                        &positions_id,
                        &forces_id,
                        &energy_id,
                        atom_count,
                        factory,
                    )
                }));
                let code = match outcome {
                    Ok(Ok(())) => 0,
                    Ok(Err(_)) => 1,
                    Err(_) => 101,
                };
                std::process::exit(code);
            }
            ForkResult::Parent { child } => {
                drop(child_side);
                debug!(pid = child.as_raw(), "worker process started");
                Ok(Self {
                    member,
                    pid: child,
                    control: Some(parent_side),
                    positions,
                    forces,
                    energy,
                })
            }
        }
    }

    pub fn member(&self) -> usize {
        self.member
    }

    pub fn pid_raw(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Closes this handle's parent-side control stream. Used by freshly
    /// forked children to discard inherited file descriptors, and implied by
    /// `stop`.
    pub fn drop_control(&mut self) {
        self.control = None;
    }

    /// Writes a position snapshot into the worker's input buffer. Must only
    /// be called while no request is in flight for this worker.
    pub fn publish(&mut self, positions: &[Point3<f64>]) {
        shm::pack_points(self.positions.as_mut_slice(), positions);
    }

    pub fn request(&mut self, snapshot: u64) -> Result<(), String> {
        let Some(control) = self.control.as_mut() else {
            return Err("control channel closed".into());
        };
        protocol::send(control, &Request::Evaluate { snapshot }).map_err(|e| e.to_string())
    }

    /// Blocks until the worker acknowledges `snapshot`, up to `timeout`.
    /// Any failure reason is returned as a string for the coordinator to
    /// wrap into its error taxonomy.
    pub fn await_ack(&mut self, snapshot: u64, timeout: Option<Duration>) -> Result<(), String> {
        let Some(control) = self.control.as_mut() else {
            return Err("control channel closed".into());
        };
        if let Err(e) = control.set_read_timeout(timeout) {
            return Err(e.to_string());
        }
        match protocol::recv::<Reply>(control) {
            Ok(Reply::Done { snapshot: acked }) if acked == snapshot => Ok(()),
            Ok(Reply::Done { snapshot: acked }) => Err(format!(
                "acknowledged stale snapshot {acked}, expected {snapshot}"
            )),
            Ok(Reply::Failed { reason }) => Err(reason),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Reads the worker's output buffers into a weighted member prediction.
    /// Valid only after a `Done` acknowledgment for the current snapshot.
    pub fn prediction(&self, weight: f64) -> MemberPrediction {
        MemberPrediction {
            energy: self.energy.as_slice()[0],
            forces: shm::unpack_vectors(self.forces.as_slice()),
            weight,
        }
    }

    /// Sends `Stop` and closes the control channel. A worker that already
    /// died counts as stopped.
    pub fn stop(&mut self) -> Result<(), String> {
        let Some(mut control) = self.control.take() else {
            return Ok(());
        };
        match protocol::send(&mut control, &Request::Stop) {
            Ok(()) | Err(ProtocolError::Closed) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Reaps the worker process. Idempotent: an already-reaped child is not
    /// an error.
    pub fn join(&mut self) -> Result<(), String> {
        match waitpid(self.pid, None) {
            Ok(_) => Ok(()),
            Err(Errno::ECHILD) => Ok(()),
            Err(e) => Err(format!("waitpid({}) failed: {e}", self.pid)),
        }
    }
}

fn spawn_error<E: ToString>(error: E) -> EngineError {
    EngineError::Spawn {
        reason: error.to_string(),
    }
}

/// The worker loop, running inside the child process.
fn run(
    mut control: UnixStream,
    positions_id: &str,
    forces_id: &str,
    energy_id: &str,
    atom_count: usize,
    factory: EvaluatorFactory,
) -> Result<(), ChildError> {
    let positions_view = SharedArrayView::open(positions_id, 3 * atom_count)?;
    let mut forces_view = SharedArrayView::open(forces_id, 3 * atom_count)?;
    let mut energy_view = SharedArrayView::open(energy_id, 1)?;

    // A failed construction keeps answering requests with the failure reason
    // instead of dying silently, so the coordinator can attribute the error.
    let mut evaluator = factory();

    loop {
        match protocol::recv::<Request>(&mut control) {
            Ok(Request::Evaluate { snapshot }) => {
                let reply = match evaluator.as_mut() {
                    Ok(evaluator) => evaluate_once(
                        evaluator.as_mut(),
                        &positions_view,
                        &mut forces_view,
                        &mut energy_view,
                        atom_count,
                        snapshot,
                    ),
                    Err(error) => Reply::Failed {
                        reason: error.to_string(),
                    },
                };
                protocol::send(&mut control, &reply)?;
            }
            Ok(Request::Stop) | Err(ProtocolError::Closed) => break,
            Err(error) => return Err(error.into()),
        }
    }
    Ok(())
}

fn evaluate_once(
    evaluator: &mut dyn Evaluator,
    positions_view: &SharedArrayView,
    forces_view: &mut SharedArrayView,
    energy_view: &mut SharedArrayView,
    atom_count: usize,
    snapshot: u64,
) -> Reply {
    let positions = shm::unpack_points(positions_view.as_slice());
    match evaluator.compute(&positions) {
        Ok(evaluation) => {
            if evaluation.forces.len() != atom_count {
                return Reply::Failed {
                    reason: EvaluatorError::ForceShape {
                        expected: atom_count,
                        actual: evaluation.forces.len(),
                    }
                    .to_string(),
                };
            }
            shm::pack_vectors(forces_view.as_mut_slice(), &evaluation.forces);
            energy_view.as_mut_slice()[0] = evaluation.energy;
            Reply::Done { snapshot }
        }
        Err(error) => Reply::Failed {
            reason: error.to_string(),
        },
    }
}

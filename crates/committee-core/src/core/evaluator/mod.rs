//! # Evaluator Module
//!
//! The capability interface every ensemble member implements, plus in-tree
//! reference potentials.
//!
//! An [`Evaluator`] maps atomic positions to an energy and per-atom forces.
//! The engine treats evaluators as opaque: a member is supplied as an
//! [`EvaluatorFactory`] that is invoked exactly once, inside the member's
//! worker process, so evaluator state (model weights, caches, device handles)
//! never crosses the process boundary.

pub mod potentials;

use crate::core::models::prediction::Evaluation;
use nalgebra::Point3;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum EvaluatorError {
    #[error("evaluator construction failed: {0}")]
    Construction(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("force array has {actual} rows, expected {expected}")]
    ForceShape { expected: usize, actual: usize },
}

/// Maps an atomic configuration's positions to an energy and per-atom forces.
///
/// Species and cell are fixed per ensemble and are expected to be baked into
/// the evaluator at construction; only positions vary between calls.
pub trait Evaluator: Send {
    fn compute(&mut self, positions: &[Point3<f64>]) -> Result<Evaluation, EvaluatorError>;
}

/// Constructs one ensemble member's evaluator inside its worker process.
///
/// The closure runs exactly once, after the worker process has been created;
/// a construction error is reported back to the coordinator as a failed
/// acknowledgment on the member's first evaluation request.
pub type EvaluatorFactory = Box<dyn FnOnce() -> Result<Box<dyn Evaluator>, EvaluatorError> + Send>;

use nalgebra::{Matrix3, Point3};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigurationError {
    #[error("species count ({species}) does not match atom count ({atoms})")]
    SpeciesCountMismatch { atoms: usize, species: usize },

    #[error("a configuration must contain at least one atom")]
    Empty,
}

/// An immutable snapshot of an atomic system.
///
/// This is the sole input type of the ensemble engine: Cartesian positions,
/// one species label per atom (by convention the atomic number), and the
/// 3×3 cell matrix whose rows are the lattice vectors. Species ordering and
/// the cell are fixed for the lifetime of an ensemble; only positions are
/// expected to change between evaluation rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    positions: Vec<Point3<f64>>,
    species: Vec<u32>,
    cell: Matrix3<f64>,
}

impl Configuration {
    /// Builds a configuration, validating that every atom has a species label
    /// and that the system is non-empty.
    pub fn new(
        positions: Vec<Point3<f64>>,
        species: Vec<u32>,
        cell: Matrix3<f64>,
    ) -> Result<Self, ConfigurationError> {
        if positions.is_empty() {
            return Err(ConfigurationError::Empty);
        }
        if positions.len() != species.len() {
            return Err(ConfigurationError::SpeciesCountMismatch {
                atoms: positions.len(),
                species: species.len(),
            });
        }
        Ok(Self {
            positions,
            species,
            cell,
        })
    }

    pub fn atom_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    pub fn species(&self) -> &[u32] {
        &self.species
    }

    pub fn cell(&self) -> &Matrix3<f64> {
        &self.cell
    }

    /// Returns a copy of this configuration with new positions, keeping the
    /// species and cell. The atom count must be unchanged.
    pub fn with_positions(
        &self,
        positions: Vec<Point3<f64>>,
    ) -> Result<Self, ConfigurationError> {
        if positions.len() != self.species.len() {
            return Err(ConfigurationError::SpeciesCountMismatch {
                atoms: positions.len(),
                species: self.species.len(),
            });
        }
        Ok(Self {
            positions,
            species: self.species.clone(),
            cell: self.cell,
        })
    }
}

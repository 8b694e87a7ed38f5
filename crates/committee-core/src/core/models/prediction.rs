use nalgebra::Vector3;

/// The raw output of a single evaluator: a total energy in eV and one force
/// vector per atom in eV/Å, in the same atom order as the input positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub energy: f64,
    pub forces: Vec<Vector3<f64>>,
}

impl Evaluation {
    pub fn new(energy: f64, forces: Vec<Vector3<f64>>) -> Self {
        Self { energy, forces }
    }
}

/// One ensemble member's contribution to a round: its evaluation annotated
/// with the statistical weight assigned to the member at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberPrediction {
    pub energy: f64,
    pub forces: Vec<Vector3<f64>>,
    pub weight: f64,
}

/// The immutable outcome of one evaluation round.
///
/// `energy` and `forces` are the quantities the active bias mode reports to
/// the driver (the plain weighted mean in `average` mode, a bias-transformed
/// surface otherwise). The ensemble mean and the disagreement scalars are
/// always carried alongside, so a driver can log uncertainty regardless of
/// the mode it integrates against.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleResult {
    /// The reported potential energy (mode-dependent).
    pub energy: f64,
    /// The reported forces (mode-dependent), one vector per atom.
    pub forces: Vec<Vector3<f64>>,
    /// Weighted standard deviation of the member energies.
    pub energy_std: f64,
    /// Weighted standard deviation of the member force fields
    /// (Frobenius norm over all atoms).
    pub forces_std: f64,
    /// The plain weighted-mean energy, independent of the bias mode.
    pub mean_energy: f64,
    /// The plain weighted-mean forces, independent of the bias mode.
    pub mean_forces: Vec<Vector3<f64>>,
    /// The per-member predictions this aggregate was derived from.
    pub members: Vec<MemberPrediction>,
}

impl EnsembleResult {
    pub fn atom_count(&self) -> usize {
        self.forces.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

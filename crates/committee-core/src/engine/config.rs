use crate::core::bias::BiasMode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bias width must be positive and finite, got {0}")]
    InvalidBiasWidth(f64),

    #[error("bias amplitude must be finite, got {0}")]
    InvalidBiasAmplitude(f64),

    #[error("weights must be finite, non-negative, and not all zero")]
    InvalidWeights,

    #[error("expected one weight per member ({members}), got {weights}")]
    WeightCount { members: usize, weights: usize },

    #[error("acknowledgment timeout must be positive and finite, got {0}")]
    InvalidTimeout(f64),

    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A requestable output of an evaluation round.
///
/// The ensemble implements [`Property::Energy`] and [`Property::Forces`];
/// requesting anything else fails with `UnsupportedProperty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Energy,
    Forces,
    Stress,
}

pub const IMPLEMENTED_PROPERTIES: &[Property] = &[Property::Energy, Property::Forces];

/// Construction-time parameters of an ensemble.
///
/// Loadable from TOML; every field has a default, so a settings file only
/// names what it overrides:
///
/// ```toml
/// bias_mode = "metadynamics"
/// bias_amplitude = 0.05
/// bias_width = 0.001
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnsembleSettings {
    /// Aggregation mode; see [`BiasMode`].
    pub bias_mode: BiasMode,
    /// Bias prefactor in eV.
    pub bias_amplitude: f64,
    /// Bias Gaussian width in eV².
    pub bias_width: f64,
    /// Per-member statistical weights; equal weights 1/N when omitted.
    pub weights: Option<Vec<f64>>,
    /// Bounded wait for worker acknowledgments, in seconds. `None` disables
    /// the bound, restoring the unbounded barrier wait.
    pub ack_timeout_secs: Option<f64>,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            bias_mode: BiasMode::Average,
            bias_amplitude: 0.5,
            bias_width: 0.05,
            weights: None,
            ack_timeout_secs: Some(60.0),
        }
    }
}

impl EnsembleSettings {
    pub fn builder() -> EnsembleSettingsBuilder {
        EnsembleSettingsBuilder::default()
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(input)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_secs.map(Duration::from_secs_f64)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bias_width.is_finite() && self.bias_width > 0.0) {
            return Err(ConfigError::InvalidBiasWidth(self.bias_width));
        }
        if !self.bias_amplitude.is_finite() {
            return Err(ConfigError::InvalidBiasAmplitude(self.bias_amplitude));
        }
        if let Some(weights) = &self.weights {
            let well_formed = weights.iter().all(|w| w.is_finite() && *w >= 0.0);
            if !well_formed || weights.iter().sum::<f64>() <= 0.0 {
                return Err(ConfigError::InvalidWeights);
            }
        }
        if let Some(secs) = self.ack_timeout_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(ConfigError::InvalidTimeout(secs));
            }
        }
        Ok(())
    }

    /// The weight vector for `members` ensemble members: the configured
    /// weights when present (length-checked), equal weights otherwise.
    pub(crate) fn resolved_weights(&self, members: usize) -> Result<Vec<f64>, ConfigError> {
        match &self.weights {
            Some(weights) if weights.len() != members => Err(ConfigError::WeightCount {
                members,
                weights: weights.len(),
            }),
            Some(weights) => Ok(weights.clone()),
            None => Ok(vec![1.0 / members as f64; members]),
        }
    }
}

#[derive(Default)]
pub struct EnsembleSettingsBuilder {
    bias_mode: Option<BiasMode>,
    bias_amplitude: Option<f64>,
    bias_width: Option<f64>,
    weights: Option<Vec<f64>>,
    ack_timeout_secs: Option<Option<f64>>,
}

impl EnsembleSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bias_mode(mut self, mode: BiasMode) -> Self {
        self.bias_mode = Some(mode);
        self
    }
    pub fn bias_amplitude(mut self, amplitude: f64) -> Self {
        self.bias_amplitude = Some(amplitude);
        self
    }
    pub fn bias_width(mut self, width: f64) -> Self {
        self.bias_width = Some(width);
        self
    }
    pub fn weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_secs = Some(Some(timeout.as_secs_f64()));
        self
    }
    pub fn no_ack_timeout(mut self) -> Self {
        self.ack_timeout_secs = Some(None);
        self
    }

    pub fn build(self) -> Result<EnsembleSettings, ConfigError> {
        let defaults = EnsembleSettings::default();
        let settings = EnsembleSettings {
            bias_mode: self.bias_mode.unwrap_or(defaults.bias_mode),
            bias_amplitude: self.bias_amplitude.unwrap_or(defaults.bias_amplitude),
            bias_width: self.bias_width.unwrap_or(defaults.bias_width),
            weights: self.weights.or(defaults.weights),
            ack_timeout_secs: self.ack_timeout_secs.unwrap_or(defaults.ack_timeout_secs),
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = EnsembleSettings::default();
        assert_eq!(settings.bias_mode, BiasMode::Average);
        assert_eq!(settings.bias_amplitude, 0.5);
        assert_eq!(settings.bias_width, 0.05);
        assert_eq!(settings.weights, None);
        assert_eq!(settings.ack_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn builder_overrides_selected_fields() {
        let settings = EnsembleSettings::builder()
            .bias_mode(BiasMode::MetaMix)
            .bias_width(0.001)
            .no_ack_timeout()
            .build()
            .unwrap();
        assert_eq!(settings.bias_mode, BiasMode::MetaMix);
        assert_eq!(settings.bias_width, 0.001);
        assert_eq!(settings.bias_amplitude, 0.5);
        assert_eq!(settings.ack_timeout(), None);
    }

    #[test]
    fn builder_rejects_non_positive_width() {
        let result = EnsembleSettings::builder().bias_width(0.0).build();
        assert!(matches!(result, Err(ConfigError::InvalidBiasWidth(_))));
    }

    #[test]
    fn builder_rejects_negative_weights() {
        let result = EnsembleSettings::builder()
            .weights(vec![0.5, -0.1])
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidWeights)));
    }

    #[test]
    fn parses_toml_with_mode_names() {
        let settings = EnsembleSettings::from_toml_str(
            r#"
            bias_mode = "vargrad"
            bias_width = 0.01
            weights = [0.2, 0.3, 0.5]
            "#,
        )
        .unwrap();
        assert_eq!(settings.bias_mode, BiasMode::VarGrad);
        assert_eq!(settings.weights, Some(vec![0.2, 0.3, 0.5]));
    }

    #[test]
    fn rejects_unknown_toml_keys() {
        let result = EnsembleSettings::from_toml_str("bias_strength = 1.0");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_unknown_mode_name() {
        let result = EnsembleSettings::from_toml_str(r#"bias_mode = "meta""#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn loads_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble.toml");
        std::fs::write(&path, "bias_mode = \"metadynamics\"\n").unwrap();

        let settings = EnsembleSettings::load(&path).unwrap();
        assert_eq!(settings.bias_mode, BiasMode::Metadynamics);
    }

    #[test]
    fn missing_settings_file_propagates_io_error() {
        let result = EnsembleSettings::load(Path::new("/nonexistent/ensemble.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn resolves_equal_weights_when_unset() {
        let settings = EnsembleSettings::default();
        let weights = settings.resolved_weights(4).unwrap();
        assert_eq!(weights, vec![0.25; 4]);
    }

    #[test]
    fn rejects_weight_count_mismatch() {
        let settings = EnsembleSettings::builder()
            .weights(vec![0.5, 0.5])
            .build()
            .unwrap();
        let result = settings.resolved_weights(3);
        assert!(matches!(
            result,
            Err(ConfigError::WeightCount {
                members: 3,
                weights: 2
            })
        ));
    }
}

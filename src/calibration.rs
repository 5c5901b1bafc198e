// src/calibration.rs - Persisted steps-per-cm factor
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Calibration factor must be a positive finite number, got {0}")]
    InvalidFactor(f64),
}

/// Key-value storage for floating-point calibration records.
pub trait CalibrationStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<f64>, CalibrationError>;
    fn set(&mut self, namespace: &str, key: &str, value: f64) -> Result<(), CalibrationError>;
}

type Namespaces = BTreeMap<String, BTreeMap<String, f64>>;

/// Calibration records kept in a TOML file, one table per namespace.
///
/// ```toml
/// [cutter]
/// steps_cm = 66.6667
/// ```
#[derive(Debug, Clone)]
pub struct FileCalibrationStore {
    path: PathBuf,
}

impl FileCalibrationStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Namespaces, CalibrationError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Namespaces::new()),
            Err(e) => Err(CalibrationError::Io(e)),
        }
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<f64>, CalibrationError> {
        Ok(self
            .read_all()?
            .get(namespace)
            .and_then(|table| table.get(key))
            .copied())
    }

    fn set(&mut self, namespace: &str, key: &str, value: f64) -> Result<(), CalibrationError> {
        let mut all = self.read_all()?;
        all.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        let contents = toml::to_string(&all)?;
        std::fs::write(&self.path, contents)?;
        tracing::debug!("Wrote {}.{} = {} to {}", namespace, key, value, self.path.display());
        Ok(())
    }
}

/// In-process store, for tests and for running without a writable filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryCalibrationStore {
    records: Namespaces,
}

impl CalibrationStore for MemoryCalibrationStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<f64>, CalibrationError> {
        Ok(self.records.get(namespace).and_then(|t| t.get(key)).copied())
    }

    fn set(&mut self, namespace: &str, key: &str, value: f64) -> Result<(), CalibrationError> {
        self.records
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}

fn is_valid_factor(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Read the factor once at startup. A missing or unusable record falls back to `default`.
pub fn load_factor<S: CalibrationStore>(store: &S, namespace: &str, key: &str, default: f64) -> f64 {
    match store.get(namespace, key) {
        Ok(Some(value)) if is_valid_factor(value) => value,
        Ok(Some(value)) => {
            tracing::warn!("Ignoring stored calibration {}.{} = {}", namespace, key, value);
            default
        }
        Ok(None) => default,
        Err(e) => {
            tracing::warn!("Failed to read calibration {}.{}: {}", namespace, key, e);
            default
        }
    }
}

/// Validate and persist a new factor.
pub fn store_factor<S: CalibrationStore>(
    store: &mut S,
    namespace: &str,
    key: &str,
    value: f64,
) -> Result<(), CalibrationError> {
    if !is_valid_factor(value) {
        return Err(CalibrationError::InvalidFactor(value));
    }
    store.set(namespace, key, value)?;
    tracing::info!("Calibration {}.{} set to {:.4}", namespace, key, value);
    Ok(())
}

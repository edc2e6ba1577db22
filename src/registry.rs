use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CongressError, Result};
use crate::models::{Cutout, Prediction};

/// One independently trained classifier.
///
/// Implementations wrap whatever runs the model; they must be stateless
/// with respect to subjects so one voter can sit in many elections.
pub trait Voter: Send + Sync {
    /// Top-2 classes for one cutout. May be slow; the caller never imposes
    /// a timeout.
    fn predict(&self, cutout: &Cutout) -> anyhow::Result<Prediction>;
}

impl<F> Voter for F
where
    F: Fn(&Cutout) -> anyhow::Result<Prediction> + Send + Sync,
{
    fn predict(&self, cutout: &Cutout) -> anyhow::Result<Prediction> {
        self(cutout)
    }
}

/// The voters making up one ensemble, keyed by voter id (usually the model
/// path). Iteration is in id order.
#[derive(Clone, Default)]
pub struct VoterRegistry {
    voters: BTreeMap<String, Arc<dyn Voter>>,
}

impl std::fmt::Debug for VoterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoterRegistry")
            .field("voters", &self.voters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl VoterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files in `dir` whose extension matches `extension`, sorted by path.
    pub fn model_paths(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(CongressError::Configuration(format!(
                "invalid model directory: {}",
                dir.display()
            )));
        }

        let entries = fs::read_dir(dir).map_err(|e| {
            CongressError::Configuration(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let extension = extension.trim_start_matches('.');
        let mut paths = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::trace!("⚠️  Error reading entry in {:?}: {}", dir, e);
                    continue;
                }
            };
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Build a registry from every model file in `dir`, constructing each
    /// voter with `load`.
    pub fn discover<V, F>(dir: &Path, extension: &str, mut load: F) -> Result<Self>
    where
        V: Voter + 'static,
        F: FnMut(&Path) -> anyhow::Result<V>,
    {
        let paths = Self::model_paths(dir, extension)?;
        if paths.is_empty() {
            return Err(CongressError::Configuration(format!(
                "no .{} voter files in {}",
                extension.trim_start_matches('.'),
                dir.display()
            )));
        }

        tracing::info!("🗳️  Registering {} voters from {}", paths.len(), dir.display());
        let mut registry = Self::new();
        for path in paths {
            tracing::info!("🧑‍⚖️ Registering voter {}", path.display());
            let voter = load(&path).map_err(|e| {
                CongressError::Configuration(format!(
                    "failed to load voter {}: {:#}",
                    path.display(),
                    e
                ))
            })?;
            registry.register(path.display().to_string(), Arc::new(voter));
        }

        Ok(registry)
    }

    /// Build a registry from explicit voters. Fails if none are given.
    pub fn from_voters<I>(voters: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn Voter>)>,
    {
        let mut registry = Self::new();
        for (id, voter) in voters {
            registry.register(id, voter);
        }
        if registry.is_empty() {
            return Err(CongressError::Configuration(
                "no voters were provided".to_string(),
            ));
        }
        Ok(registry)
    }

    /// Add a voter. Registering an id twice keeps the first voter and
    /// returns `false`.
    pub fn register(&mut self, id: impl Into<String>, voter: Arc<dyn Voter>) -> bool {
        let id = id.into();
        if self.voters.contains_key(&id) {
            tracing::debug!("Voter {} already registered", id);
            return false;
        }
        self.voters.insert(id, voter);
        true
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Voter>> {
        self.voters.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.voters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Voter>)> {
        self.voters.iter().map(|(id, voter)| (id.as_str(), voter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use tempfile::TempDir;

    fn constant(class: u32) -> impl Voter {
        move |_: &Cutout| -> anyhow::Result<Prediction> {
            Ok(Prediction::top2(class, 0.9, (class + 1) % 6, 0.05))
        }
    }

    fn fixed(class: u32) -> Arc<dyn Voter> {
        Arc::new(constant(class))
    }

    #[test]
    fn test_discover_filters_by_extension() {
        let dir = TempDir::new().unwrap();
        for name in ["b.pt", "a.pt", "notes.txt", "c.pth"] {
            fs::write(dir.path().join(name), b"weights").unwrap();
        }

        let registry = VoterRegistry::discover(dir.path(), "pt", |_path| {
            Ok(constant(1))
        })
        .unwrap();

        assert_eq!(registry.len(), 2);
        let ids: Vec<&str> = registry.ids().collect();
        assert!(ids[0].ends_with("a.pt"));
        assert!(ids[1].ends_with("b.pt"));
    }

    #[test]
    fn test_discover_missing_directory() {
        let err = VoterRegistry::discover(Path::new("/no/such/models"), "pt", |_| {
            Ok(constant(1))
        })
        .unwrap_err();
        assert!(matches!(err, CongressError::Configuration(_)));
        assert!(err.to_string().contains("invalid model directory"));
    }

    #[test]
    fn test_discover_empty_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("readme.md"), b"no models here").unwrap();

        let err = VoterRegistry::discover(dir.path(), ".pt", |_| {
            Ok(constant(1))
        })
        .unwrap_err();
        assert!(err.to_string().contains("no .pt voter files"));
    }

    #[test]
    fn test_discover_load_failure_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.pt"), b"").unwrap();

        let result = VoterRegistry::discover(dir.path(), "pt", |path| {
            if path.ends_with("broken.pt") {
                bail!("state dict mismatch");
            }
            Ok(constant(1))
        });
        let err = result.unwrap_err();
        assert!(matches!(err, CongressError::Configuration(_)));
        assert!(err.to_string().contains("state dict mismatch"));
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = VoterRegistry::new();
        assert!(registry.register("m0", fixed(1)));
        assert!(!registry.register("m0", fixed(2)));
        assert_eq!(registry.len(), 1);

        let prediction = registry.get("m0").unwrap().predict(&Cutout::named("x")).unwrap();
        assert_eq!(prediction.primary.class, 1);
    }

    #[test]
    fn test_from_voters_requires_at_least_one() {
        let err = VoterRegistry::from_voters(Vec::<(String, Arc<dyn Voter>)>::new()).unwrap_err();
        assert!(matches!(err, CongressError::Configuration(_)));

        let registry =
            VoterRegistry::from_voters(vec![("a".to_string(), fixed(0)), ("b".to_string(), fixed(3))])
                .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(format!("{:?}", registry), "VoterRegistry { voters: [\"a\", \"b\"] }");
    }
}

use super::{Modality, ModelCapabilityRegistry};
use eyre::{Result, WrapErr};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::RwLock,
};

/// Model id to accepted input modalities.
///
/// Seeded from an optional JSON file (`{"model/id": ["text", "image"]}`) and
/// refreshed whenever the catalog is fetched. Models absent from the table are
/// assumed to accept everything; the upstream then has the final word.
#[derive(Debug, Default)]
pub struct CapabilityTable {
    models: RwLock<HashMap<String, HashSet<Modality>>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S, M>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, M)>,
        S: Into<String>,
        M: IntoIterator<Item = Modality>,
    {
        let table = Self::new();
        for (model, modalities) in entries {
            table.set(model, modalities);
        }
        table
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read capabilities file {}", path.display()))?;
        let parsed: HashMap<String, Vec<Modality>> = serde_json::from_str(&raw)
            .wrap_err_with(|| format!("invalid capabilities file {}", path.display()))?;
        let table = Self::from_entries(parsed);
        tracing::info!("[Capabilities] Loaded {} models from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn set<M>(&self, model: impl Into<String>, modalities: M)
    where
        M: IntoIterator<Item = Modality>,
    {
        let mut set: HashSet<Modality> = modalities.into_iter().collect();
        set.insert(Modality::Text);
        match self.models.write() {
            Ok(mut models) => {
                models.insert(model.into(), set);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(model.into(), set);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.models.read().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModelCapabilityRegistry for CapabilityTable {
    fn supports(&self, model: &str, modality: Modality) -> bool {
        if modality == Modality::Text {
            return true;
        }
        let Ok(models) = self.models.read() else {
            return true;
        };
        match models.get(model) {
            Some(set) => set.contains(&modality),
            None => true,
        }
    }
}

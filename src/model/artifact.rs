use jiff::Timestamp;
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ModelUnavailableError, ObjectStoreError},
    object_store::ObjectStore,
};

use super::{features::feature_names, ols};

pub const ARTIFACT_VERSION: u32 = 1;

/// A trained load model as stored in the object store.  The coefficients
/// line up with `features`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub trained_at: Timestamp,
    pub features: Vec<String>,
    pub coefficients: Vec<f64>,
    pub r_squared: f64,
    pub n_observations: usize,
}

impl ModelArtifact {
    pub fn predict(&self, x: &[f64]) -> f64 {
        ols::predict(&self.coefficients, x)
    }

    /// `{prefix}/ols_model_%Y%m%d_%H%M%S.json`
    pub fn key(&self, prefix: &str) -> String {
        format!(
            "{}/ols_model_{}.json",
            prefix,
            self.trained_at.strftime("%Y%m%d_%H%M%S")
        )
    }

    pub fn save(&self, store: &ObjectStore, prefix: &str) -> Result<String, ObjectStoreError> {
        let key = self.key(prefix);
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|e| ObjectStoreError::Encode(key.clone(), e))?;
        store.put(&key, &bytes)?;
        info!("Saved model to {}", key);
        Ok(key)
    }

    /// The most recently trained model.  Fails if there is none or if it was
    /// trained on a different feature set.
    pub fn load_latest(store: &ObjectStore, prefix: &str) -> Result<Self, ModelUnavailableError> {
        let key = store
            .latest(&format!("{}/ols_model_", prefix), ".json")?
            .ok_or_else(|| ModelUnavailableError::NotFound(prefix.to_string()))?;
        let bytes = store.get(&key)?;
        let model: ModelArtifact = serde_json::from_slice(&bytes).map_err(|e| {
            ModelUnavailableError::Decode {
                key: key.clone(),
                source: e,
            }
        })?;
        let expected = feature_names();
        if model.features != expected || model.coefficients.len() != expected.len() {
            return Err(ModelUnavailableError::FeatureMismatch {
                expected,
                found: model.features,
            });
        }
        info!("Loaded model {} (R2 {:.4})", key, model.r_squared);
        Ok(model)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::error::Error;

    use super::*;

    /// A model that predicts `lag24 + offset`.
    pub(crate) fn lag24_model(offset: f64) -> ModelArtifact {
        let features = feature_names();
        let mut coefficients = vec![0.0; features.len()];
        coefficients[0] = 1.0;
        // one-hot hours sum to one
        for c in coefficients.iter_mut().skip(9).take(24) {
            *c = offset;
        }
        ModelArtifact {
            version: ARTIFACT_VERSION,
            trained_at: Timestamp::UNIX_EPOCH,
            features,
            coefficients,
            r_squared: 1.0,
            n_observations: 0,
        }
    }

    #[test]
    fn save_and_load_latest() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::new(dir.path());
        assert!(matches!(
            ModelArtifact::load_latest(&store, "modelling"),
            Err(ModelUnavailableError::NotFound(_))
        ));

        let mut old = lag24_model(1.0);
        old.trained_at = "2025-03-01T06:00:00Z".parse()?;
        let mut new = lag24_model(2.0);
        new.trained_at = "2025-03-08T06:00:00Z".parse()?;
        assert_eq!(
            new.save(&store, "modelling")?,
            "modelling/ols_model_20250308_060000.json"
        );
        old.save(&store, "modelling")?;

        let model = ModelArtifact::load_latest(&store, "modelling")?;
        assert_eq!(model, new);
        Ok(())
    }

    #[test]
    fn coefficients_survive_exactly() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::new(dir.path());
        let mut model = lag24_model(0.1 + 0.2);
        model.coefficients[1] = -0.10253787762750957;
        model.coefficients[2] = 1.0 / 3.0;
        model.r_squared = 0.9876543210987654;
        model.save(&store, "modelling")?;

        let loaded = ModelArtifact::load_latest(&store, "modelling")?;
        for (a, b) in loaded.coefficients.iter().zip(&model.coefficients) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(loaded, model);
        Ok(())
    }

    #[test]
    fn stale_or_broken_artifacts() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::new(dir.path());

        let mut model = lag24_model(0.0);
        model.features.pop();
        model.coefficients.pop();
        model.save(&store, "modelling")?;
        assert!(matches!(
            ModelArtifact::load_latest(&store, "modelling"),
            Err(ModelUnavailableError::FeatureMismatch { .. })
        ));

        store.put("modelling/ols_model_20990101_000000.json", b"not json")?;
        assert!(matches!(
            ModelArtifact::load_latest(&store, "modelling"),
            Err(ModelUnavailableError::Decode { .. })
        ));
        Ok(())
    }
}

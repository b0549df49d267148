use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{params::ParamSet, pipeline::ClassifierPipeline, ModelFamily};
use crate::{
    error::{PipelineError, Result},
    features::FeatureSet,
};

/// Persisted classifier with the schema it was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    /// Artifact identifier.
    pub id: Uuid,
    /// Model family.
    pub family: ModelFamily,
    /// Fitted preprocessing and classifier.
    pub pipeline: ClassifierPipeline,
    /// Ordered training columns.
    pub feature_columns: Vec<String>,
    /// Strategies that produced the columns.
    pub feature_set: FeatureSet,
    /// Hyper-parameters the classifier was built from.
    pub params: ParamSet,
    /// Creation time.
    pub trained_at: DateTime<Utc>,
}

impl TrainedModel {
    /// Wraps a freshly fitted pipeline.
    #[must_use]
    pub fn new(
        family: ModelFamily,
        pipeline: ClassifierPipeline,
        feature_columns: Vec<String>,
        feature_set: FeatureSet,
        params: ParamSet,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            family,
            pipeline,
            feature_columns,
            feature_set,
            params,
            trained_at: Utc::now(),
        }
    }

    /// Sorted class labels of the pipeline.
    #[must_use]
    pub fn classes(&self) -> &[String] {
        self.pipeline.classes()
    }
}

/// Persistence for trained models, one slot per family.
pub trait ModelStore: Send + Sync {
    /// Persists `model`, replacing any previous artifact of its family.
    fn save(&self, model: &TrainedModel) -> Result<PathBuf>;

    /// Loads the artifact of `family`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ArtifactMissing`] when nothing was saved for it.
    fn load(&self, family: ModelFamily) -> Result<TrainedModel>;
}

/// Stores artifacts as `model_<family>.json` inside one directory.
#[derive(Debug, Clone)]
pub struct DirectoryModelStore {
    root: PathBuf,
}

impl DirectoryModelStore {
    /// Store rooted at `root`; the directory is created on first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Artifact path for `family`.
    #[must_use]
    pub fn artifact_path(&self, family: ModelFamily) -> PathBuf {
        self.root.join(format!("model_{}.json", family.as_str()))
    }

    /// Directory holding the artifacts.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ModelStore for DirectoryModelStore {
    fn save(&self, model: &TrainedModel) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let path = self.artifact_path(model.family);
        let data = serde_json::to_vec(model)?;
        fs::write(&path, data)?;
        Ok(path)
    }

    fn load(&self, family: ModelFamily) -> Result<TrainedModel> {
        let path = self.artifact_path(family);
        if !path.is_file() {
            return Err(PipelineError::ArtifactMissing(path));
        }
        let data = fs::read(&path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fitted(family: ModelFamily) -> TrainedModel {
        let x = array![[0.0, 1.0], [0.1, 1.2], [0.2, 0.9], [3.0, 5.0], [3.1, 5.2], [2.9, 4.8]];
        let labels: Vec<String> = ["a", "a", "a", "b", "b", "b"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        let params = super::super::params::param_set([("n_estimators", 5_i64.into())]);
        let spec = family.build(&params).unwrap();
        let pipeline = ClassifierPipeline::fit(&spec, x.view(), &labels).unwrap();
        TrainedModel::new(
            family,
            pipeline,
            vec!["f0".into(), "f1".into()],
            FeatureSet::Both,
            params,
        )
    }

    #[test]
    fn save_then_load_restores_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryModelStore::new(dir.path().join("artifacts"));
        let model = fitted(ModelFamily::RandomForest);
        let path = store.save(&model).unwrap();
        assert!(path.ends_with("model_randomforest.json"));
        let loaded = store.load(ModelFamily::RandomForest).unwrap();
        assert_eq!(loaded.feature_columns, model.feature_columns);
        assert_eq!(loaded.feature_set, FeatureSet::Both);
        assert_eq!(loaded.classes(), ["a".to_owned(), "b".to_owned()]);
        let probe = array![[0.05, 1.0], [3.0, 5.1]];
        let before = model.pipeline.predict_proba(probe.view());
        let after = loaded.pipeline.predict_proba(probe.view());
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn missing_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryModelStore::new(dir.path());
        assert!(matches!(
            store.load(ModelFamily::LogReg),
            Err(PipelineError::ArtifactMissing(path)) if path.ends_with("model_logreg.json")
        ));
    }
}

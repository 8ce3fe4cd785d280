use std::path::PathBuf;
use std::sync::Arc;

use fw_types::{config_error, FwResult};
use serde::{Deserialize, Serialize};

use crate::builder::DatasetCacheBuilder;
use crate::kfold::KFoldPartitioner;
use crate::registry::{FileRegistry, LocalRegistry};
use crate::trainer::VwProcess;

pub const TRAINER_ENV: &str = "FOLDWISE_TRAINER";
pub const SCRATCH_DIR_ENV: &str = "FOLDWISE_SCRATCH_DIR";
pub const CACHE_DIR_ENV: &str = "FOLDWISE_CACHE_DIR";
pub const RUN_PREFIX_ENV: &str = "FOLDWISE_RUN_PREFIX";

/// Where the pipeline runs its trainer and keeps its files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub trainer_program: PathBuf,
    pub trainer_args: Vec<String>,
    pub scratch_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Fixed prefix for cache names; a random one is used when unset.
    pub run_prefix: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("foldwise");
        Self {
            trainer_program: PathBuf::from("vw"),
            trainer_args: Vec::new(),
            scratch_dir: std::env::temp_dir().join("foldwise").join("scratch"),
            cache_dir: data_dir.join("cache"),
            run_prefix: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `FOLDWISE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(program) = lookup(TRAINER_ENV) {
            config.trainer_program = PathBuf::from(program);
        }
        if let Some(dir) = lookup(SCRATCH_DIR_ENV) {
            config.scratch_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(CACHE_DIR_ENV) {
            config.cache_dir = PathBuf::from(dir);
        }
        config.run_prefix = lookup(RUN_PREFIX_ENV).filter(|p| !p.trim().is_empty());
        config
    }

    pub fn from_json(json: &str) -> FwResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FwResult<()> {
        if self.trainer_program.as_os_str().is_empty() {
            return Err(config_error!("trainer program must not be empty"));
        }
        if self.scratch_dir == self.cache_dir {
            return Err(config_error!(
                "scratch and cache directories must differ: {}",
                self.cache_dir.display()
            ));
        }
        Ok(())
    }

    pub fn with_trainer<P: Into<PathBuf>>(mut self, program: P) -> Self {
        self.trainer_program = program.into();
        self
    }

    pub fn with_trainer_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trainer_args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_run_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.run_prefix = Some(prefix.into());
        self
    }

    pub fn trainer(&self) -> VwProcess {
        VwProcess::new(&self.trainer_program).with_args(self.trainer_args.iter().cloned())
    }

    pub fn local_registry(&self) -> FwResult<LocalRegistry> {
        LocalRegistry::new(&self.cache_dir)
    }

    /// Partitioner wired to the configured trainer and the given registry.
    pub fn partitioner(&self, registry: Arc<dyn FileRegistry>) -> FwResult<KFoldPartitioner> {
        self.validate()?;
        let builder =
            DatasetCacheBuilder::new(Arc::new(self.trainer()), registry, &self.scratch_dir)?;
        let partitioner = KFoldPartitioner::new(builder);
        Ok(match &self.run_prefix {
            Some(prefix) => partitioner.with_run_prefix(prefix.clone()),
            None => partitioner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_types::FwError;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_use_vw_and_separate_dirs() {
        let config = PipelineConfig::default();
        assert_eq!(config.trainer_program, PathBuf::from("vw"));
        assert!(config.cache_dir.ends_with("foldwise/cache"));
        assert!(config.run_prefix.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            (TRAINER_ENV, "/opt/vw/bin/vw"),
            (CACHE_DIR_ENV, "/var/foldwise"),
            (RUN_PREFIX_ENV, "nightly"),
        ]
        .into_iter()
        .collect();
        let config = PipelineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.trainer_program, PathBuf::from("/opt/vw/bin/vw"));
        assert_eq!(config.cache_dir, PathBuf::from("/var/foldwise"));
        assert_eq!(config.run_prefix.as_deref(), Some("nightly"));
        assert_eq!(config.scratch_dir, PipelineConfig::default().scratch_dir);
    }

    #[test]
    fn blank_run_prefix_is_ignored() {
        let config = PipelineConfig::from_lookup(|k| (k == RUN_PREFIX_ENV).then(|| "  ".into()));
        assert!(config.run_prefix.is_none());
    }

    #[test]
    fn json_fills_missing_fields_and_validates() {
        let config =
            PipelineConfig::from_json(r#"{"trainer_program": "vw-9", "trainer_args": ["--hash", "all"]}"#)
                .unwrap();
        assert_eq!(config.trainer_program, PathBuf::from("vw-9"));
        assert_eq!(
            config.trainer().command_args(
                std::path::Path::new("i"),
                "",
                std::path::Path::new("o")
            )[..2],
            ["--hash".to_string(), "all".to_string()]
        );

        let err = PipelineConfig::from_json(r#"{"scratch_dir": "/x", "cache_dir": "/x"}"#)
            .unwrap_err();
        assert!(matches!(err, FwError::Config(_)));
    }

    #[test]
    fn partitioner_uses_configured_prefix() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::default()
            .with_scratch_dir(dir.path().join("scratch"))
            .with_cache_dir(dir.path().join("cache"))
            .with_run_prefix("exp7");
        let registry = Arc::new(config.local_registry().unwrap());
        let partitioner = config.partitioner(registry).unwrap();
        assert_eq!(
            partitioner.cache_name(3, crate::kfold::FoldRole::Test),
            "exp7-fold3-test"
        );
        assert!(dir.path().join("scratch").is_dir());
        assert!(dir.path().join("cache").is_dir());
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fw_types::{ConfigMap, ExternalToolError, FwResult, StorageError};
use tempfile::TempPath;
use tracing::debug;

use crate::options::encode_cache_options;
use crate::registry::{check_name, FileRegistry};
use crate::source::DatasetSource;
use crate::trainer::CacheTrainer;

/// Produces a trainer cache for one dataset and publishes it by name.
#[derive(Debug, Clone)]
pub struct DatasetCacheBuilder {
    trainer: Arc<dyn CacheTrainer>,
    registry: Arc<dyn FileRegistry>,
    scratch_dir: PathBuf,
}

impl DatasetCacheBuilder {
    pub fn new<P: Into<PathBuf>>(
        trainer: Arc<dyn CacheTrainer>,
        registry: Arc<dyn FileRegistry>,
        scratch_dir: P,
    ) -> FwResult<Self> {
        let scratch_dir = scratch_dir.into();
        fs::create_dir_all(&scratch_dir)?;
        Ok(Self {
            trainer,
            registry,
            scratch_dir,
        })
    }

    pub fn registry(&self) -> &Arc<dyn FileRegistry> {
        &self.registry
    }

    pub fn trainer(&self) -> &Arc<dyn CacheTrainer> {
        &self.trainer
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Build the cache for `source` and register it as `cache_name`.
    ///
    /// `cache_name` must be unique within the registry; callers running
    /// several builds (folds, roles, concurrent runs) disambiguate it.
    /// Trainer failures are returned as-is and never retried.
    pub fn build_cache(
        &self,
        source: DatasetSource,
        cache_name: &str,
        config: &ConfigMap,
    ) -> FwResult<String> {
        check_name(cache_name)?;
        let options = encode_cache_options(config);
        let kind = source.kind();

        let input = source.materialize(&self.scratch_dir)?;
        let output = self.allocate_output(cache_name)?;
        debug!(
            "Building cache {} from {} source with options [{}]",
            cache_name, kind, options
        );

        self.trainer.build_cache(input.path(), &options, &output)?;
        drop(input);
        ensure_output(self.trainer.name(), &output)?;

        let name = self.registry.save(cache_name, &output)?;
        // the registry owns the file from here on
        let _ = output.keep();
        Ok(name)
    }

    fn allocate_output(&self, cache_name: &str) -> FwResult<TempPath> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{cache_name}-"))
            .suffix(".cache")
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| StorageError::TempFile {
                dir: self.scratch_dir.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(file.into_temp_path())
    }
}

fn ensure_output(program: &str, output: &Path) -> FwResult<()> {
    let written = fs::metadata(output).map(|m| m.len() > 0).unwrap_or(false);
    if !written {
        return Err(ExternalToolError::MissingOutput {
            program: program.to_string(),
            path: output.display().to_string(),
        }
        .into());
    }
    Ok(())
}

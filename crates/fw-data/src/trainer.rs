//! External trainer invocation in cache-generation mode.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use fw_types::ExternalToolError;
use tracing::debug;

/// Something that turns a text dataset into a binary cache file.
pub trait CacheTrainer: Send + Sync + Debug {
    /// Read `input`, apply `options`, write the cache to `output`.
    ///
    /// Must be deterministic for the same input and options.
    fn build_cache(&self, input: &Path, options: &str, output: &Path)
        -> Result<(), ExternalToolError>;

    /// Program name used in error messages.
    fn name(&self) -> &str;
}

/// Runs a Vowpal Wabbit compatible binary that only writes a cache.
#[derive(Debug, Clone, PartialEq)]
pub struct VwProcess {
    program: PathBuf,
    display_name: String,
    extra_args: Vec<String>,
}

impl VwProcess {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        let program = program.into();
        let display_name = program.display().to_string();
        Self {
            program,
            display_name,
            extra_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.extra_args.push(arg.into());
        }
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments for one invocation, in order.
    ///
    /// Options are split on whitespace; option values cannot contain spaces.
    pub fn command_args(&self, input: &Path, options: &str, output: &Path) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.extend(options.split_whitespace().map(str::to_string));
        args.extend([
            "-d".to_string(),
            input.display().to_string(),
            "-k".to_string(),
            "--cache_file".to_string(),
            output.display().to_string(),
            "--noop".to_string(),
            "--quiet".to_string(),
        ]);
        args
    }
}

impl CacheTrainer for VwProcess {
    fn build_cache(
        &self,
        input: &Path,
        options: &str,
        output: &Path,
    ) -> Result<(), ExternalToolError> {
        let args = self.command_args(input, options, output);
        debug!("Running {} {}", self.display_name, args.join(" "));

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ExternalToolError::Spawn {
                program: self.display_name.clone(),
                message: e.to_string(),
            })?;

        if !result.status.success() {
            return Err(ExternalToolError::NonZeroExit {
                program: self.display_name.clone(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.display_name
    }
}

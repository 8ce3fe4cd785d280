use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use fw_types::ExternalToolError;

use crate::trainer::CacheTrainer;

/// Writes the option string, a newline, then the input bytes as the "cache".
#[derive(Debug, Default)]
pub(crate) struct EchoTrainer {
    calls: AtomicUsize,
    fail_on_call: Option<usize>,
    write_nothing: bool,
}

impl EchoTrainer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`th invocation (zero-based).
    pub(crate) fn failing_on(n: usize) -> Self {
        Self {
            fail_on_call: Some(n),
            ..Self::default()
        }
    }

    /// Succeed without producing any output.
    pub(crate) fn silent() -> Self {
        Self {
            write_nothing: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CacheTrainer for EchoTrainer {
    fn build_cache(
        &self,
        input: &Path,
        options: &str,
        output: &Path,
    ) -> Result<(), ExternalToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call) {
            return Err(ExternalToolError::NonZeroExit {
                program: "echo-trainer".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("refusing call {call}"),
            });
        }
        if self.write_nothing {
            return Ok(());
        }

        let mut body = format!("{options}\n").into_bytes();
        body.extend(fs::read(input).map_err(|e| ExternalToolError::Spawn {
            program: "echo-trainer".to_string(),
            message: e.to_string(),
        })?);
        fs::write(output, body).map_err(|e| ExternalToolError::Spawn {
            program: "echo-trainer".to_string(),
            message: e.to_string(),
        })
    }

    fn name(&self) -> &str {
        "echo-trainer"
    }
}

/// Dataset lines stored in an echo cache, skipping the options header.
pub(crate) fn cached_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

/// Exact input bytes stored in an echo cache, after the options header.
pub(crate) fn cached_bytes(path: &Path) -> Vec<u8> {
    let body = fs::read(path).unwrap();
    let start = body.iter().position(|b| *b == b'\n').map_or(body.len(), |i| i + 1);
    body[start..].to_vec()
}

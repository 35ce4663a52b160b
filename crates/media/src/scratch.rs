//! Per-job scratch files.

use std::path::{Path, PathBuf};

use {
    tracing::{debug, warn},
    uuid::Uuid,
};

/// Input/output path pair for one conversion job.
///
/// Paths are keyed by a fresh UUID so concurrent jobs never share files.
/// Both files are removed when the value is dropped, whatever the outcome of
/// the job. Removal never fails the caller: a missing file is ignored and any
/// other error is logged.
#[derive(Debug)]
pub struct ScratchFiles {
    input: PathBuf,
    output: PathBuf,
}

impl ScratchFiles {
    pub fn allocate(dir: &Path, input_ext: &str, output_ext: &str) -> Self {
        let id = Uuid::new_v4().simple();
        Self {
            input: dir.join(format!("in-{id}.{input_ext}")),
            output: dir.join(format!("st-{id}.{output_ext}")),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in [&self.input, &self.output] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed scratch file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove scratch file");
                },
            }
        }
    }
}

//! Copies local files into a build context and removes them afterwards.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Failed to copy '{}' to '{}': {source}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to remove file '{}': {message}", .path.display())]
    Delete { path: PathBuf, message: String },
}

/// Deletes `path`. A file that does not exist is logged and treated as done.
pub fn delete_file(path: &Path) -> Result<(), StagingError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!("{} has been deleted.", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            error!("{} does not exist.", path.display());
            Ok(())
        }
        Err(e) => {
            error!("Failed to remove file '{}': {e}", path.display());
            Err(StagingError::Delete {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    }
}

/// Files copied into a build context by [`stage_files`].
#[derive(Debug, Default)]
#[must_use = "staged files should be removed with cleanup()"]
pub struct StagedFiles {
    paths: Vec<PathBuf>,
}

impl StagedFiles {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Deletes every staged copy. All deletions are attempted; the first
    /// failure is returned.
    pub fn cleanup(self) -> Result<(), StagingError> {
        let mut first_error = None;
        for path in &self.paths {
            if let Err(e) = delete_file(path) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Copies each of `files` into `destination`.
///
/// Relative paths keep their relative location under `destination`; absolute
/// paths are copied by file name. A file that already lives at its target
/// location is left alone and not scheduled for removal. On failure the
/// copies made so far are removed again.
pub fn stage_files(files: &[PathBuf], destination: &Path) -> Result<StagedFiles, StagingError> {
    let mut staged = StagedFiles::default();

    for file in files {
        let target = target_path(file, destination);
        if same_file(file, &target) {
            debug!("{} is already in the build context", file.display());
            continue;
        }

        if let Err(source) = copy_file(file, &target) {
            let error = StagingError::Copy {
                from: file.clone(),
                to: target,
                source,
            };
            let _ = staged.cleanup();
            return Err(error);
        }
        debug!("Staged {} as {}", file.display(), target.display());
        staged.paths.push(target);
    }

    Ok(staged)
}

fn target_path(file: &Path, destination: &Path) -> PathBuf {
    if file.is_absolute() {
        match file.file_name() {
            Some(name) => destination.join(name),
            None => destination.to_path_buf(),
        }
    } else {
        destination.join(file)
    }
}

fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(from, to).map(|_| ())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

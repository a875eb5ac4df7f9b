//! Writing extracted artifacts to disk.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use normalize_path::NormalizePath;

use crate::error::{ExtractError, Result};
use crate::firmware::FirmwareArtifact;

/// Writes every artifact into `output`, creating it if needed.
///
/// Existing files are overwritten. Returns the written paths in artifact
/// order.
pub fn write_artifacts(output: &Path, artifacts: &[FirmwareArtifact]) -> Result<Vec<PathBuf>> {
    let output = output.normalize();
    fs::create_dir_all(&output)?;

    let mut written = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let path = output.join(&artifact.filename).normalize();

        // Filenames come from resource names inside the binary
        if !path.starts_with(&output) || path == output {
            return Err(ExtractError::PathTraversal(path));
        }

        debug!("Writing {} ({:#X} bytes)", path.display(), artifact.bytes.len());
        fs::write(&path, &artifact.bytes)?;
        written.push(path);
    }

    Ok(written)
}

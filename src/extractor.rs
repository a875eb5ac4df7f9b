//! Firmware extractor for KingstVIS executables.

use std::fs::File;

use log::{debug, info, warn};

use crate::binary::{self, BinaryImage};
use crate::config::ExtractorConfig;
use crate::error::{Diagnostic, ExtractError, Result};
use crate::firmware::{FirmwareArtifact, FirmwareClassifier, FirmwareKind};
use crate::locator::{self, Container};
use crate::payload;
use crate::resource::{ResourceEntry, Walk, WalkMode, ROOT_INDEX};

/// Result of a successful run.
#[derive(Debug)]
pub struct ExtractionReport {
    pub artifacts: Vec<FirmwareArtifact>,
    /// Per-artifact problems that were skipped over.
    pub diagnostics: Vec<Diagnostic>,
    /// Number of distinct resource leaves walked.
    pub entries: usize,
    /// Locator strategy that found the container.
    pub strategy: &'static str,
}

impl ExtractionReport {
    pub fn success(&self) -> bool {
        !self.artifacts.is_empty()
    }
}

/// Extracts firmware embedded in an executable image.
#[derive(Debug)]
pub struct Extractor {
    image: BinaryImage,
    config: ExtractorConfig,
}

impl Extractor {
    /// Creates an extractor for the given file with the default settings.
    pub fn new(file: File) -> Result<Self> {
        Self::with_config(file, ExtractorConfig::default())
    }

    pub fn with_config(file: File, config: ExtractorConfig) -> Result<Self> {
        let image = BinaryImage::map(&file)?;
        Ok(Self { image, config })
    }

    /// Creates an extractor over an in-memory image.
    pub fn from_bytes(bytes: Vec<u8>, config: ExtractorConfig) -> Result<Self> {
        let image = BinaryImage::from_bytes(bytes)?;
        Ok(Self { image, config })
    }

    pub fn image(&self) -> &BinaryImage {
        &self.image
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Locates the resource container with the configured strategy.
    pub fn locate(&self) -> Result<Container<'_>> {
        debug!("Locating container in {:?} image", self.image.dialect());
        let introspection = binary::introspect(&self.image)?;
        let locators = locator::create_locators(&self.image, introspection, self.config.strategy)?;
        locator::locate_container(&self.image, &locators)
    }

    /// Walks the container and returns every resource leaf.
    ///
    /// A firmware sub-tree whose name never shows up in the walked paths is
    /// looked up by the leaf names it should contain and walked again under
    /// its expected name.
    pub fn scan_entries(&self) -> Result<(Walk<'_>, &'static str)> {
        let container = self.locate()?;
        let strategy = container.strategy;
        let tree = container.into_tree();
        let registry = &self.config.registry;

        let mut walk = tree.walk(ROOT_INDEX, WalkMode::Recursive, "");

        for kind in FirmwareKind::ALL {
            let subtree = registry.subtree(kind);
            if walk.entries.iter().any(|e| has_segment(e, subtree)) {
                continue;
            }

            let expected = registry.expected_leaves(kind);
            let expected: Vec<&str> = expected.iter().map(String::as_str).collect();
            if let Some(directory) = tree.find_directory_by_content(&expected) {
                debug!("No {subtree} path found, using tree index {directory} by content");
                let found = tree.walk(directory, WalkMode::Recursive, subtree);
                // Leaves already walked under the directory's own name are replaced.
                walk.entries.retain(|e| {
                    !found
                        .entries
                        .iter()
                        .any(|f| std::ptr::eq(e.data, f.data) && e.name() == f.name())
                });
                walk.entries.extend(found.entries);
                walk.skipped.extend(found.skipped);
            }
        }

        Ok((walk, strategy))
    }

    /// Runs the whole pipeline: locate, walk, decode and classify.
    ///
    /// Structural failures abort the run. A leaf that fails to decode is
    /// skipped and reported in [`ExtractionReport::diagnostics`].
    pub fn extract(&self) -> Result<ExtractionReport> {
        let (walk, strategy) = self.scan_entries()?;
        let mut diagnostics = walk.skipped;
        let registry = &self.config.registry;
        let mut classifier = FirmwareClassifier::new(registry, self.config.naming);

        for entry in &walk.entries {
            if registry.split_path(&entry.path).is_none() {
                continue;
            }

            match payload::decode(entry.data, entry.compressed) {
                Ok(decoded) => {
                    debug!(
                        "Decoded {} ({:#X} -> {:#X} bytes, {:?})",
                        entry.path,
                        entry.stored_size(),
                        decoded.bytes.len(),
                        decoded.compression
                    );
                    classifier.classify(&entry.path, decoded);
                }
                Err(err) => {
                    warn!("Skipping {}: {err}", entry.path);
                    diagnostics.push(Diagnostic::new(&entry.path, err));
                }
            }
        }

        let classified = classifier.finish();
        diagnostics.extend(classified.diagnostics);

        if classified.artifacts.is_empty() {
            return Err(ExtractError::NoFirmwareFound {
                entries: walk.entries.len(),
                skipped: diagnostics.len(),
            });
        }

        info!(
            "Found {} firmware file(s) in {} resources ({} skipped, {} strategy)",
            classified.artifacts.len(),
            walk.entries.len(),
            diagnostics.len(),
            strategy
        );

        Ok(ExtractionReport {
            artifacts: classified.artifacts,
            diagnostics,
            entries: walk.entries.len(),
            strategy,
        })
    }
}

fn has_segment(entry: &ResourceEntry<'_>, segment: &str) -> bool {
    entry.path.split('/').any(|s| s == segment)
}

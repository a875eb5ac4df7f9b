//! Kingst firmware extractor library.
//!
//! This library recovers the MCU firmware and FPGA bitstreams that the
//! KingstVIS application embeds in its executable as compiled-in resources,
//! so that open-source drivers can load them.

pub mod binary;
pub mod config;
pub mod error;
pub mod extractor;
pub mod firmware;
pub mod locator;
pub mod output;
pub mod payload;
pub mod resource;

pub use config::{ExtractorConfig, LocatorStrategy, NamingScheme};
pub use error::{Diagnostic, ExtractError};
pub use extractor::{ExtractionReport, Extractor};
pub use firmware::{FirmwareArtifact, FirmwareKind, FirmwareRegistry, Resolution};
pub use output::write_artifacts;

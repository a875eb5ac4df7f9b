//! Firmware classification and output naming.
//!
//! Classification runs in two phases. Leaves whose names resolve to a known
//! MCU firmware id or FPGA model are named directly. Bitstreams whose names
//! did not resolve (usually a name-table hash collision) are then assigned
//! to the models still missing, in sorted model order. The second phase is a
//! heuristic with no confidence attached; its results are marked
//! [`Resolution::ByElimination`].

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::config::NamingScheme;
use crate::error::Diagnostic;
use crate::payload::DecodedPayload;

/// Resource directory holding MCU firmware.
pub const MCU_SUBTREE: &str = "fwusb";

/// Resource directory holding FPGA bitstreams.
pub const FPGA_SUBTREE: &str = "fwfpga";

/// Prefix of MCU firmware leaf names (`fw<ID>`).
pub const MCU_PREFIX: &str = "fw";

/// Bitstreams smaller than this are spurious.
pub const MIN_BITSTREAM_SIZE: usize = 1000;

pub const KNOWN_MCU_IDS: [&str; 4] = ["01A1", "01A2", "01A3", "01A4"];

pub const KNOWN_MODELS: [&str; 9] = [
    "LA1010A0", "LA1016", "LA1016A1", "LA2016", "LA2016A1", "LA5016", "LA5016A1", "LA5032A0",
    "MS6218",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareKind {
    McuFirmware,
    FpgaBitstream,
}

impl FirmwareKind {
    pub const ALL: [FirmwareKind; 2] = [FirmwareKind::McuFirmware, FirmwareKind::FpgaBitstream];
}

/// Known sub-tree names, MCU ids and hardware models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareRegistry {
    pub mcu_subtree: String,
    pub fpga_subtree: String,
    pub mcu_ids: Vec<String>,
    pub models: BTreeSet<String>,
}

impl Default for FirmwareRegistry {
    fn default() -> Self {
        Self {
            mcu_subtree: MCU_SUBTREE.to_owned(),
            fpga_subtree: FPGA_SUBTREE.to_owned(),
            mcu_ids: KNOWN_MCU_IDS.iter().map(|id| id.to_string()).collect(),
            models: KNOWN_MODELS.iter().map(|model| model.to_string()).collect(),
        }
    }
}

impl FirmwareRegistry {
    pub fn subtree(&self, kind: FirmwareKind) -> &str {
        match kind {
            FirmwareKind::McuFirmware => &self.mcu_subtree,
            FirmwareKind::FpgaBitstream => &self.fpga_subtree,
        }
    }

    /// Leaf names expected inside the sub-tree of `kind`.
    pub fn expected_leaves(&self, kind: FirmwareKind) -> Vec<String> {
        match kind {
            FirmwareKind::McuFirmware => self
                .mcu_ids
                .iter()
                .map(|id| format!("{MCU_PREFIX}{id}"))
                .collect(),
            FirmwareKind::FpgaBitstream => self.models.iter().cloned().collect(),
        }
    }

    /// Sub-tree kind and leaf name of `path`.
    ///
    /// The first segment equal to a known sub-tree name decides the kind,
    /// wherever it appears in the path; the leaf is the last segment.
    pub fn split_path<'p>(&self, path: &'p str) -> Option<(FirmwareKind, &'p str)> {
        let segments: Vec<&str> = path.split('/').collect();
        let (position, kind) = segments.iter().enumerate().find_map(|(i, &segment)| {
            if segment == self.mcu_subtree {
                Some((i, FirmwareKind::McuFirmware))
            } else if segment == self.fpga_subtree {
                Some((i, FirmwareKind::FpgaBitstream))
            } else {
                None
            }
        })?;

        if position + 1 >= segments.len() {
            return None;
        }
        segments.last().map(|&leaf| (kind, leaf))
    }
}

/// How an artifact's name was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// From the leaf name itself.
    ByName,
    /// Heuristically, by elimination against the model registry.
    ByElimination,
}

/// A named, decoded firmware image ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareArtifact {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub kind: FirmwareKind,
    pub resolution: Resolution,
    /// Resource path the bytes came from.
    pub source: String,
}

pub fn mcu_filename(id: &str, naming: NamingScheme, intel_hex: bool) -> String {
    match naming {
        NamingScheme::Canonical => format!("kingst-la-{}.fw", id.to_lowercase()),
        NamingScheme::Legacy if intel_hex => format!("{MCU_PREFIX}{id}.hex"),
        NamingScheme::Legacy => format!("{MCU_PREFIX}{id}.fw"),
    }
}

pub fn fpga_filename(model: &str, naming: NamingScheme) -> String {
    match naming {
        NamingScheme::Canonical => format!("kingst-{}-fpga.bitstream", model.to_lowercase()),
        NamingScheme::Legacy => format!("{model}.bitstream"),
    }
}

/// Pairs unresolved items with the models not resolved by name.
///
/// Missing models are taken in sorted order and matched one-to-one with
/// `unresolved` in encounter order. Nothing proves this pairing is right
/// when more than one model is missing; the result is a best guess. Items
/// left over once the missing models run out are returned separately.
pub fn assign_by_elimination<T>(
    models: &BTreeSet<String>,
    resolved: &BTreeSet<String>,
    unresolved: Vec<T>,
) -> (Vec<(String, T)>, Vec<T>) {
    let mut missing = models.difference(resolved).cloned();
    let mut assigned = Vec::new();
    let mut leftover = Vec::new();

    for item in unresolved {
        match missing.next() {
            Some(model) => assigned.push((model, item)),
            None => leftover.push(item),
        }
    }

    (assigned, leftover)
}

/// Outcome of classifying one decoded leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Named from the leaf name.
    Resolved,
    /// An FPGA bitstream whose name did not resolve; held for elimination.
    Unresolved,
    /// Firmware that could not be used.
    Dropped,
    /// Not under a firmware sub-tree.
    Ignored,
}

struct UnresolvedBlob {
    path: String,
    payload: DecodedPayload,
}

/// Final output of a classification pass.
#[derive(Debug, Default)]
pub struct Classified {
    pub artifacts: Vec<FirmwareArtifact>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Maps decoded leaves to output artifacts.
pub struct FirmwareClassifier<'r> {
    registry: &'r FirmwareRegistry,
    naming: NamingScheme,
    artifacts: Vec<FirmwareArtifact>,
    resolved_models: BTreeSet<String>,
    unresolved: Vec<UnresolvedBlob>,
    diagnostics: Vec<Diagnostic>,
}

impl<'r> FirmwareClassifier<'r> {
    pub fn new(registry: &'r FirmwareRegistry, naming: NamingScheme) -> Self {
        Self {
            registry,
            naming,
            artifacts: Vec::new(),
            resolved_models: BTreeSet::new(),
            unresolved: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Classifies the decoded leaf at `path`.
    pub fn classify(&mut self, path: &str, payload: DecodedPayload) -> Classification {
        let Some((kind, leaf)) = self.registry.split_path(path) else {
            debug!("Ignoring non-firmware resource {path}");
            return Classification::Ignored;
        };

        match kind {
            FirmwareKind::McuFirmware => self.classify_mcu(path, leaf, payload),
            FirmwareKind::FpgaBitstream => self.classify_fpga(path, leaf, payload),
        }
    }

    fn classify_mcu(&mut self, path: &str, leaf: &str, payload: DecodedPayload) -> Classification {
        let Some(id) = leaf.strip_prefix(MCU_PREFIX).filter(|id| !id.is_empty()) else {
            self.skip(path, format!("MCU firmware name {leaf:?} is not fw<ID>"));
            return Classification::Dropped;
        };

        let filename = mcu_filename(id, self.naming, payload.intel_hex.is_some());
        let bytes = match (self.naming, payload.intel_hex) {
            (NamingScheme::Legacy, Some(text)) => text,
            _ => payload.bytes,
        };

        self.artifacts.push(FirmwareArtifact {
            filename,
            bytes,
            kind: FirmwareKind::McuFirmware,
            resolution: Resolution::ByName,
            source: path.to_owned(),
        });
        Classification::Resolved
    }

    fn classify_fpga(&mut self, path: &str, leaf: &str, payload: DecodedPayload) -> Classification {
        if payload.bytes.len() < MIN_BITSTREAM_SIZE {
            self.skip(
                path,
                format!("bitstream of {} bytes is too small", payload.bytes.len()),
            );
            return Classification::Dropped;
        }

        if !self.registry.models.contains(leaf) {
            debug!("Bitstream {path} has unknown model name {leaf:?}");
            self.unresolved.push(UnresolvedBlob {
                path: path.to_owned(),
                payload,
            });
            return Classification::Unresolved;
        }

        self.resolved_models.insert(leaf.to_owned());
        self.artifacts.push(FirmwareArtifact {
            filename: fpga_filename(leaf, self.naming),
            bytes: payload.bytes,
            kind: FirmwareKind::FpgaBitstream,
            resolution: Resolution::ByName,
            source: path.to_owned(),
        });
        Classification::Resolved
    }

    fn skip(&mut self, path: &str, message: String) {
        warn!("Skipping {path}: {message}");
        self.diagnostics.push(Diagnostic::new(path, message));
    }

    /// Models not yet resolved by name, in sorted order.
    pub fn missing_models(&self) -> Vec<&str> {
        self.registry
            .models
            .difference(&self.resolved_models)
            .map(String::as_str)
            .collect()
    }

    /// Runs the elimination phase and returns the final artifacts.
    pub fn finish(mut self) -> Classified {
        let unresolved = std::mem::take(&mut self.unresolved);
        let (assigned, leftover) =
            assign_by_elimination(&self.registry.models, &self.resolved_models, unresolved);

        for (model, blob) in assigned {
            warn!(
                "Assuming unresolved bitstream {} is {model} (by elimination)",
                blob.path
            );
            self.artifacts.push(FirmwareArtifact {
                filename: fpga_filename(&model, self.naming),
                bytes: blob.payload.bytes,
                kind: FirmwareKind::FpgaBitstream,
                resolution: Resolution::ByElimination,
                source: blob.path,
            });
        }

        for blob in leftover {
            self.skip(&blob.path, "unresolved bitstream with no missing model left".into());
        }

        let mut artifacts: Vec<FirmwareArtifact> = Vec::with_capacity(self.artifacts.len());
        for artifact in self.artifacts {
            if let Some(pos) = artifacts.iter().position(|a| a.filename == artifact.filename) {
                let replaced = artifacts.remove(pos);
                warn!(
                    "{} from {} replaces the one from {}",
                    artifact.filename, artifact.source, replaced.source
                );
            }
            artifacts.push(artifact);
        }

        Classified {
            artifacts,
            diagnostics: self.diagnostics,
        }
    }
}

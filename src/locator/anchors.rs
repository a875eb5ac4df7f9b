//! Heuristic container location by signature search.
//!
//! Without link metadata the three tables have to be found by what they
//! look like. The name table is anchored on a known entry, the data table
//! is the first run of plausibly sized blobs after it, and the tree is the
//! closest root-shaped record before it. Every bound below is a structural
//! property of the container format and rejects chance matches in a
//! multi-megabyte section.

use std::ops::RangeInclusive;

use log::debug;

use super::{Container, ContainerLocator, ResourceRegions};
use crate::binary::SectionRegion;
use crate::error::{Anchor, ExtractError, Result};
use crate::resource::{
    qt_hash, read_u16_be, read_u32_be, NameIndex, FLAG_DIRECTORY, MAX_BLOB_SIZE, NAME_HEADER_SIZE,
    TREE_NODE_SIZE,
};

/// Name of the entry the name table is anchored on.
pub const NAME_ANCHOR: &str = "fwusb";

/// Stored hash of [`NAME_ANCHOR`].
pub const NAME_ANCHOR_HASH: u32 = 0x006D_EC92;

/// Sizes accepted for blobs that start the data table.
pub const BLOB_SIZE_RANGE: RangeInclusive<u32> = 1000..=MAX_BLOB_SIZE;

/// Consecutive plausible blobs required to accept a data table start.
pub const MIN_BLOB_RUN: usize = 5;

/// How far back from the name table the root record may sit.
pub const TREE_SEARCH_WINDOW: usize = 4000;

/// Child counts accepted for the root directory.
pub const ROOT_CHILD_COUNT: RangeInclusive<u32> = 2..=10;

/// Tree index of the root's first child.
pub const ROOT_FIRST_CHILD: u32 = 1;

/// Tables are only 2-byte aligned in some builds.
const SCAN_STEP: usize = 2;

/// Section offsets of the container tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorLayout {
    pub tree_start: usize,
    pub names_start: usize,
    pub names_end: usize,
    pub data_start: usize,
}

impl AnchorLayout {
    pub fn regions<'a>(&self, section: &'a [u8]) -> ResourceRegions<'a> {
        ResourceRegions {
            tree: &section[self.tree_start..self.names_start],
            names: &section[self.names_start..self.names_end],
            data: &section[self.data_start..],
        }
    }
}

fn utf16_be(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Finds the start of the name table.
///
/// The full entry (length, hash, characters) is searched first; failing
/// that, the characters alone, backing up over the length and hash fields.
pub fn find_names_anchor(section: &[u8]) -> Result<usize> {
    let chars = utf16_be(NAME_ANCHOR);

    let mut needle = (NAME_ANCHOR.len() as u16).to_be_bytes().to_vec();
    needle.extend(NAME_ANCHOR_HASH.to_be_bytes());
    needle.extend(&chars);

    if let Some(pos) = find(section, &needle) {
        return Ok(pos);
    }

    section
        .windows(chars.len())
        .enumerate()
        .skip(NAME_HEADER_SIZE)
        .find(|(_, window)| *window == chars.as_slice())
        .map(|(pos, _)| pos - NAME_HEADER_SIZE)
        .ok_or(ExtractError::AnchorNotFound(Anchor::Names))
}

/// Number of consecutive in-range blobs starting at `start`, up to
/// [`MIN_BLOB_RUN`].
fn blob_run(section: &[u8], start: usize) -> usize {
    let mut pos = start;
    let mut count = 0;

    while count < MIN_BLOB_RUN {
        let Some(size) = read_u32_be(section, pos).filter(|size| BLOB_SIZE_RANGE.contains(size))
        else {
            break;
        };
        let next = pos + 4 + size as usize;
        if next > section.len() {
            break;
        }
        count += 1;
        pos = next;
    }

    count
}

/// Finds the start of the data table at or after `from`.
pub fn find_data_table(section: &[u8], from: usize) -> Result<usize> {
    (from..section.len().saturating_sub(3))
        .step_by(SCAN_STEP)
        .find(|&offset| blob_run(section, offset) >= MIN_BLOB_RUN)
        .ok_or(ExtractError::AnchorNotFound(Anchor::Data))
}

fn is_root_record(section: &[u8], pos: usize) -> bool {
    read_u16_be(section, pos + 4) == Some(FLAG_DIRECTORY)
        && read_u32_be(section, pos + 6).is_some_and(|count| ROOT_CHILD_COUNT.contains(&count))
        && read_u32_be(section, pos + 10) == Some(ROOT_FIRST_CHILD)
}

/// Finds the root tree record, scanning backward from `names_start`.
pub fn find_tree_root(section: &[u8], names_start: usize) -> Result<usize> {
    (TREE_NODE_SIZE..=TREE_SEARCH_WINDOW)
        .step_by(SCAN_STEP)
        .map_while(|back| names_start.checked_sub(back))
        .find(|&pos| is_root_record(section, pos))
        .ok_or(ExtractError::AnchorNotFound(Anchor::Tree))
}

/// Locates all three tables inside `section`.
pub fn locate_by_anchors(section: &[u8]) -> Result<(AnchorLayout, NameIndex)> {
    let names_start = find_names_anchor(section)?;
    let names = NameIndex::scan(&section[names_start..]);
    let names_end = names_start + names.end();
    debug!(
        "Name table at {names_start:#X}..{names_end:#X} ({} entries, anchor hash {:#010X})",
        names.len(),
        qt_hash(NAME_ANCHOR)
    );

    let data_start = find_data_table(section, names_end)?;
    debug!("Data table at {data_start:#X}");

    let tree_start = find_tree_root(section, names_start)?;
    debug!("Tree root at {tree_start:#X}");

    let layout = AnchorLayout {
        tree_start,
        names_start,
        names_end,
        data_start,
    };
    Ok((layout, names))
}

/// Anchor search over one section of the image.
#[derive(Debug)]
pub struct AnchorLocator {
    section: SectionRegion,
}

impl AnchorLocator {
    pub fn new(section: SectionRegion) -> Self {
        Self { section }
    }
}

impl ContainerLocator for AnchorLocator {
    fn name(&self) -> &'static str {
        "anchor"
    }

    fn locate<'a>(&self, image: &'a [u8]) -> Result<Container<'a>> {
        let section = self.section.slice(image)?;
        let (layout, names) = locate_by_anchors(section)?;

        Ok(Container {
            regions: layout.regions(section),
            names,
            strategy: self.name(),
        })
    }
}

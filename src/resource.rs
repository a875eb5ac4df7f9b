//! Embedded resource container: name table, tree and data table.
//!
//! The container is three big-endian tables compiled into the executable:
//!
//! - **tree**: fixed 14-byte records, index 0 being the root directory.
//!   Each record starts with a `u32` name offset and a `u16` flags field;
//!   directories follow with `{childCount: u32, firstChild: u32}`, files with
//!   `{country: u16, language: u16, dataOffset: u32}`.
//! - **names**: `{length: u16, hash: u32, chars: UTF-16BE[length]}` entries.
//! - **data**: `{size: u32, bytes[size]}` blobs addressed by `dataOffset`.

use std::char::REPLACEMENT_CHARACTER;
use std::collections::{HashMap, HashSet};

use log::{trace, warn};

use crate::error::{Diagnostic, ExtractError, Result};

/// Size of one tree record.
pub const TREE_NODE_SIZE: usize = 14;

/// Tree index of the root directory.
pub const ROOT_INDEX: u32 = 0;

/// Flag bit marking a zlib-compressed file.
pub const FLAG_COMPRESSED: u16 = 0x01;

/// Flag bit marking a directory.
pub const FLAG_DIRECTORY: u16 = 0x02;

/// Longest name (in UTF-16 code units) accepted as a name table entry.
pub const MAX_NAME_LEN: u16 = 64;

/// Largest blob size accepted from the data table.
pub const MAX_BLOB_SIZE: u32 = 2_000_000;

/// Fixed part of a name entry: length and hash.
pub const NAME_HEADER_SIZE: usize = 6;

const MAX_DEPTH: usize = 16;

pub(crate) fn read_u16_be(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32_be(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Hash stored next to every name in the name table.
pub fn qt_hash(name: &str) -> u32 {
    name.encode_utf16().fold(0u32, |h, unit| {
        let h = (h << 4).wrapping_add(u32::from(unit));
        (h ^ ((h & 0xF000_0000) >> 23)) & 0x0FFF_FFFF
    })
}

/// Resolved names keyed by every offset a tree record may use to refer to
/// them.
///
/// Depending on the tool version that built the binary, a record's name
/// offset points at the entry start, at its hash field (`start + 2`) or at
/// its characters (`start + 6`). All three keys map to the same string, so no
/// per-entry guessing is needed.
#[derive(Debug, Default, Clone)]
pub struct NameIndex {
    names: HashMap<u32, String>,
    entries: usize,
    end: usize,
}

impl NameIndex {
    /// Scans name entries from the start of `names` until an entry length is
    /// zero, exceeds [`MAX_NAME_LEN`], or runs past the end of the slice.
    pub fn scan(names: &[u8]) -> Self {
        let mut index = NameIndex::default();
        let mut pos = 0usize;

        while let Some(len) = read_u16_be(names, pos) {
            if len == 0 || len > MAX_NAME_LEN {
                break;
            }

            let chars_start = pos + NAME_HEADER_SIZE;
            let chars_end = chars_start + usize::from(len) * 2;
            let hash = read_u32_be(names, pos + 2);
            let (Some(hash), Some(raw)) = (hash, names.get(chars_start..chars_end)) else {
                break;
            };

            let units = raw.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]]));
            let name: String = char::decode_utf16(units)
                .map(|c| c.unwrap_or(REPLACEMENT_CHARACTER))
                .collect();

            if qt_hash(&name) != hash {
                trace!(
                    "Name {name:?} at {pos:#X} has hash {hash:#010X}, expected {:#010X}",
                    qt_hash(&name)
                );
            }

            for key in [pos, pos + 2, pos + NAME_HEADER_SIZE] {
                index.names.insert(key as u32, name.clone());
            }
            index.entries += 1;
            pos = chars_end;
        }

        index.end = pos;
        index
    }

    pub fn get(&self, offset: u32) -> Option<&str> {
        self.names.get(&offset).map(String::as_str)
    }

    /// Like [`NameIndex::get`], but an unknown offset resolves to `""`.
    pub fn resolve(&self, offset: u32) -> &str {
        self.get(offset).unwrap_or_default()
    }

    /// Number of name entries scanned.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Offset just past the last scanned entry.
    pub fn end(&self) -> usize {
        self.end
    }
}

/// One tree record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeNode {
    Directory {
        name_offset: u32,
        child_count: u32,
        first_child: u32,
    },
    File {
        name_offset: u32,
        country: u16,
        language: u16,
        data_offset: u32,
        compressed: bool,
    },
}

impl TreeNode {
    /// Reads the record at `index`, or `None` when it lies outside `tree`.
    pub fn parse(tree: &[u8], index: u32) -> Option<Self> {
        let base = (index as usize).checked_mul(TREE_NODE_SIZE)?;
        let record = tree.get(base..base.checked_add(TREE_NODE_SIZE)?)?;

        let name_offset = read_u32_be(record, 0)?;
        let flags = read_u16_be(record, 4)?;

        if flags & FLAG_DIRECTORY != 0 {
            Some(TreeNode::Directory {
                name_offset,
                child_count: read_u32_be(record, 6)?,
                first_child: read_u32_be(record, 10)?,
            })
        } else {
            Some(TreeNode::File {
                name_offset,
                country: read_u16_be(record, 6)?,
                language: read_u16_be(record, 8)?,
                data_offset: read_u32_be(record, 10)?,
                compressed: flags & FLAG_COMPRESSED != 0,
            })
        }
    }

    pub fn name_offset(&self) -> u32 {
        match *self {
            TreeNode::Directory { name_offset, .. } | TreeNode::File { name_offset, .. } => {
                name_offset
            }
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, TreeNode::Directory { .. })
    }
}

/// How [`ResourceTree::walk`] treats sub-directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    /// Descend into every sub-directory.
    Recursive,
    /// Yield only the files directly inside the starting directory.
    DirectChildren,
}

/// A file leaf of the resource tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry<'a> {
    /// Slash-separated path from the walk's starting directory.
    pub path: String,
    /// Stored bytes, without the size prefix.
    pub data: &'a [u8],
    /// Whether the compressed flag was set on the record.
    pub compressed: bool,
}

impl ResourceEntry<'_> {
    /// Final path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    pub fn stored_size(&self) -> usize {
        self.data.len()
    }
}

/// Result of a walk: the readable leaves plus the ones that were skipped.
#[derive(Debug, Default)]
pub struct Walk<'a> {
    pub entries: Vec<ResourceEntry<'a>>,
    pub skipped: Vec<Diagnostic>,
}

/// Read-only view of a located resource container.
#[derive(Debug)]
pub struct ResourceTree<'a> {
    tree: &'a [u8],
    data: &'a [u8],
    names: NameIndex,
}

impl<'a> ResourceTree<'a> {
    pub fn new(tree: &'a [u8], data: &'a [u8], names: NameIndex) -> Self {
        Self { tree, data, names }
    }

    pub fn names(&self) -> &NameIndex {
        &self.names
    }

    pub fn node(&self, index: u32) -> Option<TreeNode> {
        TreeNode::parse(self.tree, index)
    }

    /// Walks the directory at `directory`, prefixing every yielded path
    /// with `prefix`.
    ///
    /// A starting record that is not a directory yields nothing. Unreadable
    /// leaves are reported in [`Walk::skipped`] and do not stop the walk.
    pub fn walk(&self, directory: u32, mode: WalkMode, prefix: &str) -> Walk<'a> {
        let mut walk = Walk::default();
        let mut visited = HashSet::new();
        self.walk_into(directory, mode, prefix, 0, &mut visited, &mut walk);
        walk
    }

    fn walk_into(
        &self,
        directory: u32,
        mode: WalkMode,
        prefix: &str,
        depth: usize,
        visited: &mut HashSet<u32>,
        walk: &mut Walk<'a>,
    ) {
        let Some(TreeNode::Directory {
            child_count,
            first_child,
            ..
        }) = self.node(directory)
        else {
            return;
        };

        if depth > MAX_DEPTH {
            walk.skipped.push(Diagnostic::new(prefix, "directory nesting too deep"));
            return;
        }
        if !visited.insert(directory) {
            walk.skipped.push(Diagnostic::new(
                prefix,
                format!("tree index {directory} reached twice"),
            ));
            return;
        }

        for child in self.children(first_child, child_count) {
            let Some(node) = self.node(child) else {
                walk.skipped.push(Diagnostic::new(
                    prefix,
                    format!("tree index {child} out of range"),
                ));
                break;
            };

            let path = join(prefix, self.names.resolve(node.name_offset()));

            match node {
                TreeNode::Directory { .. } => {
                    if mode == WalkMode::Recursive {
                        self.walk_into(child, mode, &path, depth + 1, visited, walk);
                    }
                }
                TreeNode::File {
                    data_offset,
                    compressed,
                    ..
                } => match self.blob(data_offset) {
                    Ok(data) => walk.entries.push(ResourceEntry {
                        path,
                        data,
                        compressed,
                    }),
                    Err(err) => {
                        warn!("Skipping resource {path}: {err}");
                        walk.skipped.push(Diagnostic::new(path, err));
                    }
                },
            }
        }
    }

    fn children(&self, first_child: u32, child_count: u32) -> impl Iterator<Item = u32> {
        (0..child_count).map_while(move |i| first_child.checked_add(i))
    }

    /// Reads the size-prefixed blob at `offset` in the data table.
    pub fn blob(&self, offset: u32) -> Result<&'a [u8]> {
        let start = offset as usize;
        let size = read_u32_be(self.data, start).ok_or(ExtractError::SizeOutOfRange {
            what: "data offset",
            value: u64::from(offset),
        })?;

        if size == 0 || size > MAX_BLOB_SIZE {
            return Err(ExtractError::SizeOutOfRange {
                what: "blob",
                value: u64::from(size),
            });
        }

        self.data
            .get(start + 4..start + 4 + size as usize)
            .ok_or(ExtractError::SizeOutOfRange {
                what: "blob",
                value: u64::from(size),
            })
    }

    /// Finds a direct sub-directory of the root holding at least one file
    /// whose name is in `expected`.
    ///
    /// Directory names drift between tool versions while leaf names do not,
    /// so directories are recognized by what they contain.
    pub fn find_directory_by_content(&self, expected: &[&str]) -> Option<u32> {
        let Some(TreeNode::Directory {
            child_count,
            first_child,
            ..
        }) = self.node(ROOT_INDEX)
        else {
            return None;
        };

        self.children(first_child, child_count).find(|&child| {
            let listing = self.walk(child, WalkMode::DirectChildren, "");
            listing
                .entries
                .iter()
                .map(|entry| entry.path.as_str())
                .chain(listing.skipped.iter().map(|d| d.subject.as_str()))
                .any(|name| expected.contains(&name))
        })
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}

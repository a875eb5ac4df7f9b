//! Executable image introspection.
//!
//! This module identifies the executable dialect of the input and exposes
//! just enough of its structure to reach the section that embeds the resource
//! container: `__TEXT,__const` for Mach-O, the section header table (and,
//! through it, the symbol table) for ELF.

mod elf;
mod macho;

use std::fs::File;
use std::ops::Deref;

use log::debug;
use memmap2::Mmap;

use crate::error::{Anchor, ExtractError, Result};

pub use elf::{ElfSection, ElfSymbol, SectionTable, SymbolTable};
pub use macho::{CONST_SECTION, TEXT_SEGMENT};

/// ELF identification bytes.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// 64-bit Mach-O magic, read as a little-endian `u32`.
pub const MACHO_MAGIC_64: u32 = 0xFEED_FACF;

/// Executable dialect, decided once from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MachO64,
    Elf64,
    Unsupported,
}

impl Dialect {
    /// Detects the dialect from the leading magic bytes.
    pub fn detect(data: &[u8]) -> Self {
        let Some(magic) = data.get(..4) else {
            return Dialect::Unsupported;
        };

        if magic == ELF_MAGIC {
            return Dialect::Elf64;
        }

        if u32::from_le_bytes([magic[0], magic[1], magic[2], magic[3]]) == MACHO_MAGIC_64 {
            return Dialect::MachO64;
        }

        Dialect::Unsupported
    }
}

/// Absolute byte range of a section within the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRegion {
    pub offset: usize,
    pub length: usize,
}

impl SectionRegion {
    /// Returns the bytes covered by this region, bounds-checked against `data`.
    pub fn slice<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(self.length)
            .filter(|&end| end <= data.len())
            .ok_or(ExtractError::SizeOutOfRange {
                what: "section",
                value: self.length as u64,
            })?;
        Ok(&data[self.offset..end])
    }
}

/// Dialect-specific structure needed by the container locators.
#[derive(Debug)]
pub enum Introspection {
    /// Mach-O: the `__TEXT,__const` section.
    MachO { section: SectionRegion },
    /// ELF: the parsed section header table.
    Elf { sections: SectionTable },
}

impl Introspection {
    /// The section expected to carry the resource container, if any.
    pub fn container_section(&self) -> Option<SectionRegion> {
        match self {
            Introspection::MachO { section } => Some(*section),
            Introspection::Elf { sections } => sections.region(elf::RODATA_SECTION),
        }
    }
}

/// Parses the dialect-specific structure of `data`.
pub fn introspect(data: &[u8]) -> Result<Introspection> {
    match Dialect::detect(data) {
        Dialect::MachO64 => {
            let section = macho::const_section(data)?;
            debug!(
                "Mach-O __TEXT,__const at {:#X}, size {:#X}",
                section.offset, section.length
            );
            Ok(Introspection::MachO { section })
        }
        Dialect::Elf64 => {
            let sections = SectionTable::parse(data)?;
            debug!("ELF64 with {} section headers", sections.len());
            Ok(Introspection::Elf { sections })
        }
        Dialect::Unsupported => Err(unsupported(data)),
    }
}

/// Returns the region of the section that embeds the resource container.
pub fn locate(data: &[u8]) -> Result<SectionRegion> {
    introspect(data)?
        .container_section()
        .ok_or(ExtractError::AnchorNotFound(Anchor::ConstSection))
}

fn unsupported(data: &[u8]) -> ExtractError {
    ExtractError::UnsupportedFormat(data.iter().take(4).copied().collect())
}

enum ImageBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// The whole input executable, read once and never mutated.
pub struct BinaryImage {
    bytes: ImageBytes,
    dialect: Dialect,
}

impl BinaryImage {
    /// Maps `file` read-only.
    ///
    /// Fails with [`ExtractError::UnsupportedFormat`] when the leading bytes
    /// match no supported dialect.
    pub fn map(file: &File) -> Result<Self> {
        let mmap = unsafe { Mmap::map(file)? };
        Self::with_bytes(ImageBytes::Mapped(mmap))
    }

    /// Wraps an in-memory copy of an executable.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::with_bytes(ImageBytes::Owned(bytes))
    }

    fn with_bytes(bytes: ImageBytes) -> Result<Self> {
        let data: &[u8] = match &bytes {
            ImageBytes::Mapped(mmap) => mmap,
            ImageBytes::Owned(vec) => vec,
        };

        match Dialect::detect(data) {
            Dialect::Unsupported => Err(unsupported(data)),
            dialect => Ok(Self { bytes, dialect }),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

impl Deref for BinaryImage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.bytes {
            ImageBytes::Mapped(mmap) => mmap,
            ImageBytes::Owned(vec) => vec,
        }
    }
}

impl std::fmt::Debug for BinaryImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryImage")
            .field("dialect", &self.dialect)
            .field("len", &self.len())
            .finish()
    }
}

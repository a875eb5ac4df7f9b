//! ELF64 section header and symbol table parsing.

use std::collections::HashMap;

use log::debug;
use object::elf::{FileHeader64, SHN_LORESERVE, SHN_UNDEF, SHT_SYMTAB};
use object::read::elf::{FileHeader, SectionHeader, Sym};
use object::Endianness;

use super::SectionRegion;
use crate::error::{ExtractError, Result};

pub const SYMTAB_SECTION: &str = ".symtab";
pub const STRTAB_SECTION: &str = ".strtab";
pub(super) const RODATA_SECTION: &str = ".rodata";

/// One entry of the section header table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfSection {
    pub name: String,
    pub file_offset: u64,
    pub address: u64,
    pub size: u64,
}

/// The section header table of an ELF64 image, with names resolved through
/// the `e_shstrndx` string table.
#[derive(Debug, Clone)]
pub struct SectionTable {
    sections: Vec<ElfSection>,
}

impl SectionTable {
    /// Parses the section header table. Class 32 images are rejected.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.get(4) != Some(&object::elf::ELFCLASS64) {
            return Err(ExtractError::UnsupportedFormat(
                data.iter().take(5).copied().collect(),
            ));
        }

        let header =
            FileHeader64::<Endianness>::parse(data).map_err(ExtractError::malformed("ELF header"))?;
        let endian = header
            .endian()
            .map_err(ExtractError::malformed("ELF header"))?;
        let table = header
            .sections(endian, data)
            .map_err(ExtractError::malformed("ELF section headers"))?;

        let sections = table
            .iter()
            .map(|section| ElfSection {
                name: table
                    .section_name(endian, section)
                    .map(|name| String::from_utf8_lossy(name).into_owned())
                    .unwrap_or_default(),
                file_offset: section.sh_offset(endian),
                address: section.sh_addr(endian),
                size: section.sh_size(endian),
            })
            .collect();

        Ok(Self { sections })
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ElfSection> {
        self.sections.get(index)
    }

    /// Looks up a section by exact name.
    pub fn find(&self, name: &str) -> Option<&ElfSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// File range of the named section.
    pub fn region(&self, name: &str) -> Option<SectionRegion> {
        self.find(name).map(|s| SectionRegion {
            offset: s.file_offset as usize,
            length: s.size as usize,
        })
    }
}

/// A defined symbol, as read from `.symtab`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfSymbol {
    pub value: u64,
    pub size: u64,
    pub section_index: u16,
}

/// Symbol name to definition map, built once per run.
///
/// File-local symbols may be defined more than once (one per translation
/// unit), so every definition is kept in symbol table order.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    sections: SectionTable,
    symbols: HashMap<String, Vec<ElfSymbol>>,
}

impl SymbolTable {
    /// Parses `.symtab`, resolving names through its linked string table.
    ///
    /// Fails with [`ExtractError::SymbolNotFound`] when the image has no
    /// `.symtab` or `.strtab` section (a stripped build).
    pub fn parse(data: &[u8], sections: SectionTable) -> Result<Self> {
        for required in [SYMTAB_SECTION, STRTAB_SECTION] {
            if sections.find(required).is_none() {
                return Err(ExtractError::SymbolNotFound(format!("{required} section")));
            }
        }

        let header =
            FileHeader64::<Endianness>::parse(data).map_err(ExtractError::malformed("ELF header"))?;
        let endian = header
            .endian()
            .map_err(ExtractError::malformed("ELF header"))?;
        let table = header
            .sections(endian, data)
            .map_err(ExtractError::malformed("ELF section headers"))?;
        let symtab = table
            .symbols(endian, data, SHT_SYMTAB)
            .map_err(ExtractError::malformed("ELF symbol table"))?;
        let strings = symtab.strings();

        let mut symbols: HashMap<String, Vec<ElfSymbol>> = HashMap::new();
        for symbol in symtab.iter() {
            let Ok(name) = symbol.name(endian, strings) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let Ok(name) = std::str::from_utf8(name) else {
                continue;
            };

            symbols
                .entry(name.to_owned())
                .or_default()
                .push(ElfSymbol {
                    value: symbol.st_value(endian),
                    size: symbol.st_size(endian),
                    section_index: symbol.st_shndx(endian),
                });
        }

        debug!("Parsed {} distinct ELF symbol names", symbols.len());
        Ok(Self { sections, symbols })
    }

    pub fn sections(&self) -> &SectionTable {
        &self.sections
    }

    /// All definitions of `name`, in symbol table order.
    pub fn lookup(&self, name: &str) -> &[ElfSymbol] {
        self.symbols.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Converts a symbol definition into the file range it occupies:
    /// `sectionFileOffset + (value - sectionAddress)`, `size` bytes long.
    pub fn region_of(
        &self,
        name: &str,
        symbol: &ElfSymbol,
        image_len: usize,
    ) -> Result<SectionRegion> {
        let out_of_range = || ExtractError::SymbolNotFound(format!("{name} (outside its section)"));

        if symbol.section_index == SHN_UNDEF || symbol.section_index >= SHN_LORESERVE {
            return Err(ExtractError::SymbolNotFound(format!("{name} (undefined)")));
        }

        let section = self
            .sections
            .get(symbol.section_index as usize)
            .ok_or_else(out_of_range)?;

        let relative = symbol
            .value
            .checked_sub(section.address)
            .filter(|rel| rel.saturating_add(symbol.size) <= section.size)
            .ok_or_else(out_of_range)?;

        let offset = section
            .file_offset
            .checked_add(relative)
            .filter(|off| off.saturating_add(symbol.size) <= image_len as u64)
            .ok_or_else(out_of_range)?;

        Ok(SectionRegion {
            offset: offset as usize,
            length: symbol.size as usize,
        })
    }
}

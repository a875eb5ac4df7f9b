//! Synthetic resource containers and executable wrappers shared by the
//! integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::ops::Range;

use flate2::write::ZlibEncoder;
use kingst_fwextract::locator::{DATA_SYMBOL, NAMES_SYMBOL, NAME_ANCHOR, TREE_SYMBOL};
use kingst_fwextract::resource::{qt_hash, FLAG_COMPRESSED, FLAG_DIRECTORY, TREE_NODE_SIZE};
use object::write::{Object, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

// ============================================================================
// Payloads
// ============================================================================

/// `{uncompressed size: u32 BE, zlib stream}`.
pub fn qcompress(payload: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(payload).unwrap();
    let mut out = (payload.len() as u32).to_be_bytes().to_vec();
    out.extend(encoder.finish().unwrap());
    out
}

/// A raw bitstream of `len` bytes, starting with the `FF FF` marker.
pub fn bitstream(len: usize, seed: u8) -> Vec<u8> {
    let mut out = vec![0xFF, 0xFF];
    out.extend((0..len.saturating_sub(2)).map(|i| seed.wrapping_add((i % 251) as u8)));
    out.truncate(len);
    out
}

/// Intel HEX text for `bytes` placed at `address`, 16 bytes per record.
pub fn intel_hex(address: u16, bytes: &[u8]) -> Vec<u8> {
    let mut text = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let at = address + (i * 16) as u16;
        let mut record = vec![chunk.len() as u8];
        record.extend(at.to_be_bytes());
        record.push(0x00);
        record.extend(chunk);
        let sum = record.iter().fold(0u8, |a, b| a.wrapping_add(*b));
        record.push(sum.wrapping_neg());
        text.push(':');
        text.push_str(&hex::encode_upper(&record));
        text.push('\n');
    }
    text.push_str(":00000001FF\n");
    text.into_bytes()
}

// ============================================================================
// Container
// ============================================================================

/// Which offset inside a name entry the tree records point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameConvention {
    EntryStart,
    Hash,
    Chars,
}

impl NameConvention {
    pub const ALL: [NameConvention; 3] =
        [NameConvention::EntryStart, NameConvention::Hash, NameConvention::Chars];

    fn adjust(self) -> u32 {
        match self {
            NameConvention::EntryStart => 0,
            NameConvention::Hash => 2,
            NameConvention::Chars => 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Leaf {
    pub name: String,
    pub stored: Vec<u8>,
    pub compressed: bool,
}

impl Leaf {
    pub fn raw(name: &str, stored: Vec<u8>) -> Self {
        Self {
            name: name.to_owned(),
            stored,
            compressed: false,
        }
    }

    /// A leaf stored zlib-compressed with the compressed flag set.
    pub fn compressed(name: &str, payload: &[u8]) -> Self {
        Self {
            name: name.to_owned(),
            stored: qcompress(payload),
            compressed: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Directory {
    name: String,
    leaves: Vec<Leaf>,
}

/// Lays out `tree | names | padding | data`, the order the anchor search
/// expects.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    dirs: Vec<Directory>,
    files: Vec<Leaf>,
    convention: NameConvention,
    anchor: bool,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            files: Vec::new(),
            convention: NameConvention::Chars,
            anchor: true,
        }
    }
}

/// A built container and where its tables sit.
#[derive(Debug, Clone)]
pub struct Container {
    pub bytes: Vec<u8>,
    pub tree: Range<usize>,
    pub names: Range<usize>,
    pub data: Range<usize>,
    /// Every leaf as `(path, stored bytes)`.
    pub leaves: Vec<(String, Vec<u8>)>,
}

fn name_entry(name: &str) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut out = (units.len() as u16).to_be_bytes().to_vec();
    out.extend(qt_hash(name).to_be_bytes());
    for unit in units {
        out.extend(unit.to_be_bytes());
    }
    out
}

fn dir_record(name_offset: u32, child_count: u32, first_child: u32) -> Vec<u8> {
    let mut out = name_offset.to_be_bytes().to_vec();
    out.extend(FLAG_DIRECTORY.to_be_bytes());
    out.extend(child_count.to_be_bytes());
    out.extend(first_child.to_be_bytes());
    out
}

fn file_record(name_offset: u32, compressed: bool, data_offset: u32) -> Vec<u8> {
    let flags = if compressed { FLAG_COMPRESSED } else { 0 };
    let mut out = name_offset.to_be_bytes().to_vec();
    out.extend(flags.to_be_bytes());
    out.extend([0, 0, 0, 0]);
    out.extend(data_offset.to_be_bytes());
    out
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convention(mut self, convention: NameConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Leaves the anchor name out of the name table.
    pub fn without_anchor(mut self) -> Self {
        self.anchor = false;
        self
    }

    pub fn dir(mut self, name: &str, leaves: Vec<Leaf>) -> Self {
        self.dirs.push(Directory {
            name: name.to_owned(),
            leaves,
        });
        self
    }

    pub fn file(mut self, leaf: Leaf) -> Self {
        self.files.push(leaf);
        self
    }

    pub fn build(&self) -> Container {
        let mut names = Vec::new();
        let mut offsets: Vec<(String, u32)> = Vec::new();
        let mut intern = |name: &str| -> u32 {
            if let Some((_, offset)) = offsets.iter().find(|(n, _)| n == name) {
                return *offset;
            }
            let offset = names.len() as u32;
            names.extend(name_entry(name));
            offsets.push((name.to_owned(), offset));
            offset
        };

        if self.anchor {
            intern(NAME_ANCHOR);
        }

        // leaves in tree order: directory contents first, then root files
        let all: Vec<(String, &Leaf)> = self
            .dirs
            .iter()
            .flat_map(|d| d.leaves.iter().map(move |l| (format!("{}/{}", d.name, l.name), l)))
            .chain(self.files.iter().map(|l| (l.name.clone(), l)))
            .collect();

        // largest blobs first so the data table opens with a run of big ones
        let mut order: Vec<usize> = (0..all.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(all[i].1.stored.len()));
        let mut data = Vec::new();
        let mut data_offsets = vec![0u32; all.len()];
        for i in order {
            data_offsets[i] = data.len() as u32;
            data.extend((all[i].1.stored.len() as u32).to_be_bytes());
            data.extend(&all[i].1.stored);
        }

        let adjust = self.convention.adjust();
        let root_children = (self.dirs.len() + self.files.len()) as u32;
        let mut tree = dir_record(0, root_children, 1);
        let mut leaf_records = Vec::new();
        let mut next = 1 + root_children;
        let mut leaf_id = 0;

        for dir in &self.dirs {
            let name = intern(&dir.name) + adjust;
            tree.extend(dir_record(name, dir.leaves.len() as u32, next));
            for leaf in &dir.leaves {
                let name = intern(&leaf.name) + adjust;
                leaf_records.extend(file_record(name, leaf.compressed, data_offsets[leaf_id]));
                leaf_id += 1;
            }
            next += dir.leaves.len() as u32;
        }
        for leaf in &self.files {
            let name = intern(&leaf.name) + adjust;
            tree.extend(file_record(name, leaf.compressed, data_offsets[leaf_id]));
            leaf_id += 1;
        }
        tree.extend(leaf_records);
        assert_eq!(tree.len() % TREE_NODE_SIZE, 0);

        let mut bytes = tree.clone();
        let names_range = bytes.len()..bytes.len() + names.len();
        bytes.extend(&names);
        bytes.extend([0u8; 6]);
        let data_range = bytes.len()..bytes.len() + data.len();
        bytes.extend(&data);

        Container {
            bytes,
            tree: 0..tree.len(),
            names: names_range,
            data: data_range,
            leaves: all
                .into_iter()
                .map(|(path, leaf)| (path, leaf.stored.clone()))
                .collect(),
        }
    }
}

/// MCU firmware for id `01A1`..`01A4` as compressed Intel HEX.
pub fn mcu_leaf(id: &str) -> (Leaf, Vec<u8>) {
    let image: Vec<u8> = id.bytes().cycle().take(40).collect();
    (Leaf::compressed(&format!("fw{id}"), &intel_hex(0x0000, &image)), image)
}

/// The firmware sub-trees of a typical release: six bitstreams (one of them
/// compressed), two MCU images and an unrelated root file.
pub fn firmware_container(convention: NameConvention) -> ContainerBuilder {
    let (fw01a1, _) = mcu_leaf("01A1");
    let (fw01a2, _) = mcu_leaf("01A2");

    ContainerBuilder::new()
        .convention(convention)
        .dir("fwusb", vec![fw01a1, fw01a2])
        .dir(
            "fwfpga",
            vec![
                Leaf::raw("LA1010A0", bitstream(1500, 1)),
                Leaf::raw("LA1016", bitstream(2000, 2)),
                Leaf::raw("LA2016", bitstream(2500, 3)),
                Leaf::raw("LA5016", bitstream(3000, 4)),
                Leaf::raw("LA2016A1", bitstream(4000, 6)),
                Leaf::compressed("MS6218", &bitstream(3500, 5)),
            ],
        )
        .file(Leaf::raw("translation.qm", b"not firmware at all".to_vec()))
}

/// Canonical `(filename, bytes)` pairs [`firmware_container`] decodes to.
pub fn expected_firmware() -> Vec<(String, Vec<u8>)> {
    let mut out = vec![
        ("kingst-la-01a1.fw".to_string(), mcu_leaf("01A1").1),
        ("kingst-la-01a2.fw".to_string(), mcu_leaf("01A2").1),
        ("kingst-la1010a0-fpga.bitstream".to_string(), bitstream(1500, 1)),
        ("kingst-la1016-fpga.bitstream".to_string(), bitstream(2000, 2)),
        ("kingst-la2016-fpga.bitstream".to_string(), bitstream(2500, 3)),
        ("kingst-la5016-fpga.bitstream".to_string(), bitstream(3000, 4)),
        ("kingst-la2016a1-fpga.bitstream".to_string(), bitstream(4000, 6)),
        ("kingst-ms6218-fpga.bitstream".to_string(), bitstream(3500, 5)),
    ];
    out.sort();
    out
}

// ============================================================================
// Executable wrappers
// ============================================================================

const MACHO_SECTION_OFFSET: usize = 0x200;

fn padded_name(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

/// A minimal 64-bit Mach-O executable with one `__TEXT` segment holding
/// `section` as `__TEXT,__const`, or no sections at all when `with_const`
/// is false.
pub fn macho_image(section: &[u8], with_const: bool) -> Vec<u8> {
    const SEGMENT_COMMAND_SIZE: u32 = 72;
    const SECTION_SIZE: u32 = 80;

    let nsects = u32::from(with_const);
    let cmdsize = SEGMENT_COMMAND_SIZE + nsects * SECTION_SIZE;
    let file_size = (MACHO_SECTION_OFFSET + section.len()) as u64;

    let mut out = Vec::new();
    // mach_header_64
    out.extend(0xFEED_FACFu32.to_le_bytes());
    out.extend(0x0100_000Cu32.to_le_bytes()); // arm64
    out.extend(0u32.to_le_bytes());
    out.extend(2u32.to_le_bytes()); // MH_EXECUTE
    out.extend(1u32.to_le_bytes());
    out.extend(cmdsize.to_le_bytes());
    out.extend(0u32.to_le_bytes());
    out.extend(0u32.to_le_bytes());

    // segment_command_64
    out.extend(0x19u32.to_le_bytes());
    out.extend(cmdsize.to_le_bytes());
    out.extend(padded_name("__TEXT"));
    out.extend(0x1_0000_0000u64.to_le_bytes());
    out.extend(file_size.to_le_bytes());
    out.extend(0u64.to_le_bytes());
    out.extend(file_size.to_le_bytes());
    out.extend(5u32.to_le_bytes());
    out.extend(5u32.to_le_bytes());
    out.extend(nsects.to_le_bytes());
    out.extend(0u32.to_le_bytes());

    if with_const {
        // section_64
        out.extend(padded_name("__const"));
        out.extend(padded_name("__TEXT"));
        out.extend((0x1_0000_0000u64 + MACHO_SECTION_OFFSET as u64).to_le_bytes());
        out.extend((section.len() as u64).to_le_bytes());
        out.extend((MACHO_SECTION_OFFSET as u32).to_le_bytes());
        out.extend([0u8; 4 * 7]);
    }

    out.resize(MACHO_SECTION_OFFSET, 0);
    out.extend(section);
    out
}

/// An ELF64 object whose `.rodata` holds each container in turn, behind a
/// few bytes of unrelated data. With `symbols`, every container gets the
/// three file-local resource symbols.
pub fn elf_image(containers: &[&Container], symbols: bool) -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let rodata = obj.add_section(Vec::new(), b".rodata".to_vec(), SectionKind::ReadOnlyData);

    obj.append_section_data(rodata, &[0xCC; 40], 8);
    obj.add_symbol(data_symbol("unrelated_table", 0, 40, rodata));

    for container in containers {
        let base = obj.append_section_data(rodata, &container.bytes, 16);
        if !symbols {
            continue;
        }
        for (name, range) in [
            (TREE_SYMBOL, &container.tree),
            (NAMES_SYMBOL, &container.names),
            (DATA_SYMBOL, &container.data),
        ] {
            let value = base + range.start as u64;
            obj.add_symbol(data_symbol(name, value, range.len() as u64, rodata));
        }
    }

    obj.write().unwrap()
}

fn data_symbol(name: &str, value: u64, size: u64, section: object::write::SectionId) -> Symbol {
    Symbol {
        name: name.as_bytes().to_vec(),
        value,
        size,
        kind: SymbolKind::Data,
        scope: SymbolScope::Compilation,
        weak: false,
        section: SymbolSection::Section(section),
        flags: SymbolFlags::None,
    }
}

/// Renames `.symtab` in the section name table, as if the image had been
/// stripped.
pub fn strip_symtab(image: &mut [u8]) {
    let needle = b".symtab\0";
    let pos = image
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap();
    image[pos..pos + needle.len()].copy_from_slice(b".nosyms\0");
}

/// `(filename, bytes)` pairs of a report, sorted by filename.
pub fn named_bytes(report: &kingst_fwextract::ExtractionReport) -> Vec<(String, Vec<u8>)> {
    let mut out: Vec<_> = report
        .artifacts
        .iter()
        .map(|a| (a.filename.clone(), a.bytes.clone()))
        .collect();
    out.sort();
    out
}

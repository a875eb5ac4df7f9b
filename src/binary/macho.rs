//! Mach-O section lookup.

use object::macho::{MachHeader64, LC_SEGMENT_64};
use object::read::macho::{MachHeader, Section, Segment};
use object::Endianness;

use super::SectionRegion;
use crate::error::{Anchor, ExtractError, Result};

/// Segment holding read-only program data.
pub const TEXT_SEGMENT: &[u8] = b"__TEXT";

/// Section of [`TEXT_SEGMENT`] where compiled-in resources end up.
pub const CONST_SECTION: &[u8] = b"__const";

/// Finds the `__TEXT,__const` section of a 64-bit Mach-O image.
///
/// A header or load command that does not fit in `data` is
/// [`ExtractError::Malformed`]; a well-formed image without the section is
/// [`ExtractError::AnchorNotFound`].
pub(super) fn const_section(data: &[u8]) -> Result<SectionRegion> {
    let header = MachHeader64::<Endianness>::parse(data, 0)
        .map_err(ExtractError::malformed("Mach-O header"))?;
    let endian = header
        .endian()
        .map_err(ExtractError::malformed("Mach-O header"))?;

    let mut commands = header
        .load_commands(endian, data, 0)
        .map_err(ExtractError::malformed("Mach-O load commands"))?;

    while let Some(command) = commands
        .next()
        .map_err(ExtractError::malformed("Mach-O load command"))?
    {
        if command.cmd() != LC_SEGMENT_64 {
            continue;
        }

        let Some((segment, section_data)) = command
            .segment_64()
            .map_err(ExtractError::malformed("Mach-O segment"))?
        else {
            continue;
        };

        if segment.name() != TEXT_SEGMENT {
            continue;
        }

        let sections = segment
            .sections(endian, section_data)
            .map_err(ExtractError::malformed("Mach-O sections"))?;

        if let Some(section) = sections.iter().find(|s| s.name() == CONST_SECTION) {
            return Ok(SectionRegion {
                offset: section.offset(endian) as usize,
                length: section.size(endian) as usize,
            });
        }
    }

    Err(ExtractError::AnchorNotFound(Anchor::ConstSection))
}

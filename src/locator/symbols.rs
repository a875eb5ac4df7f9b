//! Exact container location through the ELF symbol table.

use log::debug;

use super::anchors::find_names_anchor;
use super::{Container, ContainerLocator, ResourceRegions};
use crate::binary::{ElfSymbol, SymbolTable};
use crate::error::{ExtractError, Result};

/// Mangled name of the tree table.
pub const TREE_SYMBOL: &str = "_ZL18qt_resource_struct";
/// Mangled name of the name table.
pub const NAMES_SYMBOL: &str = "_ZL16qt_resource_name";
/// Mangled name of the data table.
pub const DATA_SYMBOL: &str = "_ZL16qt_resource_data";

/// Resolves the three container tables by symbol name.
#[derive(Debug)]
pub struct SymbolLocator {
    symbols: SymbolTable,
}

impl SymbolLocator {
    pub fn new(symbols: SymbolTable) -> Self {
        Self { symbols }
    }

    fn definitions(&self, name: &str) -> Result<&[ElfSymbol]> {
        match self.symbols.lookup(name) {
            [] => Err(ExtractError::SymbolNotFound(name.to_owned())),
            found => Ok(found),
        }
    }
}

impl ContainerLocator for SymbolLocator {
    fn name(&self) -> &'static str {
        "symbol"
    }

    fn locate<'a>(&self, image: &'a [u8]) -> Result<Container<'a>> {
        let trees = self.definitions(TREE_SYMBOL)?;
        let name_tables = self.definitions(NAMES_SYMBOL)?;
        let data_tables = self.definitions(DATA_SYMBOL)?;

        // File-local tables are emitted once per resource file; the n-th
        // definitions of the three symbols belong together.
        let mut first = None;
        let triples = trees.iter().zip(name_tables).zip(data_tables);
        for (index, ((tree, names), data)) in triples.enumerate() {
            let regions = ResourceRegions {
                tree: self.symbols.region_of(TREE_SYMBOL, tree, image.len())?.slice(image)?,
                names: self.symbols.region_of(NAMES_SYMBOL, names, image.len())?.slice(image)?,
                data: self.symbols.region_of(DATA_SYMBOL, data, image.len())?.slice(image)?,
            };

            if find_names_anchor(regions.names).is_ok() {
                debug!("Using resource tables #{index} (firmware names present)");
                return Ok(Container::new(regions, self.name()));
            }
            first.get_or_insert(regions);
        }

        first
            .map(|regions| Container::new(regions, self.name()))
            .ok_or_else(|| ExtractError::SymbolNotFound(TREE_SYMBOL.to_owned()))
    }
}

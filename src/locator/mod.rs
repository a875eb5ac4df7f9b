//! Resource container location.
//!
//! Two strategies share one contract: exact resolution through the ELF
//! symbol table, and a heuristic anchor search over a section's bytes for
//! images without usable link metadata.

mod anchors;
mod symbols;

use log::{debug, warn};

use crate::binary::{Introspection, SymbolTable};
use crate::config::LocatorStrategy;
use crate::error::{Anchor, ExtractError, Result};
use crate::resource::{NameIndex, ResourceTree};

pub use anchors::{
    find_data_table, find_names_anchor, find_tree_root, locate_by_anchors, AnchorLayout,
    AnchorLocator, BLOB_SIZE_RANGE, MIN_BLOB_RUN, NAME_ANCHOR, NAME_ANCHOR_HASH,
    ROOT_CHILD_COUNT, ROOT_FIRST_CHILD, TREE_SEARCH_WINDOW,
};
pub use symbols::{SymbolLocator, DATA_SYMBOL, NAMES_SYMBOL, TREE_SYMBOL};

/// The three tables of a located container.
#[derive(Debug, Clone, Copy)]
pub struct ResourceRegions<'a> {
    pub tree: &'a [u8],
    pub names: &'a [u8],
    pub data: &'a [u8],
}

/// A located container, ready to be walked.
#[derive(Debug)]
pub struct Container<'a> {
    pub regions: ResourceRegions<'a>,
    pub names: NameIndex,
    /// Strategy that produced this container.
    pub strategy: &'static str,
}

impl<'a> Container<'a> {
    /// Builds the name index by scanning the names region from its start.
    pub fn new(regions: ResourceRegions<'a>, strategy: &'static str) -> Self {
        Self {
            names: NameIndex::scan(regions.names),
            regions,
            strategy,
        }
    }

    pub fn into_tree(self) -> ResourceTree<'a> {
        ResourceTree::new(self.regions.tree, self.regions.data, self.names)
    }
}

/// Trait for container location strategies.
pub trait ContainerLocator {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Locates the tree, name and data tables inside `image`.
    fn locate<'a>(&self, image: &'a [u8]) -> Result<Container<'a>>;
}

/// Creates the locators to try for an image, most precise first.
pub fn create_locators(
    image: &[u8],
    introspection: Introspection,
    strategy: LocatorStrategy,
) -> Result<Vec<Box<dyn ContainerLocator>>> {
    let section = introspection.container_section();

    let anchor_locator = || -> Result<Box<dyn ContainerLocator>> {
        let section = section.ok_or(ExtractError::AnchorNotFound(Anchor::ConstSection))?;
        Ok(Box::new(AnchorLocator::new(section)))
    };

    match (introspection, strategy) {
        (Introspection::MachO { .. }, LocatorStrategy::Symbols) => Err(ExtractError::SymbolNotFound(
            "symbol resolution is only supported for ELF images".into(),
        )),
        (Introspection::MachO { .. }, _)
        | (Introspection::Elf { .. }, LocatorStrategy::Anchors) => Ok(vec![anchor_locator()?]),
        (Introspection::Elf { sections }, LocatorStrategy::Symbols) => {
            let symbols = SymbolTable::parse(image, sections)?;
            Ok(vec![Box::new(SymbolLocator::new(symbols))])
        }
        (Introspection::Elf { sections }, LocatorStrategy::Auto) => {
            let mut locators: Vec<Box<dyn ContainerLocator>> = Vec::new();
            match SymbolTable::parse(image, sections) {
                Ok(symbols) => locators.push(Box::new(SymbolLocator::new(symbols))),
                Err(ExtractError::SymbolNotFound(what)) => {
                    debug!("No symbol table ({what}), using anchor search");
                }
                Err(err) => return Err(err),
            }
            if let Ok(anchors) = anchor_locator() {
                locators.push(anchors);
            }
            if locators.is_empty() {
                return Err(ExtractError::AnchorNotFound(Anchor::ConstSection));
            }
            Ok(locators)
        }
    }
}

/// Runs `locators` in order and returns the first container found.
///
/// When every strategy fails, the error of the last one is returned.
pub fn locate_container<'a>(
    image: &'a [u8],
    locators: &[Box<dyn ContainerLocator>],
) -> Result<Container<'a>> {
    let mut last_err = ExtractError::AnchorNotFound(Anchor::ConstSection);

    for locator in locators {
        match locator.locate(image) {
            Ok(container) => {
                debug!(
                    "Container located by {}: tree {:#X}, names {:#X} ({} entries), data {:#X}",
                    locator.name(),
                    container.regions.tree.len(),
                    container.regions.names.len(),
                    container.names.len(),
                    container.regions.data.len(),
                );
                return Ok(container);
            }
            Err(err) => {
                warn!("{} strategy failed: {err}", locator.name());
                last_err = err;
            }
        }
    }

    Err(last_err)
}

//! Extraction settings.

use crate::firmware::FirmwareRegistry;

/// Which container location strategy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LocatorStrategy {
    /// Symbols when the image has them, anchor search otherwise.
    #[default]
    Auto,
    /// ELF symbol table only.
    Symbols,
    /// Anchor search only.
    Anchors,
}

/// Output filename scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NamingScheme {
    /// Names expected by the open-source driver:
    /// `kingst-la-<id>.fw` and `kingst-<model>-fpga.bitstream`.
    #[default]
    Canonical,
    /// `fw<ID>.hex` / `fw<ID>.fw` and `<MODEL>.bitstream`.
    Legacy,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractorConfig {
    pub strategy: LocatorStrategy,
    pub naming: NamingScheme,
    pub registry: FirmwareRegistry,
}

impl ExtractorConfig {
    pub fn with_strategy(mut self, strategy: LocatorStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_naming(mut self, naming: NamingScheme) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_registry(mut self, registry: FirmwareRegistry) -> Self {
        self.registry = registry;
        self
    }
}

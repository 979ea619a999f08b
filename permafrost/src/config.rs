//! Build configuration.

use {
    crate::{address::{WORD, is_aligned}, error::ConfigError},
    anyhow::Context,
    serde::{Deserialize, Serialize},
    std::{fs, path::Path},
};

/// Default requested base address of the first archive in a chain.
pub const DEFAULT_REQUESTED_BASE_ADDRESS: usize = 0x8_0000_0000;

/// Default alignment of regions in the output buffer.
pub const DEFAULT_REGION_ALIGNMENT: usize = 64 * 1024;

/// Settings that shape an archive.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig
{
    /// Address at which the first archive of a chain is designed to be mapped.
    ///
    /// When building on top of a dependency archive, this is where
    /// the dependency is requested, and this archive follows it.
    pub requested_base_address: usize,

    /// Alignment of each region, and of the output buffer as a whole.
    pub region_alignment: usize,

    /// Conservative estimate for objects that the gatherer
    /// does not measure, added to full (non-incremental) builds.
    pub placeholder_estimate_bytes: usize,

    /// Whether to log the archive map once the archive is relocated.
    pub log_map: bool,
}

impl Default for BuildConfig
{
    fn default() -> Self
    {
        Self{
            requested_base_address: DEFAULT_REQUESTED_BASE_ADDRESS,
            region_alignment: DEFAULT_REGION_ALIGNMENT,
            placeholder_estimate_bytes: 0,
            log_map: false,
        }
    }
}

impl BuildConfig
{
    /// Parse a configuration from JSON.
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> serde_json::Result<Self>
    {
        serde_json::from_str(json)
    }

    /// Read and validate a configuration file in JSON format.
    pub fn load(path: &Path) -> anyhow::Result<Self>
    {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Read build configuration {}", path.display()))?;
        let this = Self::from_json(&json)
            .with_context(|| format!("Parse build configuration {}", path.display()))?;
        this.validate()
            .with_context(|| format!("Validate build configuration {}", path.display()))?;
        Ok(this)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError>
    {
        let alignment = self.region_alignment;
        if !alignment.is_power_of_two() || alignment < WORD {
            return Err(ConfigError::RegionAlignment(alignment));
        }
        if !is_aligned(self.requested_base_address, alignment) {
            return Err(ConfigError::UnalignedBase(self.requested_base_address));
        }
        Ok(())
    }
}

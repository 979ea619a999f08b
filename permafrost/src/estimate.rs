//! Upper bounds on the size of the archive.
//!
//! The output buffer is reserved once, before any object is copied,
//! so its size must be known up front.
//! The estimate is accumulated while gathering objects,
//! and checked against actual consumption afterwards.

use {
    crate::{
        address::{WORD, align_up},
        error::InvariantViolation,
        host::SizeAdvisories,
        region::OBJECT_ALIGN,
    },
    tracing::info,
};

/// Number of regions that the output buffer is split into.
pub const REGIONS_USED: usize = 2;

/// Running estimate of the bytes needed by the archive.
#[derive(Clone, Debug, Default)]
pub struct SizeEstimate
{
    object_bytes: usize,
}

impl SizeEstimate
{
    #[allow(missing_docs)]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Account for an object of `size` bytes that will be copied.
    pub fn record_object(&mut self, size: usize)
    {
        let size = align_up(size, OBJECT_ALIGN).unwrap_or(usize::MAX);
        self.object_bytes = self.object_bytes.saturating_add(size);
    }

    /// Account for the lookup record stored alongside a type descriptor.
    pub fn record_type_descriptor(&mut self)
    {
        self.record_object(WORD);
    }

    /// Account for objects that are summarized rather than measured.
    pub fn record_placeholder(&mut self, bytes: usize)
    {
        self.object_bytes = self.object_bytes.saturating_add(bytes);
    }

    /// Bytes accounted for objects so far.
    pub fn object_bytes(&self) -> usize
    {
        self.object_bytes
    }

    /// The total number of bytes to reserve for the output buffer.
    ///
    /// This is a multiple of `region_alignment`,
    /// and includes one alignment unit of slack per region.
    pub fn total(&self, advisories: &SizeAdvisories, region_alignment: usize)
        -> usize
    {
        let SizeAdvisories{string_table, dictionary, other} = *advisories;
        let table_bytes = string_table
            .saturating_add(dictionary)
            .saturating_add(other);

        let slack = REGIONS_USED.saturating_mul(region_alignment);
        let total = self.object_bytes
            .saturating_add(table_bytes)
            .saturating_add(slack);

        info!(
            "estimated table bytes = {} + {} + {} = {}",
            string_table, dictionary, other, table_bytes,
        );
        info!("estimated object bytes = {}", self.object_bytes);
        info!("total estimate bytes = {}", total);

        align_up(total, region_alignment)
            .unwrap_or(usize::MAX & !(region_alignment - 1))
    }
}

/// Tracks buffer consumption between estimate checks.
#[derive(Clone, Debug, Default)]
pub struct UsageTracker
{
    /// Top of the current region at the previous check.
    last_verified_top: usize,

    /// Bytes used in earlier regions since the previous check.
    other_region_used: usize,
}

impl UsageTracker
{
    /// Start tracking from offset `top` of the first region.
    pub fn new(top: usize) -> Self
    {
        Self{last_verified_top: top, other_region_used: 0}
    }

    /// Allocation moves from a region ending at `old_top`
    /// to a region starting at `new_top`.
    pub fn switch_region(&mut self, old_top: usize, new_top: usize)
    {
        self.other_region_used += old_top - self.last_verified_top;
        self.last_verified_top = new_top;
    }

    /// Check that no more than `estimate` bytes were used since
    /// the previous check, with the current region's top at `top`.
    pub fn verify(&mut self, top: usize, estimate: usize, label: &'static str)
        -> Result<(), InvariantViolation>
    {
        let used = top - self.last_verified_top + self.other_region_used;
        let diff = estimate as i128 - used as i128;
        info!("{} estimate = {} used = {}; diff = {} bytes",
              label, estimate, used, diff);

        if used > estimate {
            return Err(InvariantViolation::EstimateTooSmall{
                label,
                estimate,
                used,
            });
        }

        self.last_verified_top = top;
        self.other_region_used = 0;
        Ok(())
    }
}

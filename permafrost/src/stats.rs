//! Statistics about what went into the archive.

use {
    crate::{object::ObjectKind, region::RegionKind},
    serde::Serialize,
    std::collections::BTreeMap,
    tracing::info,
};

/// Number and total size of allocations.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Usage
{
    pub count: usize,
    pub bytes: usize,
}

impl Usage
{
    fn add(&mut self, bytes: usize)
    {
        self.count += 1;
        self.bytes += bytes;
    }
}

/// Allocation statistics of one region.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RegionStats
{
    /// Copied objects, by kind.
    pub objects: BTreeMap<ObjectKind, Usage>,

    /// Hand-assembled data, such as dispatch tables.
    pub other: Usage,
}

impl RegionStats
{
    /// Total bytes allocated in the region.
    pub fn bytes(&self) -> usize
    {
        self.objects.values().map(|u| u.bytes).sum::<usize>() + self.other.bytes
    }
}

/// Allocation statistics of the whole archive.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AllocStats
{
    #[allow(missing_docs)]
    pub mutable: RegionStats,

    #[allow(missing_docs)]
    pub read_only: RegionStats,
}

impl AllocStats
{
    #[allow(missing_docs)]
    pub fn new() -> Self
    {
        Self::default()
    }

    #[allow(missing_docs)]
    pub fn region(&self, kind: RegionKind) -> &RegionStats
    {
        match kind {
            RegionKind::Mutable  => &self.mutable,
            RegionKind::ReadOnly => &self.read_only,
        }
    }

    fn region_mut(&mut self, kind: RegionKind) -> &mut RegionStats
    {
        match kind {
            RegionKind::Mutable  => &mut self.mutable,
            RegionKind::ReadOnly => &mut self.read_only,
        }
    }

    /// Record the copy of an object.
    pub fn record(&mut self, kind: ObjectKind, bytes: usize, region: RegionKind)
    {
        self.region_mut(region).objects.entry(kind).or_default().add(bytes);
    }

    /// Record hand-assembled data.
    pub fn record_other(&mut self, bytes: usize, region: RegionKind)
    {
        self.region_mut(region).other.add(bytes);
    }

    /// The statistics as a JSON document.
    pub fn to_json(&self) -> serde_json::Result<String>
    {
        serde_json::to_string_pretty(self)
    }

    /// Log a table of the statistics.
    ///
    /// `rw_used` and `ro_used` are the packed sizes of the regions,
    /// which include alignment padding on top of the recorded bytes.
    pub fn print(&self, rw_used: usize, ro_used: usize)
    {
        let all = rw_used + ro_used;
        let percent = |n: usize| if all == 0 { 0.0 } else { n as f64 * 100.0 / all as f64 };

        info!(target: "permafrost::stats",
              "Detailed metadata info (excluding heap regions):");
        info!(target: "permafrost::stats",
              "                        ro_cnt   ro_bytes     % |   \
               rw_cnt   rw_bytes     % |  all_cnt  all_bytes     %");
        info!(target: "permafrost::stats",
              "--------------------+---------------------------\
               +---------------------------+--------------------------");

        let line = |name: &str, ro: Usage, rw: Usage| {
            let cnt = ro.count + rw.count;
            let bytes = ro.bytes + rw.bytes;
            info!(target: "permafrost::stats",
                  "{:<20}{:>8} {:>10} {:>5.1} | {:>8} {:>10} {:>5.1} | \
                   {:>8} {:>10} {:>5.1}",
                  name,
                  ro.count, ro.bytes, percent(ro.bytes),
                  rw.count, rw.bytes, percent(rw.bytes),
                  cnt, bytes, percent(bytes));
        };

        for kind in ObjectKind::ALL {
            let ro = self.read_only.objects.get(&kind).copied().unwrap_or_default();
            let rw = self.mutable.objects.get(&kind).copied().unwrap_or_default();
            if ro.count + rw.count != 0 {
                line(kind.name(), ro, rw);
            }
        }
        line("Other", self.read_only.other, self.mutable.other);

        info!(target: "permafrost::stats",
              "Total {:>14} bytes in rw, {} bytes in ro \
               ({} and {} bytes of objects)",
              rw_used, ro_used, self.mutable.bytes(), self.read_only.bytes());
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn records_by_kind_and_region()
    {
        let mut stats = AllocStats::new();
        stats.record(ObjectKind::Procedure, 48, RegionKind::Mutable);
        stats.record(ObjectKind::Procedure, 16, RegionKind::Mutable);
        stats.record(ObjectKind::InternedString, 24, RegionKind::ReadOnly);
        stats.record_other(64, RegionKind::Mutable);

        assert_eq!(
            stats.mutable.objects[&ObjectKind::Procedure],
            Usage{count: 2, bytes: 64},
        );
        assert_eq!(stats.region(RegionKind::Mutable).bytes(), 128);
        assert_eq!(stats.region(RegionKind::ReadOnly).bytes(), 24);
        stats.print(4096, 4096);
    }

    #[test]
    fn serializes_to_json()
    {
        let mut stats = AllocStats::new();
        stats.record(ObjectKind::ConstantPool, 32, RegionKind::ReadOnly);
        let json: serde_json::Value =
            serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(json["read_only"]["objects"]["ConstantPool"]["bytes"], 32);
        assert_eq!(json["mutable"]["other"]["count"], 0);
    }
}

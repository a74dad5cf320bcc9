//! Hourly advertising packet counts.
//!
//! The aggregator remembers the UTC hour it was last rolled over in and owns
//! one counter per registry entry, addressed by registry index. Rollover is
//! driven purely by the wall clock: the caller polls [`HourlyAggregator::is_rollover_due`]
//! and, once it returns true, takes the summary with [`HourlyAggregator::roll_over`].

use crate::registry::Registry;
use crate::vendor::VendorType;
use time::{OffsetDateTime, UtcOffset};

fn utc_hour(now: OffsetDateTime) -> u8 {
    now.to_offset(UtcOffset::UTC).hour()
}

#[derive(Debug, Clone)]
pub struct HourlyAggregator {
    hour: u8,
    counts: Vec<u32>,
}

impl HourlyAggregator {
    /// Start counting in the hour of `now` for a registry of `devices` entries.
    pub fn new(now: OffsetDateTime, devices: usize) -> Self {
        Self {
            hour: utc_hour(now),
            counts: vec![0; devices],
        }
    }

    /// UTC hour of day (0-23) currently being counted.
    pub fn hour(&self) -> u8 {
        self.hour
    }

    /// Count one emitted reading for the device at `index`.
    ///
    /// Vendors that are never decoded, such as [`VendorType::RawDebug`], are
    /// not counted.
    pub fn record(&mut self, index: usize, vendor: VendorType) {
        if !vendor.is_counted() {
            return;
        }
        if let Some(count) = self.counts.get_mut(index) {
            *count = count.saturating_add(1);
        }
    }

    pub fn count(&self, index: usize) -> u32 {
        self.counts.get(index).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    /// Whether the wall clock has left the hour being counted.
    pub fn is_rollover_due(&self, now: OffsetDateTime) -> bool {
        utc_hour(now) != self.hour
    }

    /// Summarize the finished hour, reset every counter and start counting in
    /// the hour of `now`.
    pub fn roll_over(&mut self, registry: &Registry, now: OffsetDateTime) -> HourlyStats {
        let entries = registry
            .iter()
            .enumerate()
            .map(|(index, device)| StatsEntry {
                mac: device.mac.clone(),
                location: device.location.clone(),
                count: self.count(index),
            })
            .collect();
        let total = self.total();

        self.counts.iter_mut().for_each(|count| *count = 0);
        self.hour = utc_hour(now);

        HourlyStats {
            timestamp: now,
            entries,
            total,
        }
    }
}

/// Counts for one finished hour.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyStats {
    pub timestamp: OffsetDateTime,
    /// One entry per configured device, in registry order
    pub entries: Vec<StatsEntry>,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsEntry {
    pub mac: String,
    pub location: String,
    pub count: u32,
}

//! EPG (Electronic Program Guide) module
//!
//! Holds the parsed XMLTV index for the session and answers per-channel,
//! per-day schedule queries.

mod parser;

use std::collections::HashMap;

use chrono::{
    DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone,
    Utc,
};
use tracing::{info, warn};

use crate::api::PanelClient;
use crate::error::{ViewerError, ViewerResult};

pub use parser::{Program, Timestamp};

/// Programs grouped by XMLTV channel id, each group sorted by start time.
#[derive(Debug, Clone, Default)]
pub struct EpgIndex {
    channels: HashMap<String, String>,
    programs: HashMap<String, Vec<Program>>,
    parse_errors: Vec<String>,
    parse_error_count: usize,
}

impl EpgIndex {
    /// Build an index from a raw `xmltv.php` body (plain or gzip).
    pub fn from_xmltv(body: &[u8]) -> Self {
        parser::parse(body)
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty() && self.channels.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len().max(self.programs.len())
    }

    pub fn program_count(&self) -> usize {
        self.programs.values().map(Vec::len).sum()
    }

    pub fn parse_errors(&self) -> &[String] {
        &self.parse_errors
    }

    pub fn parse_error_count(&self) -> usize {
        self.parse_error_count
    }

    /// First `<display-name>` of an XMLTV channel
    pub fn display_name(&self, channel_id: &str) -> Option<&str> {
        self.channels
            .get(channel_id)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn programs(&self, channel_id: &str) -> Option<&[Program]> {
        self.programs.get(channel_id).map(Vec::as_slice)
    }

    /// Programs for a channel, optionally limited to one calendar day in `zone`.
    ///
    /// A missing or unknown id is `EpgChannelUnknown`; a known channel with
    /// nothing on that day is an empty list. Programs with an unparseable
    /// start are only returned when no date is given.
    pub fn query(
        &self,
        epg_channel_id: Option<&str>,
        date: Option<NaiveDate>,
        zone: DisplayZone,
    ) -> ViewerResult<Vec<&Program>> {
        let programs = epg_channel_id
            .filter(|id| !id.is_empty())
            .and_then(|id| self.programs.get(id))
            .ok_or(ViewerError::EpgChannelUnknown)?;

        let Some(date) = date else {
            return Ok(programs.iter().collect());
        };

        let (from, to) = zone.day_window(date);
        Ok(programs
            .iter()
            .filter(|p| matches!(p.start.instant(), Some(start) if start >= from && start < to))
            .collect())
    }

    /// The program airing at `now`
    pub fn current_program(&self, channel_id: &str, now: DateTime<Utc>) -> Option<&Program> {
        let programs = self.programs.get(channel_id)?;
        let idx = started_before(programs, now);
        let candidate = programs[..idx].last()?;
        match candidate.stop.instant() {
            Some(stop) if now < stop => Some(candidate),
            _ => None,
        }
    }

    /// Up to `count` programs starting after `now`
    pub fn upcoming(&self, channel_id: &str, now: DateTime<Utc>, count: usize) -> Vec<&Program> {
        let Some(programs) = self.programs.get(channel_id) else {
            return Vec::new();
        };
        let idx = started_before(programs, now);
        programs[idx..]
            .iter()
            .filter(|p| p.start.is_valid())
            .take(count)
            .collect()
    }
}

/// Number of programs whose start is at or before `now`. Groups are sorted
/// with invalid starts last, so those never count.
fn started_before(programs: &[Program], now: DateTime<Utc>) -> usize {
    programs.partition_point(|p| matches!(p.start.instant(), Some(start) if start <= now))
}

/// Zone used to draw day boundaries and render times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayZone {
    Local,
    Fixed(FixedOffset),
}

impl DisplayZone {
    /// `None` follows the system zone; otherwise a fixed offset in hours (may be fractional).
    pub fn from_offset_hours(hours: Option<f32>) -> Self {
        match hours.and_then(|h| FixedOffset::east_opt((h * 3600.0).round() as i32)) {
            Some(offset) => DisplayZone::Fixed(offset),
            None => DisplayZone::Local,
        }
    }

    pub fn utc() -> Self {
        DisplayZone::Fixed(Utc.fix())
    }

    /// `[date 00:00, date+1 00:00)` in this zone, as UTC instants.
    pub fn day_window(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let next = date.succ_opt().unwrap_or(date);
        let start = date.and_time(NaiveTime::default());
        let end = next.and_time(NaiveTime::default());
        match self {
            DisplayZone::Local => (resolve(&Local, start), resolve(&Local, end)),
            DisplayZone::Fixed(offset) => (resolve(offset, start), resolve(offset, end)),
        }
    }

    /// Today's date in this zone
    pub fn today(&self) -> NaiveDate {
        let now = Utc::now();
        match self {
            DisplayZone::Local => now.with_timezone(&Local).date_naive(),
            DisplayZone::Fixed(offset) => now.with_timezone(offset).date_naive(),
        }
    }

    /// HH:MM in this zone, or `--:--` for an unparseable time.
    pub fn format_time(&self, ts: &Timestamp) -> String {
        match ts.instant() {
            Some(instant) => match self {
                DisplayZone::Local => instant.with_timezone(&Local).format("%H:%M").to_string(),
                DisplayZone::Fixed(offset) => {
                    instant.with_timezone(offset).format("%H:%M").to_string()
                }
            },
            None => "--:--".to_string(),
        }
    }
}

/// Local midnight can fall inside a DST gap; step forward an hour when it does.
fn resolve<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// Session-owned EPG. Rebuilt after each login; empty when the download failed.
#[derive(Debug, Default)]
pub struct EpgCache {
    index: EpgIndex,
}

impl EpgCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> &EpgIndex {
        &self.index
    }

    pub fn clear(&mut self) {
        self.index = EpgIndex::default();
    }

    /// Download `xmltv.php` and replace the index. On failure the index stays empty.
    pub fn rebuild(&mut self, client: &PanelClient) -> ViewerResult<()> {
        self.clear();

        let target = client.xmltv_url()?;
        let response = client.fetch(&target).map_err(|e| {
            warn!("EPG download failed: {}", e);
            ViewerError::EpgUnavailable
        })?;

        let index = EpgIndex::from_xmltv(&response.body);
        if index.parse_error_count() > 0 {
            warn!(
                "EPG parsed with {} error(s), first: {}",
                index.parse_error_count(),
                index.parse_errors().first().map(String::as_str).unwrap_or("")
            );
        }
        info!(
            "EPG loaded: {} channels, {} programs",
            index.channel_count(),
            index.program_count()
        );

        self.index = index;
        Ok(())
    }

    pub fn query(
        &self,
        epg_channel_id: Option<&str>,
        date: Option<NaiveDate>,
        zone: DisplayZone,
    ) -> ViewerResult<Vec<&Program>> {
        self.index.query(epg_channel_id, date, zone)
    }
}

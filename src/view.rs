//! Plain-text rendering of results

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::epg::{DisplayZone, EpgIndex, Program};
use crate::error::{ViewerError, ViewerResult};
use crate::models::{Category, Channel};

pub const NO_CATEGORIES: &str = "No categories found.";
pub const NO_CHANNELS: &str = "No channels found.";
pub const NO_PROGRAMS: &str = "No programs for the selected date.";

pub fn categories(categories: &[Category]) -> String {
    if categories.is_empty() {
        return NO_CATEGORIES.to_string();
    }
    let width = categories.iter().map(|c| c.id.len()).max().unwrap_or(0);
    let mut out = String::new();
    for category in categories {
        let _ = writeln!(out, "{:>width$}  {}", category.id, category.name, width = width);
    }
    out
}

/// Channel list. With a guide, each line also shows what is on now.
pub fn channels(channels: &[&Channel], guide: Option<(&EpgIndex, DateTime<Utc>)>) -> String {
    if channels.is_empty() {
        return NO_CHANNELS.to_string();
    }
    let width = channels.iter().map(|c| c.stream_id.len()).max().unwrap_or(0);
    let mut out = String::new();
    for channel in channels {
        let _ = write!(out, "{:>width$}  {}", channel.stream_id, channel.name, width = width);

        let now_playing = guide.and_then(|(index, now)| {
            let id = channel.epg_channel_id.as_deref()?;
            index.current_program(id, now)
        });
        if let Some(program) = now_playing {
            let _ = write!(out, "  [now: {}]", program.title);
        }
        out.push('\n');
    }
    out
}

/// Schedule for one channel, or the message explaining why there is none.
pub fn schedule(result: &ViewerResult<Vec<&Program>>, zone: DisplayZone) -> String {
    let programs = match result {
        Ok(programs) => programs,
        Err(e) => return e.to_string(),
    };
    if programs.is_empty() {
        return NO_PROGRAMS.to_string();
    }

    let mut out = String::new();
    for program in programs {
        let _ = writeln!(
            out,
            "{} - {}  {}",
            zone.format_time(&program.start),
            zone.format_time(&program.stop),
            program.title
        );
        let _ = writeln!(out, "               {}", program.description);
    }
    out
}

pub fn error(e: &ViewerError) -> String {
    format!("Error: {}", e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn channel(id: &str, name: &str, epg: Option<&str>) -> Channel {
        Channel {
            stream_id: id.to_string(),
            name: name.to_string(),
            icon_url: None,
            epg_channel_id: epg.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_lists() {
        assert_eq!(categories(&[]), "No categories found.");
        assert_eq!(channels(&[], None), "No channels found.");
    }

    #[test]
    fn test_category_lines() {
        let list = vec![
            Category { id: "1".into(), name: "News".into() },
            Category { id: "12".into(), name: "Sports".into() },
        ];
        assert_eq!(categories(&list), " 1  News\n12  Sports\n");
    }

    #[test]
    fn test_channels_with_now_playing() {
        let index = EpgIndex::from_xmltv(
            br#"<tv><programme start="20240101120000 +0000" stop="20240101130000 +0000" channel="n.tv"><title>Noon</title></programme></tv>"#,
        );
        let now = DateTime::parse_from_rfc3339("2024-01-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = channel("7", "News", Some("n.tv"));
        let b = channel("8", "Other", None);

        let text = channels(&[&a, &b], Some((&index, now)));
        assert_eq!(text, "7  News  [now: Noon]\n8  Other\n");
    }

    #[test]
    fn test_schedule_messages() {
        let zone = DisplayZone::utc();
        assert_eq!(
            schedule(&Err(ViewerError::EpgChannelUnknown), zone),
            "EPG not available for this channel."
        );
        assert_eq!(schedule(&Ok(Vec::new()), zone), "No programs for the selected date.");
    }

    #[test]
    fn test_schedule_lines() {
        let index = EpgIndex::from_xmltv(
            br#"<tv><programme start="20240101230000 +0000" stop="20240102000000 +0000" channel="5"><title>Late</title><desc>Talk</desc></programme></tv>"#,
        );
        let result = index.query(Some("5"), None, DisplayZone::utc());
        let text = schedule(&result, DisplayZone::utc());
        assert!(text.starts_with("23:00 - 00:00  Late\n"));
        assert!(text.contains("Talk"));
    }
}

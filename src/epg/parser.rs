//! XMLTV parser
//! Reads `<programme>` and `<channel>` elements into per-channel schedules.
//! Accepts plain or gzip-compressed (.xml.gz) bodies.

use std::io::{self, BufRead, Read};

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::EpgIndex;

const MAX_STORED_ERRORS: usize = 50;
const READ_CHUNK: usize = 64 * 1024;
/// Longest `&...;` the sanitizer looks at before calling an `&` bare.
const ENTITY_LOOKAHEAD: usize = 12;
const CDATA_START: &[u8] = b"<![CDATA[";
const CDATA_END: &[u8] = b"]]>";
const DEFAULT_TITLE: &str = "No Title";
const DEFAULT_DESCRIPTION: &str = "No description.";

/// XMLTV time. Unparseable values are kept so the entry is not lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timestamp {
    Valid(DateTime<FixedOffset>),
    Invalid(String),
}

impl Timestamp {
    /// Parse `YYYYMMDDHHMMSS ±HHMM`. Spaces are ignored; a missing offset means UTC.
    pub fn parse(raw: &str) -> Self {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        match parse_compact(&compact) {
            Some(dt) => Timestamp::Valid(dt),
            None => Timestamp::Invalid(raw.to_string()),
        }
    }

    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Valid(dt) => Some(dt.with_timezone(&Utc)),
            Timestamp::Invalid(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Timestamp::Valid(_))
    }
}

/// A single TV program
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub channel_id: String,
    pub start: Timestamp,
    pub stop: Timestamp,
    pub title: String,
    pub description: String,
}

fn parse_compact(s: &str) -> Option<DateTime<FixedOffset>> {
    let digits = s.get(..14)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = |from: usize, to: usize| digits[from..to].parse::<u32>().ok();

    let year: i32 = digits[0..4].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4, 6)?, field(6, 8)?)?;
    let naive = date.and_hms_opt(field(8, 10)?, field(10, 12)?, field(12, 14)?)?;
    let offset = parse_offset(&s[14..])?;

    offset.from_local_datetime(&naive).single()
}

/// `+0100`, `-05:30`, `Z` or nothing
fn parse_offset(tz: &str) -> Option<FixedOffset> {
    if tz.is_empty() || tz == "Z" {
        return FixedOffset::east_opt(0);
    }

    let sign = match tz.as_bytes()[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let rest = tz[1..].replace(':', "");
    if rest.len() != 4 || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = rest[0..2].parse().ok()?;
    let minutes: i32 = rest[2..4].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    Root,
    Channel,
    DisplayName,
    Programme,
    Title,
    Desc,
}

impl ParserState {
    fn collects_text(self) -> bool {
        matches!(
            self,
            ParserState::DisplayName | ParserState::Title | ParserState::Desc
        )
    }
}

#[derive(Default)]
struct PendingProgram {
    channel_id: String,
    start: String,
    stop: String,
    title: Option<String>,
    description: Option<String>,
}

impl PendingProgram {
    fn from_element(e: &BytesStart) -> Self {
        Self {
            channel_id: get_attribute(e, b"channel").unwrap_or_default(),
            start: get_attribute(e, b"start").unwrap_or_default(),
            stop: get_attribute(e, b"stop").unwrap_or_default(),
            ..Default::default()
        }
    }

    fn finish(self) -> Program {
        Program {
            start: Timestamp::parse(&self.start),
            stop: Timestamp::parse(&self.stop),
            title: self
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            description: self
                .description
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            channel_id: self.channel_id,
        }
    }
}

/// Accumulates parse output and error bookkeeping.
#[derive(Default)]
struct Collector {
    index: EpgIndex,
}

impl Collector {
    fn error(&mut self, message: String) {
        self.index.parse_error_count += 1;
        if self.index.parse_errors.len() < MAX_STORED_ERRORS {
            self.index.parse_errors.push(message);
        }
    }

    fn push_program(&mut self, pending: PendingProgram) {
        if pending.channel_id.is_empty() {
            self.error("programme without channel attribute skipped".to_string());
            return;
        }
        let program = pending.finish();
        self.index
            .programs
            .entry(program.channel_id.clone())
            .or_default()
            .push(program);
    }

    fn push_channel(&mut self, id: String, name: String) {
        if !id.is_empty() {
            self.index.channels.entry(id).or_insert(name);
        }
    }

    fn finish(mut self) -> EpgIndex {
        // valid start times ascending, unparseable ones last; stable for ties
        for programs in self.index.programs.values_mut() {
            programs.sort_by_key(|p| {
                let start = p.start.instant();
                (start.is_none(), start)
            });
        }
        self.index
    }
}

/// Parse an XMLTV body into an index. Never fails: whatever was read before
/// an error is kept and the error is recorded on the index.
pub fn parse(body: &[u8]) -> EpgIndex {
    // gzip magic 1f 8b; decoded while parsing, never inflated up front
    if body.starts_with(&[0x1f, 0x8b]) {
        parse_reader(SanitizingReader::new(GzDecoder::new(body)))
    } else {
        parse_reader(SanitizingReader::new(body))
    }
}

fn parse_reader<R: BufRead>(source: R) -> EpgIndex {
    let mut collector = Collector::default();
    let mut reader = Reader::from_reader(source);
    let mut buf = Vec::with_capacity(8192);

    let mut state = ParserState::Root;
    let mut program: Option<PendingProgram> = None;
    let mut channel: Option<(String, String)> = None;
    let mut text = String::new();

    loop {
        let position = reader.buffer_position();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"programme" => {
                    program = Some(PendingProgram::from_element(e));
                    state = ParserState::Programme;
                }
                b"channel" => {
                    let id = get_attribute(e, b"id").unwrap_or_default();
                    channel = Some((id, String::new()));
                    state = ParserState::Channel;
                }
                b"title" if state == ParserState::Programme => {
                    state = ParserState::Title;
                    text.clear();
                }
                b"desc" if state == ParserState::Programme => {
                    state = ParserState::Desc;
                    text.clear();
                }
                b"display-name" if state == ParserState::Channel => {
                    state = ParserState::DisplayName;
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"programme" => collector.push_program(PendingProgram::from_element(e)),
                b"channel" => {
                    let id = get_attribute(e, b"id").unwrap_or_default();
                    collector.push_channel(id, String::new());
                }
                _ => {}
            },
            Ok(Event::Text(ref e)) if state.collects_text() => {
                text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::CData(ref e)) if state.collects_text() => {
                text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::GeneralRef(ref e)) if state.collects_text() => {
                text.push_str(&resolve_reference(&String::from_utf8_lossy(e.as_ref())));
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"title" if state == ParserState::Title => {
                    if let Some(ref mut p) = program {
                        p.title = Some(text.trim().to_string());
                    }
                    state = ParserState::Programme;
                }
                b"desc" if state == ParserState::Desc => {
                    if let Some(ref mut p) = program {
                        p.description = Some(text.trim().to_string());
                    }
                    state = ParserState::Programme;
                }
                b"display-name" if state == ParserState::DisplayName => {
                    if let Some((_, ref mut name)) = channel {
                        if name.is_empty() {
                            *name = text.trim().to_string();
                        }
                    }
                    state = ParserState::Channel;
                }
                b"programme" => {
                    if let Some(p) = program.take() {
                        collector.push_program(p);
                    }
                    state = ParserState::Root;
                }
                b"channel" => {
                    if let Some((id, name)) = channel.take() {
                        collector.push_channel(id, name);
                    }
                    state = ParserState::Root;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                collector.error(format!("XML error at byte {}: {}", position, e));
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    collector.finish()
}

/// Streams bytes through while fixing what panels get wrong: control
/// characters become spaces and a bare `&` becomes `&amp;`. CDATA sections
/// keep their `&` as is. Input is read in chunks; a partial `&...` or
/// CDATA marker at the end of a chunk waits for the next one.
struct SanitizingReader<R> {
    inner: R,
    chunk: Vec<u8>,
    pending: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
    in_cdata: bool,
    eof: bool,
}

impl<R: Read> SanitizingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            chunk: vec![0u8; READ_CHUNK],
            pending: Vec::new(),
            out: Vec::with_capacity(READ_CHUNK + READ_CHUNK / 2),
            pos: 0,
            in_cdata: false,
            eof: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        if !self.eof {
            let n = loop {
                match self.inner.read(&mut self.chunk) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            };
            if n == 0 {
                self.eof = true;
            } else {
                self.pending.extend_from_slice(&self.chunk[..n]);
            }
        }
        self.process();
        Ok(())
    }

    /// Move as much of `pending` to `out` as can be decided now.
    fn process(&mut self) {
        let eof = self.eof;
        let mut i = 0;
        while i < self.pending.len() {
            let rest = &self.pending[i..];
            let needs_more = |len: usize| rest.len() < len && !eof;

            if self.in_cdata {
                if rest[0] == b']' {
                    if needs_more(CDATA_END.len()) {
                        break;
                    }
                    if rest.starts_with(CDATA_END) {
                        self.out.extend_from_slice(CDATA_END);
                        self.in_cdata = false;
                        i += CDATA_END.len();
                        continue;
                    }
                }
            } else if rest[0] == b'<' {
                if needs_more(CDATA_START.len()) {
                    break;
                }
                if rest.starts_with(CDATA_START) {
                    self.out.extend_from_slice(CDATA_START);
                    self.in_cdata = true;
                    i += CDATA_START.len();
                    continue;
                }
            } else if rest[0] == b'&' {
                if needs_more(ENTITY_LOOKAHEAD) {
                    break;
                }
                if !starts_entity(rest) {
                    self.out.extend_from_slice(b"&amp;");
                    i += 1;
                    continue;
                }
            }

            self.out.push(clean_byte(rest[0]));
            i += 1;
        }
        self.pending.drain(..i);
    }
}

fn clean_byte(b: u8) -> u8 {
    match b {
        0x09 | 0x0A | 0x0D => b,
        0x00..=0x1F | 0x7F => b' ',
        _ => b,
    }
}

impl<R: Read> Read for SanitizingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for SanitizingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.pos >= self.out.len() {
            self.out.clear();
            self.pos = 0;
            if self.eof && self.pending.is_empty() {
                break;
            }
            self.refill()?;
        }
        Ok(&self.out[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.out.len());
    }
}

/// `bytes` starts at a `&`; true for `&name;` and `&#123;` / `&#x1F;`.
fn starts_entity(bytes: &[u8]) -> bool {
    let window = &bytes[1..bytes.len().min(12)];
    let Some(end) = window.iter().position(|&c| c == b';') else {
        return false;
    };
    let name = &window[..end];
    match name.split_first() {
        Some((b'#', digits)) => {
            let digits = digits.strip_prefix(b"x").or_else(|| digits.strip_prefix(b"X"));
            match digits {
                Some(hex) => !hex.is_empty() && hex.iter().all(u8::is_ascii_hexdigit),
                None => {
                    let dec = &name[1..];
                    !dec.is_empty() && dec.iter().all(u8::is_ascii_digit)
                }
            }
        }
        Some(_) => name.iter().all(u8::is_ascii_alphanumeric),
        None => false,
    }
}

/// Text for an entity reference such as `amp` or `#8217`.
fn resolve_reference(name: &str) -> String {
    let entity = format!("&{};", name);
    match quick_xml::escape::unescape(&entity) {
        Ok(resolved) => resolved.into_owned(),
        Err(_) if name == "nbsp" => " ".to_string(),
        Err(_) => entity,
    }
}

fn get_attribute(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .map(|attr| {
            let raw = String::from_utf8_lossy(attr.value.as_ref()).into_owned();
            match quick_xml::escape::unescape(&raw) {
                Ok(value) => value.into_owned(),
                Err(_) => raw,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_timestamp_with_offset() {
        let ts = Timestamp::parse("20240115120000 +0100");
        assert_eq!(ts.instant(), Some(utc("2024-01-15T11:00:00Z")));

        let compact = Timestamp::parse("20240115120000+0100");
        assert_eq!(ts, compact);
    }

    #[test]
    fn test_timestamp_offset_variants() {
        let expected = Some(utc("2024-01-15T12:00:00Z"));
        assert_eq!(Timestamp::parse("20240115120000").instant(), expected);
        assert_eq!(Timestamp::parse("20240115120000 Z").instant(), expected);
        assert_eq!(
            Timestamp::parse("20240115173000 +05:30").instant(),
            expected
        );
        assert_eq!(Timestamp::parse("20240115070000 -0500").instant(), expected);
    }

    #[test]
    fn test_malformed_timestamps_are_invalid() {
        for raw in [
            "",
            "2024011512",
            "2024O115120000 +0000",
            "20241315120000 +0000",
            "20240115120000 +01",
            "20240115120000 0100",
            "20240115120000 +0175",
        ] {
            let ts = Timestamp::parse(raw);
            assert!(!ts.is_valid(), "{:?} should be invalid", raw);
            assert_eq!(ts.instant(), None);
        }
    }

    #[test]
    fn test_parse_simple_epg() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv>
  <channel id="bbc1">
    <display-name>BBC One</display-name>
    <display-name>BBC1</display-name>
  </channel>
  <programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="bbc1">
    <title>News at Noon</title>
    <desc>Daily news broadcast</desc>
    <category>News</category>
  </programme>
</tv>"#;

        let epg = parse(xml.as_bytes());

        assert_eq!(epg.display_name("bbc1"), Some("BBC One"));
        let programs = epg.programs("bbc1").unwrap();
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].title, "News at Noon");
        assert_eq!(programs[0].description, "Daily news broadcast");
        assert_eq!(epg.parse_error_count(), 0);
    }

    #[test]
    fn test_missing_title_and_desc_get_defaults() {
        let xml = r#"<tv>
  <programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="a"></programme>
  <programme start="20240115130000 +0000" stop="20240115140000 +0000" channel="a"><title/></programme>
  <programme start="20240115140000 +0000" stop="20240115150000 +0000" channel="a"/>
</tv>"#;
        let epg = parse(xml.as_bytes());
        let programs = epg.programs("a").unwrap();
        assert_eq!(programs.len(), 3);
        for p in programs {
            assert_eq!(p.title, "No Title");
            assert_eq!(p.description, "No description.");
        }
    }

    #[test]
    fn test_groups_sorted_by_start() {
        let xml = r#"<tv>
  <programme start="20240115140000 +0000" stop="20240115150000 +0000" channel="ch1"><title>Third</title></programme>
  <programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="ch1"><title>First</title></programme>
  <programme start="20240115140000 +0200" stop="20240115150000 +0200" channel="ch1"><title>Second</title></programme>
  <programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="ch2"><title>Other</title></programme>
</tv>"#;
        let epg = parse(xml.as_bytes());
        let titles: Vec<&str> = epg
            .programs("ch1")
            .unwrap()
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(titles, ["First", "Second", "Third"]);
        assert_eq!(epg.program_count(), 4);
        assert_eq!(epg.channel_count(), 2);
    }

    #[test]
    fn test_invalid_timestamp_entry_kept_and_sorted_last() {
        let xml = r#"<tv>
  <programme start="garbage" stop="20240115130000 +0000" channel="ch1"><title>Broken</title></programme>
  <programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="ch1"><title>Fine</title></programme>
  <programme stop="20240115130000 +0000" channel="ch1"><title>No start</title></programme>
</tv>"#;
        let epg = parse(xml.as_bytes());
        let programs = epg.programs("ch1").unwrap();
        assert_eq!(programs.len(), 3);
        assert_eq!(programs[0].title, "Fine");
        assert!(!programs[1].start.is_valid());
        assert!(!programs[2].start.is_valid());
    }

    #[test]
    fn test_entities_and_bare_ampersands() {
        let xml = "<tv><programme start=\"20240115120000 +0000\" stop=\"20240115130000 +0000\" channel=\"c&amp;d\">\
<title>Tom &amp; Jerry</title><desc>Rock & Roll &#8211; live\u{1}</desc></programme></tv>";
        let epg = parse(xml.as_bytes());
        let program = &epg.programs("c&d").unwrap()[0];
        assert_eq!(program.title, "Tom & Jerry");
        assert_eq!(program.description, "Rock & Roll \u{2013} live");
    }

    #[test]
    fn test_cdata_description() {
        let xml = r#"<tv><programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="x"><title>T</title><desc><![CDATA[<b>bold</b> text]]></desc></programme></tv>"#;
        let epg = parse(xml.as_bytes());
        assert_eq!(epg.programs("x").unwrap()[0].description, "<b>bold</b> text");
    }

    #[test]
    fn test_cdata_ampersand_left_alone() {
        let xml = r#"<tv><programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="x"><title>Q & A</title><desc><![CDATA[Salt & Pepper &co]]> & more</desc></programme></tv>"#;
        let epg = parse(xml.as_bytes());
        let program = &epg.programs("x").unwrap()[0];
        assert_eq!(program.title, "Q & A");
        assert_eq!(program.description, "Salt & Pepper &co & more");
    }

    /// Hands out one byte per read, so every lookahead straddles a read.
    struct OneByteAtATime<'a>(&'a [u8]);

    impl Read for OneByteAtATime<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.split_first() {
                Some((&b, rest)) if !buf.is_empty() => {
                    buf[0] = b;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn test_sanitizer_across_read_boundaries() {
        let input = b"a & b &amp; &#8211; <![CDATA[x & y]]> <b>\x01 &";
        let mut cleaned = Vec::new();
        SanitizingReader::new(OneByteAtATime(input))
            .read_to_end(&mut cleaned)
            .unwrap();
        assert_eq!(
            String::from_utf8(cleaned).unwrap(),
            "a &amp; b &amp; &#8211; <![CDATA[x & y]]> <b>  &amp;"
        );
    }

    #[test]
    fn test_large_gzip_body_streams() {
        let mut xml = String::from("<tv>");
        for i in 0..5000 {
            xml.push_str(&format!(
                "<programme start=\"20240115{:02}0000 +0000\" stop=\"20240115{:02}3000 +0000\" channel=\"ch{}\"><title>Show {} & Co</title></programme>",
                i % 24,
                i % 24,
                i % 7,
                i
            ));
        }
        xml.push_str("</tv>");
        assert!(xml.len() > 2 * READ_CHUNK);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(xml.as_bytes()).unwrap();
        let epg = parse(&encoder.finish().unwrap());

        assert_eq!(epg.program_count(), 5000);
        assert_eq!(epg.channel_count(), 7);
        assert_eq!(epg.parse_error_count(), 0);
        assert!(epg.programs("ch3").unwrap().iter().all(|p| p.title.ends_with("& Co")));
    }

    #[test]
    fn test_programme_without_channel_is_skipped() {
        let xml = r#"<tv><programme start="20240115120000 +0000" stop="20240115130000 +0000"><title>Orphan</title></programme></tv>"#;
        let epg = parse(xml.as_bytes());
        assert_eq!(epg.program_count(), 0);
        assert_eq!(epg.parse_error_count(), 1);
    }

    #[test]
    fn test_gzip_body() {
        let xml = r#"<tv><programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="gz"><title>Packed</title></programme></tv>"#;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(xml.as_bytes()).unwrap();
        let packed = encoder.finish().unwrap();

        let epg = parse(&packed);
        assert_eq!(epg.programs("gz").unwrap()[0].title, "Packed");
    }

    #[test]
    fn test_truncated_document_keeps_prefix() {
        let xml = r#"<tv><programme start="20240115120000 +0000" stop="20240115130000 +0000" channel="a"><title>Whole</title></programme><programme start="2024"#;
        let epg = parse(xml.as_bytes());
        assert_eq!(epg.programs("a").unwrap().len(), 1);
    }

    #[test]
    fn test_empty_and_garbage_bodies() {
        assert!(parse(b"").is_empty());
        assert!(parse(b"<html><body>502</body></html>").is_empty());
        assert!(parse(&[0x1f, 0x8b, 0x00]).parse_error_count() > 0);
    }
}

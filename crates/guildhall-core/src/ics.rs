// iCalendar (RFC 5545) rendering of events.

use chrono::{DateTime, Utc};

use crate::events::Event;

/// Content lines longer than this many octets are folded.
const MAX_LINE_OCTETS: usize = 75;

const PRODID: &str = "-//Guildhall//Community Events//EN";

/// `YYYYMMDDTHHMMSSZ`
pub fn format_utc(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Escape a TEXT property value.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Fold a content line at 75 octets, never splitting a UTF-8 sequence.
/// Continuation lines start with a single space. Each physical line ends
/// with CRLF.
pub fn fold_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + line.len() / MAX_LINE_OCTETS * 3 + 2);
    let mut octets = 0;
    for c in line.chars() {
        let len = c.len_utf8();
        if octets + len > MAX_LINE_OCTETS {
            out.push_str("\r\n ");
            // The leading space counts toward the next line.
            octets = 1;
        }
        out.push(c);
        octets += len;
    }
    out.push_str("\r\n");
    out
}

struct Writer {
    out: String,
}

impl Writer {
    fn new() -> Self {
        Self { out: String::new() }
    }

    fn line(&mut self, name: &str, value: &str) {
        self.out.push_str(&fold_line(&format!("{name}:{value}")));
    }

    fn text(&mut self, name: &str, value: &str) {
        self.line(name, &escape_text(value));
    }

    fn begin_calendar(&mut self, name: Option<&str>) {
        self.line("BEGIN", "VCALENDAR");
        self.line("VERSION", "2.0");
        self.line("PRODID", PRODID);
        self.line("CALSCALE", "GREGORIAN");
        self.line("METHOD", "PUBLISH");
        if let Some(name) = name {
            self.text("X-WR-CALNAME", name);
        }
    }

    fn event(&mut self, event: &Event, host: &str, stamp: &DateTime<Utc>) {
        self.line("BEGIN", "VEVENT");
        self.line("UID", &event_uid(event.id, host));
        self.line("DTSTAMP", &format_utc(stamp));
        self.line("DTSTART", &format_utc(&event.starts_at));
        self.line("DTEND", &format_utc(&event.ends_at));
        self.line("CREATED", &format_utc(&event.created_at));
        self.line("LAST-MODIFIED", &format_utc(&event.updated_at));
        self.text("SUMMARY", &event.title);
        self.text("DESCRIPTION", &event.description);
        if let Some(location) = &event.location {
            self.text("LOCATION", location);
        }
        if let Some(url) = &event.url {
            self.line("URL", url);
        }
        if let Some(organizer) = &event.organizer {
            self.line(
                &format!("ORGANIZER;CN=\"{}\"", organizer.name.replace('"', "'")),
                &format!("mailto:noreply@{host}"),
            );
        }
        self.line("END", "VEVENT");
    }

    fn finish(mut self) -> String {
        self.line("END", "VCALENDAR");
        self.out
    }
}

/// Stable UID for an event.
pub fn event_uid(id: i64, host: &str) -> String {
    format!("event-{id}@{host}")
}

/// A calendar holding a single event.
pub fn render_event(event: &Event, host: &str) -> String {
    render_at(std::slice::from_ref(event), host, None, &Utc::now())
}

/// A named calendar of many events.
pub fn render_calendar(events: &[Event], host: &str, name: &str) -> String {
    render_at(events, host, Some(name), &Utc::now())
}

fn render_at(events: &[Event], host: &str, name: Option<&str>, stamp: &DateTime<Utc>) -> String {
    let mut w = Writer::new();
    w.begin_calendar(name);
    for event in events {
        w.event(event, host, stamp);
    }
    w.finish()
}

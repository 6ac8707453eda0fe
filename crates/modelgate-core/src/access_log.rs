//! Parsing of nginx access-log lines in the default `combined` format.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLine {
    pub remote_addr: String,
    pub time: DateTime<FixedOffset>,
    pub method: String,
    pub uri: String,
    pub status: u16,
}

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(\S+) \S+ \S+ \[([^\]]+)\] "(\S+) (\S+) [^"]*" (\d{3}) \S+"#)
            .expect("access log regex is valid")
    })
}

/// Parse one log line; returns `None` for anything that is not a request line.
pub fn parse_line(line: &str) -> Option<AccessLine> {
    let caps = line_regex().captures(line.trim())?;
    let time = DateTime::parse_from_str(&caps[2], "%d/%b/%Y:%H:%M:%S %z").ok()?;
    Some(AccessLine {
        remote_addr: caps[1].to_string(),
        time,
        method: caps[3].to_string(),
        uri: caps[4].to_string(),
        status: caps[5].parse().ok()?,
    })
}

/// First path segment of `uri`, which is the model name for proxied traffic.
pub fn model_segment(uri: &str) -> Option<&str> {
    let path = uri.split(['?', '#']).next()?;
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
}

use crate::strategy::Directives;
use chrono::{DateTime, Utc};
use std::fmt;

/// Header timestamp, in the style of `date -u`.
const TIMESTAMP_FORMAT: &str = "%a %b %e %H:%M:%S UTC %Y";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

/// First line of every generated file.
#[derive(Clone, Debug, PartialEq)]
pub struct HeaderComment {
    pub host_name: String,
    pub tool_name: String,
    pub tool_url: String,
    pub generated_at: String,
}

impl fmt::Display for HeaderComment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "# DO NOT EDIT - Generated for {} by {} ({}) on {}",
            self.host_name, self.tool_name, self.tool_url, self.generated_at
        )
    }
}

/// Header, then the lines sorted by their full text, then the trailer.
///
/// ATS uses the first matching `dest_domain`, so the catch-all trailer must stay last.
pub fn render(header: &HeaderComment, directives: Directives) -> String {
    let Directives { mut lines, trailer } = directives;
    lines.sort();

    let mut text = format!("{header}\n");
    for line in lines.iter().chain(trailer.iter()) {
        text.push_str(line);
        text.push('\n');
    }
    text
}

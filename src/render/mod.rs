//! Trace presentation.
//!
//! Pure formatting of a [`TraceRecord`] for the inspection UI, as a JSON
//! object with a fixed field set or as an HTML fragment. Captured bytes, URI
//! and method are untrusted and are escaped for the target format.

use std::borrow::Cow;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::storage::record::{TracePayload, TraceRecord};

/// Long timestamp used inside a rendered trace.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f UTC";

/// Short timestamp used in listings.
pub const STAMP_FORMAT: &str = "%b %e %H:%M:%S";

/// Rendered in place of a value that was never set.
pub const EMPTY_MARKER: &str = "-";

/// Rendered in HTML in place of an absent payload.
pub const EMPTY_PAYLOAD_HTML: &str = "<em>(empty)</em>";

/// JSON shape of a trace. Field names are part of the public interface.
#[derive(Debug, Serialize)]
pub struct TraceView<'a> {
    pub id: &'a str,
    #[serde(rename = "Method")]
    pub method: &'a str,
    #[serde(rename = "URI")]
    pub uri: &'a str,
    #[serde(rename = "Status")]
    pub status: u16,
    #[serde(rename = "Duration")]
    pub duration: String,
    #[serde(rename = "Started at")]
    pub started_at: String,
    #[serde(rename = "Completed at")]
    pub completed_at: String,
    #[serde(rename = "ResponseLength")]
    pub response_length: u64,
    #[serde(rename = "Incoming")]
    pub incoming: Option<Cow<'a, str>>,
    #[serde(rename = "Outgoing")]
    pub outgoing: Option<Cow<'a, str>>,
}

impl<'a> From<&'a TraceRecord> for TraceView<'a> {
    fn from(trace: &'a TraceRecord) -> Self {
        Self {
            id: &trace.id,
            method: &trace.http_method,
            uri: &trace.uri,
            status: trace.http_status,
            duration: format_duration(trace.duration()),
            started_at: format_timestamp(trace.start),
            completed_at: trace
                .end
                .map_or_else(|| EMPTY_MARKER.to_string(), format_timestamp),
            response_length: trace.length,
            incoming: trace.ingress.as_ref().map(TracePayload::as_text),
            outgoing: trace.egress.as_ref().map(TracePayload::as_text),
        }
    }
}

/// Render a trace as a JSON object. Absent payloads become `null`.
pub fn render_json(trace: &TraceRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&TraceView::from(trace))
}

/// Render a trace as one labeled paragraph per field.
pub fn render_html(trace: &TraceRecord) -> String {
    let mut out = String::new();
    let mut line = |label: &str, value: &str| {
        out.push_str("<p>");
        out.push_str(label);
        out.push_str(" : ");
        out.push_str(value);
        out.push_str("</p>\n");
    };

    line("ID", &escape_html(&trace.id));
    line("Method", &escape_html(&trace.http_method));
    line("URI", &escape_html(&trace.uri));
    line("Status", &trace.http_status.to_string());
    line("Duration", &format_duration(trace.duration()));
    line("Started at", &format_timestamp(trace.start));
    line(
        "Completed at",
        &trace
            .end
            .map_or_else(|| EMPTY_MARKER.to_string(), format_timestamp),
    );
    line("Outgoing size", &format!("{} bytes", trace.length));
    line("Incoming", &payload_html(trace.ingress.as_ref()));
    line("Outgoing", &payload_html(trace.egress.as_ref()));

    out
}

fn payload_html(payload: Option<&TracePayload>) -> String {
    match payload {
        Some(payload) => format!("<pre>{}</pre>", escape_html(&payload.as_text())),
        None => EMPTY_PAYLOAD_HTML.to_string(),
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_stamp(at: DateTime<Utc>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

/// Milliseconds with microsecond precision, e.g. `12.345ms`.
pub fn format_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => {
            let micros = d.num_microseconds().unwrap_or(i64::MAX);
            format!("{}.{:03}ms", micros / 1000, (micros % 1000).abs())
        }
        None => EMPTY_MARKER.to_string(),
    }
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Value;

    fn sample() -> TraceRecord {
        let start = Utc.with_ymd_and_hms(2024, 3, 9, 8, 7, 6).unwrap();
        let mut trace = TraceRecord::started_at("2024-03-09T08:07:06.000000000Z-0000000000", start);
        trace.http_method = "GET".into();
        trace.uri = "/search?q=<script>&x=\"1\"".into();
        trace.http_status = 418;
        trace.length = 27;
        trace.ingress = Some(TracePayload::new(b"{\"k\": \"v\"}".to_vec()));
        trace.egress = Some(TracePayload::new(b"<b>tea</b> & 'biscuits'".to_vec()));
        trace.finish(start + Duration::microseconds(12_345));
        trace
    }

    #[test]
    fn test_json_fields() {
        let json: Value = serde_json::from_str(&render_json(&sample()).unwrap()).unwrap();
        assert_eq!(json["id"], "2024-03-09T08:07:06.000000000Z-0000000000");
        assert_eq!(json["Method"], "GET");
        assert_eq!(json["URI"], "/search?q=<script>&x=\"1\"");
        assert_eq!(json["Status"], 418);
        assert_eq!(json["Duration"], "12.345ms");
        assert_eq!(json["Started at"], "2024-03-09 08:07:06.000 UTC");
        assert_eq!(json["Completed at"], "2024-03-09 08:07:06.012 UTC");
        assert_eq!(json["ResponseLength"], 27);
        assert_eq!(json["Incoming"], "{\"k\": \"v\"}");
        assert_eq!(json["Outgoing"], "<b>tea</b> & 'biscuits'");
    }

    #[test]
    fn test_json_field_order() {
        let rendered = render_json(&sample()).unwrap();
        let keys = [
            "\"id\"", "\"Method\"", "\"URI\"", "\"Status\"", "\"Duration\"",
            "\"Started at\"", "\"Completed at\"", "\"ResponseLength\"", "\"Incoming\"", "\"Outgoing\"",
        ];
        let positions: Vec<usize> = keys.iter().map(|k| rendered.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_absent_payloads() {
        let mut trace = sample();
        trace.ingress = None;
        trace.egress = None;
        trace.end = None;

        let json: Value = serde_json::from_str(&render_json(&trace).unwrap()).unwrap();
        assert!(json["Incoming"].is_null());
        assert!(json["Outgoing"].is_null());
        assert_eq!(json["Duration"], "-");
        assert_eq!(json["Completed at"], "-");

        let html = render_html(&trace);
        assert!(html.contains("<p>Incoming : <em>(empty)</em></p>"));
        assert!(html.contains("<p>Outgoing : <em>(empty)</em></p>"));
    }

    #[test]
    fn test_html_order_and_escaping() {
        let html = render_html(&sample());
        let labels = [
            "<p>ID :", "<p>Method :", "<p>URI :", "<p>Status :", "<p>Duration :",
            "<p>Started at :", "<p>Completed at :", "<p>Outgoing size :", "<p>Incoming :", "<p>Outgoing :",
        ];
        let positions: Vec<usize> = labels.iter().map(|l| html.find(l).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        assert!(html.contains("<p>URI : /search?q=&lt;script&gt;&amp;x=&quot;1&quot;</p>"));
        assert!(html.contains("&lt;b&gt;tea&lt;/b&gt; &amp; &#x27;biscuits&#x27;"));
        assert!(html.contains("<p>Outgoing size : 27 bytes</p>"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_escape_html_borrows_clean_text() {
        assert!(matches!(escape_html("plain"), Cow::Borrowed("plain")));
        assert_eq!(escape_html("a<b"), "a&lt;b");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Some(Duration::milliseconds(1500))), "1500.000ms");
        assert_eq!(format_duration(Some(Duration::microseconds(7))), "0.007ms");
        assert_eq!(format_duration(None), "-");
    }
}

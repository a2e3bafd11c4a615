//! Query + render surface over the trace store.
//!
//! Every function writes into a caller-supplied sink and reports what it
//! wrote; absence and read failures become markers in the sink, never errors.
//! The only error is the sink itself failing.

use std::fmt::{self, Write};

use crate::render::{escape_html, format_stamp, render_html, render_json};
use crate::storage::{StoreError, TraceRecord, TraceStore};

pub const NO_TRAFFIC: &str = "<p>No traffic so far</p>";
pub const NOT_FOUND: &str = "<p>No traffic capture found</p>";
pub const UNREADABLE: &str = "<p>Cannot read traffic data</p>";

/// What a display call emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayOutcome {
    /// Trace or listing written.
    Rendered,
    /// The "no capture" marker was written.
    NotFound,
    /// The "cannot read" marker was written.
    Unreadable,
}

/// Listing of up to `max` newest traces followed by a `count/total` line.
///
/// The "no traffic" marker is reserved for an empty store; a page that shows
/// nothing (`max == 0`, unreadable records) still reports the total.
pub fn display_latest<W: Write>(
    store: &TraceStore,
    sink: &mut W,
    route_prefix: &str,
    max: usize,
) -> Result<DisplayOutcome, fmt::Error> {
    let latest = match store.latest(max) {
        Ok(latest) => latest,
        Err(e) => {
            tracing::error!(route = %route_prefix, error = %e, "Cannot list traces");
            sink.write_str(UNREADABLE)?;
            return Ok(DisplayOutcome::Unreadable);
        }
    };

    if latest.total == 0 {
        sink.write_str(NO_TRAFFIC)?;
        return Ok(DisplayOutcome::Rendered);
    }

    for trace in &latest.traces {
        listing_line(sink, route_prefix, trace)?;
    }
    write!(sink, "<p>{}/{} traces</p>", latest.traces.len(), latest.total)?;
    Ok(DisplayOutcome::Rendered)
}

fn listing_line<W: Write>(sink: &mut W, route_prefix: &str, trace: &TraceRecord) -> fmt::Result {
    let id = escape_html(&trace.id);
    writeln!(
        sink,
        "<p>{} {} <a href=\"{}/{}\">{}</a> {} {}</p>",
        format_stamp(trace.start),
        escape_html(&trace.http_method),
        escape_html(route_prefix),
        id,
        id,
        trace.http_status,
        escape_html(&trace.uri),
    )
}

pub fn display_first<W: Write>(
    store: &TraceStore,
    sink: &mut W,
    route_prefix: &str,
) -> Result<DisplayOutcome, fmt::Error> {
    emit_json(sink, route_prefix, "first", store.first())
}

pub fn display_last<W: Write>(
    store: &TraceStore,
    sink: &mut W,
    route_prefix: &str,
) -> Result<DisplayOutcome, fmt::Error> {
    emit_json(sink, route_prefix, "last", store.last())
}

/// The trace after `from_id`, which need not itself exist.
pub fn display_next<W: Write>(
    store: &TraceStore,
    sink: &mut W,
    route_prefix: &str,
    from_id: &str,
) -> Result<DisplayOutcome, fmt::Error> {
    emit_json(sink, route_prefix, "next", store.next(from_id))
}

/// The trace before `from_id`, which need not itself exist.
pub fn display_prev<W: Write>(
    store: &TraceStore,
    sink: &mut W,
    route_prefix: &str,
    from_id: &str,
) -> Result<DisplayOutcome, fmt::Error> {
    emit_json(sink, route_prefix, "prev", store.prev(from_id))
}

/// One trace as HTML, with links to its neighbors.
pub fn display_trace<W: Write>(
    store: &TraceStore,
    sink: &mut W,
    route_prefix: &str,
    id: &str,
) -> Result<DisplayOutcome, fmt::Error> {
    match store.get(id) {
        Ok(Some(trace)) => {
            sink.write_str(&render_html(&trace))?;
            let prefix = escape_html(route_prefix);
            let id = escape_html(&trace.id);
            writeln!(
                sink,
                "<p><a href=\"{prefix}/{id}/prev\">prev</a> <a href=\"{prefix}\">latest</a> <a href=\"{prefix}/{id}/next\">next</a></p>"
            )?;
            Ok(DisplayOutcome::Rendered)
        }
        Ok(None) => {
            sink.write_str(NOT_FOUND)?;
            Ok(DisplayOutcome::NotFound)
        }
        Err(e) => {
            tracing::warn!(route = %route_prefix, trace_id = %id, error = %e, "Cannot read trace");
            sink.write_str(UNREADABLE)?;
            Ok(DisplayOutcome::Unreadable)
        }
    }
}

fn emit_json<W: Write>(
    sink: &mut W,
    route_prefix: &str,
    query: &'static str,
    lookup: Result<Option<TraceRecord>, StoreError>,
) -> Result<DisplayOutcome, fmt::Error> {
    let trace = match lookup {
        Ok(Some(trace)) => trace,
        Ok(None) => {
            tracing::debug!(route = %route_prefix, query, "No trace to display");
            sink.write_str(NOT_FOUND)?;
            return Ok(DisplayOutcome::NotFound);
        }
        Err(e) => {
            tracing::error!(route = %route_prefix, query, error = %e, "Cannot read traces");
            sink.write_str(UNREADABLE)?;
            return Ok(DisplayOutcome::Unreadable);
        }
    };

    match render_json(&trace) {
        Ok(json) => {
            sink.write_str(&json)?;
            Ok(DisplayOutcome::Rendered)
        }
        Err(e) => {
            tracing::warn!(trace_id = %trace.id, error = %e, "Cannot encode trace");
            sink.write_str(UNREADABLE)?;
            Ok(DisplayOutcome::Unreadable)
        }
    }
}

//! Event (beat time) lists.

use crate::error::{FormatError, Result};
use std::io::Write;
use std::path::Path;

/// Write one event time per line with millisecond precision.
pub fn write_events(events: &[f64], writer: &mut impl Write) -> Result<()> {
    for event in events {
        writeln!(writer, "{event:.3}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Parse event times from text, taking the first column of every line.
///
/// Blank lines and `#` comments are skipped.
pub fn parse_events(text: &str) -> Result<Vec<f64>> {
    let mut events = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        let Some(first) = line.split_whitespace().next() else {
            continue;
        };

        let event = first.parse::<f64>().map_err(|_| FormatError::Parse {
            line: index + 1,
            value: first.to_string(),
        })?;
        events.push(event);
    }

    Ok(events)
}

/// Load event times from a text file.
pub fn load_events<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let events = parse_events(&text)?;

    tracing::debug!(path = %path.as_ref().display(), events = events.len(), "events loaded");

    Ok(events)
}

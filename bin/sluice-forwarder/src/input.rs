use std::borrow::Cow;

use serde::Deserialize;
use sluice_forward::Record;

#[derive(Deserialize)]
struct EventHeader<'a> {
    #[serde(borrow)]
    event_type: Cow<'a, str>,
}

/// An event read from a single line of input.
///
/// Only the `event_type` field is looked at. The payload is the line exactly as it was read, minus any line terminator.
pub struct LineEvent<'a> {
    event_type: Cow<'a, str>,
    line: &'a str,
}

impl<'a> LineEvent<'a> {
    /// Parses a line of input.
    ///
    /// Returns `Ok(None)` for blank lines.
    ///
    /// # Errors
    ///
    /// If the line is not a JSON object with a string `event_type` field, an error is returned.
    pub fn parse(line: &'a str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(None);
        }

        let header: EventHeader<'a> = serde_json::from_str(line)?;
        Ok(Some(Self {
            event_type: header.event_type,
            line,
        }))
    }
}

impl Record for LineEvent<'_> {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn payload(&self) -> &[u8] {
        self.line.as_bytes()
    }
}

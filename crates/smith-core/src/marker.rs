use serde_json::Value;

/// Result of scanning script output for a `<MARKER><json>` line.
#[derive(Clone, Debug, PartialEq)]
pub enum MarkerLine {
    /// No line starts with the marker: no structured result available.
    Absent,
    Json(Value),
    /// A marker line exists but its payload is not valid JSON.
    Malformed { line: String, error: String },
}

impl MarkerLine {
    pub fn json(self) -> Option<Value> {
        match self {
            MarkerLine::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Locate the first line starting with `marker` and parse the remainder as JSON.
pub fn extract_marker(output: &str, marker: &str) -> MarkerLine {
    let Some(line) = output.lines().map(str::trim_start).find(|l| l.starts_with(marker)) else {
        return MarkerLine::Absent;
    };
    let payload = line[marker.len()..].trim();
    match serde_json::from_str::<Value>(payload) {
        Ok(v) => MarkerLine::Json(v),
        Err(e) => MarkerLine::Malformed {
            line: line.to_string(),
            error: e.to_string(),
        },
    }
}

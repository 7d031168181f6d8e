use serde_json::Value;

use crate::backend::LlmBackend;
use crate::error::OracleError;
use crate::prompt::{OutputSchema, Prompt};
use crate::CodeOracle;

const FIXER_SYSTEM: &str = "You repair malformed machine-readable replies. \
Return ONLY a single JSON object that satisfies the given JSON Schema. \
Keep the original content wherever it is valid; do not add commentary.";

/// [`CodeOracle`] over a raw text backend.
///
/// Code replies have markdown fences removed. Structured replies are parsed
/// as JSON and checked against the schema; a reply that fails is sent to a
/// fixer prompt, at most `repair_attempts` times.
pub struct StructuredOracle<B> {
    backend: B,
    repair_attempts: u32,
}

impl<B: LlmBackend> StructuredOracle<B> {
    pub fn new(backend: B, repair_attempts: u32) -> Self {
        Self { backend, repair_attempts }
    }

    fn parse_against(reply: &str, schema: &OutputSchema) -> Result<Value, String> {
        let value = extract_json(reply).ok_or_else(|| "reply contains no JSON object".to_string())?;
        match schema.check(&value) {
            None => Ok(value),
            Some(problem) => Err(problem),
        }
    }
}

impl<B: LlmBackend> CodeOracle for StructuredOracle<B> {
    fn generate_code(&self, prompt: &Prompt) -> Result<String, OracleError> {
        tracing::debug!(purpose = %prompt.purpose, "oracle code request");
        let reply = self.backend.complete(&prompt.system, &prompt.user_text())?;
        let code = strip_code_fences(&reply);
        if code.trim().is_empty() {
            return Err(OracleError::Empty);
        }
        Ok(code)
    }

    fn generate_json(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value, OracleError> {
        tracing::debug!(purpose = %prompt.purpose, schema = schema.name, "oracle structured request");
        let schema_text = serde_json::to_string_pretty(&schema.schema).unwrap_or_default();
        let user = format!(
            "{}## Output format\n\nReply with a single JSON object matching this JSON Schema:\n{}\n",
            prompt.user_text(),
            schema_text
        );
        let mut reply = self.backend.complete(&prompt.system, &user)?;

        let mut attempt = 0;
        loop {
            match Self::parse_against(&reply, schema) {
                Ok(v) => return Ok(v),
                Err(problem) if attempt >= self.repair_attempts => {
                    return Err(OracleError::Schema { schema: schema.name.to_string(), message: problem });
                }
                Err(problem) => {
                    attempt += 1;
                    tracing::warn!(schema = schema.name, attempt, %problem, "repairing structured reply");
                    let fix = format!(
                        "## JSON Schema\n\n{schema_text}\n\n## Problem\n\n{problem}\n\n## Reply to repair\n\n{reply}\n"
                    );
                    reply = self.backend.complete(FIXER_SYSTEM, &fix)?;
                }
            }
        }
    }
}

/// Body of the first fenced block, or the whole reply when unfenced.
pub fn strip_code_fences(reply: &str) -> String {
    let Some(start) = reply.find("```") else {
        return reply.trim().to_string();
    };
    let after_open = &reply[start + 3..];
    // Skip the info string (`python`, `py`, ...) up to the end of the fence line.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
    let body = &after_open[body_start..];
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    let mut s = body.trim_end().to_string();
    s.push('\n');
    s
}

/// First JSON object found in `reply`: the whole text, a fenced block, or the
/// outermost `{ ... }` span.
pub fn extract_json(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    if trimmed.contains("```") {
        if let Ok(v) = serde_json::from_str::<Value>(strip_code_fences(trimmed).trim()) {
            return Some(v);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}

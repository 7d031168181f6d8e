//! Code-generation oracle: the collaborator that writes scripts and answers
//! structured questions.
//!
//! Callers see [`CodeOracle`]; replies are either raw code or JSON already
//! checked against an [`OutputSchema`]. Structural self-repair lives in
//! [`StructuredOracle`] so the orchestration code never has to retry a
//! malformed reply itself.

pub mod backend;
pub mod error;
pub mod prompt;
pub mod scripted;
pub mod structured;

pub use backend::*;
pub use error::*;
pub use prompt::*;
pub use scripted::*;
pub use structured::*;

use serde::de::DeserializeOwned;

pub trait CodeOracle: Send + Sync {
    /// Free-text generation; the reply is the script body.
    fn generate_code(&self, prompt: &Prompt) -> Result<String, OracleError>;

    /// Structured generation; the reply satisfies `schema`'s required keys.
    fn generate_json(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<serde_json::Value, OracleError>;
}

/// Structured call decoded into `T`.
pub fn ask<T: DeserializeOwned>(oracle: &dyn CodeOracle, prompt: &Prompt, schema: &OutputSchema) -> Result<T, OracleError> {
    let value = oracle.generate_json(prompt, schema)?;
    serde_json::from_value(value).map_err(|e| OracleError::Schema {
        schema: schema.name.to_string(),
        message: e.to_string(),
    })
}

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::OracleError;
use crate::prompt::{OutputSchema, Prompt, Purpose};
use crate::CodeOracle;

/// One canned oracle reply.
#[derive(Clone, Debug, PartialEq)]
pub enum Scripted {
    Text(String),
    Json(Value),
    Fail(OracleError),
}

/// Oracle answering from per-purpose queues. For tests.
///
/// Each call pops the purpose's queue; an empty queue falls back to the
/// purpose's fallback reply, and without one the call fails with
/// [`OracleError::Backend`]. Every prompt is recorded.
#[derive(Default)]
pub struct ScriptedOracle {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    queued: HashMap<Purpose, VecDeque<Scripted>>,
    fallbacks: HashMap<Purpose, Scripted>,
    calls: Vec<Prompt>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, purpose: Purpose, reply: Scripted) -> &Self {
        self.inner.lock().unwrap().queued.entry(purpose).or_default().push_back(reply);
        self
    }

    pub fn push_code(&self, purpose: Purpose, code: &str) -> &Self {
        self.push(purpose, Scripted::Text(code.to_string()))
    }

    pub fn push_json(&self, purpose: Purpose, value: Value) -> &Self {
        self.push(purpose, Scripted::Json(value))
    }

    pub fn fallback(&self, purpose: Purpose, reply: Scripted) -> &Self {
        self.inner.lock().unwrap().fallbacks.insert(purpose, reply);
        self
    }

    pub fn calls(&self) -> Vec<Prompt> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, purpose: Purpose) -> Vec<Prompt> {
        self.inner.lock().unwrap().calls.iter().filter(|p| p.purpose == purpose).cloned().collect()
    }

    pub fn remaining(&self, purpose: Purpose) -> usize {
        self.inner.lock().unwrap().queued.get(&purpose).map_or(0, |q| q.len())
    }

    fn next(&self, prompt: &Prompt) -> Result<Scripted, OracleError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(prompt.clone());
        if let Some(reply) = inner.queued.get_mut(&prompt.purpose).and_then(|q| q.pop_front()) {
            return Ok(reply);
        }
        inner
            .fallbacks
            .get(&prompt.purpose)
            .cloned()
            .ok_or_else(|| OracleError::Backend(format!("no scripted reply for {}", prompt.purpose)))
    }
}

impl CodeOracle for ScriptedOracle {
    fn generate_code(&self, prompt: &Prompt) -> Result<String, OracleError> {
        match self.next(prompt)? {
            Scripted::Text(code) => Ok(code),
            Scripted::Json(v) => Ok(v.to_string()),
            Scripted::Fail(e) => Err(e),
        }
    }

    fn generate_json(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value, OracleError> {
        let value = match self.next(prompt)? {
            Scripted::Json(v) => v,
            Scripted::Text(t) => serde_json::from_str(&t).map_err(|e| OracleError::Schema {
                schema: schema.name.to_string(),
                message: e.to_string(),
            })?,
            Scripted::Fail(e) => return Err(e),
        };
        match schema.check(&value) {
            None => Ok(value),
            Some(message) => Err(OracleError::Schema { schema: schema.name.to_string(), message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queue_then_fallback_then_error() {
        let oracle = ScriptedOracle::new();
        oracle
            .push_code(Purpose::ModelCode, "v1")
            .fallback(Purpose::ModelCode, Scripted::Text("v-default".into()));
        let p = Prompt::new(Purpose::ModelCode, "sys");
        assert_eq!(oracle.generate_code(&p).unwrap(), "v1");
        assert_eq!(oracle.generate_code(&p).unwrap(), "v-default");
        let t = Prompt::new(Purpose::TestScript, "sys");
        assert!(matches!(oracle.generate_code(&t), Err(OracleError::Backend(_))));
        assert_eq!(oracle.calls_for(Purpose::ModelCode).len(), 2);
        assert_eq!(oracle.calls().len(), 3);
    }

    #[test]
    fn json_replies_are_schema_checked() {
        let oracle = ScriptedOracle::new();
        oracle.push_json(Purpose::Triage, json!({"culprit": "MODEL"}));
        let schema = OutputSchema::new("triage", json!({"required": ["culprit", "confidence"]}));
        let err = oracle.generate_json(&Prompt::new(Purpose::Triage, "s"), &schema).unwrap_err();
        assert!(matches!(err, OracleError::Schema { .. }));
    }
}

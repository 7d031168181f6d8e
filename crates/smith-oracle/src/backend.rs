use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use smith_runtime::run_with_timeout;

use crate::error::OracleError;

/// Raw text completion: system instructions + user text in, reply text out.
pub trait LlmBackend: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> Result<String, OracleError>;
}

/// Runs an LLM command-line client. The prompt goes to stdin, the reply is
/// read from stdout.
#[derive(Clone, Debug)]
pub struct CommandBackend {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandBackend {
    pub fn new(argv: &[String], timeout: Duration) -> Result<Self, OracleError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| OracleError::Backend("oracle command is empty".to_string()))?;
        Ok(Self { program: program.clone(), args: args.to_vec(), timeout })
    }
}

impl LlmBackend for CommandBackend {
    fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        let input = format!("{system}\n\n{user}");
        let out = run_with_timeout(cmd, Some(input.as_bytes()), self.timeout)
            .map_err(|e| OracleError::Backend(format!("failed to execute {}: {e}", self.program)))?;
        if out.timed_out {
            return Err(OracleError::Timeout(self.timeout));
        }
        if out.exit_code != Some(0) {
            return Err(OracleError::Backend(format!(
                "{} exited with {:?}: {}",
                self.program,
                out.exit_code,
                out.stderr.trim()
            )));
        }
        let reply = out.stdout.trim().to_string();
        if reply.is_empty() {
            return Err(OracleError::Empty);
        }
        Ok(reply)
    }
}

/// OpenAI-compatible chat-completions endpoint.
pub struct HttpBackend {
    client: reqwest::blocking::Client,
    pub endpoint: String,
    pub model: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Backend(format!("http client: {e}")))?;
        Ok(Self { client, endpoint: endpoint.into(), model: model.into(), api_key, timeout })
    }
}

impl LlmBackend for HttpBackend {
    fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(self.timeout)
            } else {
                OracleError::Backend(format!("request to {}: {e}", self.endpoint))
            }
        })?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(OracleError::Backend(format!("{} returned {status}: {}", self.endpoint, text.trim())));
        }
        let parsed: ChatResponse = resp
            .json()
            .map_err(|e| OracleError::Backend(format!("decode chat response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(OracleError::Empty)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn command_backend_pipes_prompt_through() {
        let backend = CommandBackend::new(&["cat".to_string()], Duration::from_secs(10)).unwrap();
        let reply = backend.complete("system text", "user text").unwrap();
        assert_eq!(reply, "system text\n\nuser text");
    }

    #[test]
    fn command_backend_surfaces_failures() {
        let argv = vec!["sh".to_string(), "-c".to_string(), "echo nope 1>&2; exit 4".to_string()];
        let backend = CommandBackend::new(&argv, Duration::from_secs(10)).unwrap();
        match backend.complete("s", "u").unwrap_err() {
            OracleError::Backend(msg) => assert!(msg.contains("nope")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandBackend::new(&[], Duration::from_secs(1)).is_err());
    }
}

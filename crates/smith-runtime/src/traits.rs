use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Outcome of one script or installer invocation.
///
/// `output` is stdout and stderr interleaved in arrival order; it is the text
/// fed back to the oracle. The split streams are kept for artifacts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Successful outcome whose stdout (and combined output) is `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        Self { exit_code: 0, output: stdout.clone(), stdout, stderr: String::new(), timed_out: false }
    }

    /// Failed outcome whose stderr (and combined output) is `stderr`.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        Self { exit_code, output: stderr.clone(), stdout: String::new(), stderr, timed_out: false }
    }
}

/// Scripting runtime the generated programs run in.
pub trait ScriptRuntime: Send + Sync {
    /// File extension of generated scripts, without the dot.
    fn script_ext(&self) -> &str;

    /// Run `file_name` inside `work_dir`, blocking until exit or `timeout`.
    ///
    /// `Err` means the runtime itself could not be started; a script that
    /// runs and fails is an `Ok` with a non-zero exit code.
    fn run_script(&self, work_dir: &Path, file_name: &str, timeout: Duration) -> Result<ExecOutcome>;

    /// Install packages with the runtime's package installer.
    fn install(&self, packages: &[String], timeout: Duration) -> Result<ExecOutcome>;
}

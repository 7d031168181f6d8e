use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::process::{run_with_timeout, ProcessOutput};
use crate::traits::{ExecOutcome, ScriptRuntime};

/// Python scripting runtime. Interpreters are tried in order; one that cannot
/// be found falls through to the next.
#[derive(Clone, Debug)]
pub struct PythonRuntime {
    pub interpreters: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for PythonRuntime {
    fn default() -> Self {
        Self::new(vec!["python3".to_string(), "python".to_string()])
    }
}

impl PythonRuntime {
    pub fn new(interpreters: Vec<String>) -> Self {
        let mut env = BTreeMap::new();
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        Self { interpreters, env }
    }

    /// First interpreter that answers `--version`, with its version line.
    pub fn resolve_interpreter(&self) -> Result<(String, String)> {
        for interp in &self.interpreters {
            let mut cmd = Command::new(interp);
            cmd.arg("--version");
            match run_with_timeout(cmd, None, Duration::from_secs(20)) {
                Ok(out) if out.exit_code == Some(0) => {
                    return Ok((interp.clone(), out.combined.trim().to_string()));
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("probe {interp}")),
            }
        }
        Err(anyhow!("no python interpreter found among {:?}", self.interpreters))
    }

    fn run_with_fallback(&self, cwd: Option<&Path>, args: &[String], timeout: Duration) -> Result<ExecOutcome> {
        for interp in &self.interpreters {
            let mut cmd = Command::new(interp);
            cmd.args(args).envs(self.env.iter());
            if let Some(dir) = cwd {
                cmd.current_dir(dir);
            }
            match run_with_timeout(cmd, None, timeout) {
                Ok(out) => return Ok(to_outcome(out, timeout)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(interpreter = %interp, "interpreter not found, trying next");
                    continue;
                }
                Err(e) => return Err(e).with_context(|| format!("spawn {interp} {:?}", args)),
            }
        }
        Err(anyhow!("no python interpreter found among {:?}", self.interpreters))
    }
}

fn to_outcome(out: ProcessOutput, timeout: Duration) -> ExecOutcome {
    let mut combined = out.combined;
    if out.timed_out {
        combined.push_str(&format!("\n[mlsmith] process killed after {}s timeout\n", timeout.as_secs()));
    }
    ExecOutcome {
        exit_code: out.exit_code.unwrap_or(-1),
        output: combined,
        stdout: out.stdout,
        stderr: out.stderr,
        timed_out: out.timed_out,
    }
}

impl ScriptRuntime for PythonRuntime {
    fn script_ext(&self) -> &str {
        "py"
    }

    fn run_script(&self, work_dir: &Path, file_name: &str, timeout: Duration) -> Result<ExecOutcome> {
        self.run_with_fallback(Some(work_dir), &[file_name.to_string()], timeout)
    }

    fn install(&self, packages: &[String], timeout: Duration) -> Result<ExecOutcome> {
        if packages.is_empty() {
            return Ok(ExecOutcome::ok(""));
        }
        let mut args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "--disable-pip-version-check".to_string(),
        ];
        args.extend(packages.iter().cloned());
        self.run_with_fallback(None, &args, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_interpreters_are_an_error() {
        let rt = PythonRuntime::new(vec!["definitely-not-a-python-1".into(), "definitely-not-a-python-2".into()]);
        let dir = tempfile::tempdir().unwrap();
        let err = rt.run_script(dir.path(), "x.py", Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("no python interpreter"));
    }

    #[cfg(unix)]
    #[test]
    fn falls_back_to_next_interpreter() {
        // `sh` stands in for an interpreter: it runs the file it is given.
        let rt = PythonRuntime::new(vec!["definitely-not-a-python".into(), "sh".into()]);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("job.sh"), "echo from-script\nexit 2\n").unwrap();
        let out = rt.run_script(dir.path(), "job.sh", Duration::from_secs(10)).unwrap();
        assert_eq!(out.exit_code, 2);
        assert!(out.output.contains("from-script"));
        assert!(!out.success());
    }

    #[test]
    fn empty_install_is_a_noop() {
        let rt = PythonRuntime::new(vec!["definitely-not-a-python".into()]);
        assert!(rt.install(&[], Duration::from_secs(1)).unwrap().success());
    }
}

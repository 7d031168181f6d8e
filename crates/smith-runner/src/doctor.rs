use std::path::Path;

use smith_runtime::PythonRuntime;

use crate::Config;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self { name, ok: true, detail: detail.into() }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self { name, ok: false, detail: detail.into() }
    }
}

pub fn doctor(project_root: &Path, cfg: &Config) -> Vec<DoctorCheck> {
    vec![check_interpreter(cfg), check_oracle(cfg), check_runs_root(project_root, cfg)]
}

fn check_interpreter(cfg: &Config) -> DoctorCheck {
    match PythonRuntime::new(cfg.runtime.interpreters.clone()).resolve_interpreter() {
        Ok((interp, version)) => DoctorCheck::pass("interpreter", format!("{interp}: {version}")),
        Err(e) => DoctorCheck::fail("interpreter", format!("{e:#}")),
    }
}

fn check_oracle(cfg: &Config) -> DoctorCheck {
    let oracle = &cfg.oracle;
    match oracle.backend.as_str() {
        "command" => {
            let Some(program) = oracle.command.first() else {
                return DoctorCheck::fail("oracle", "oracle.command is empty");
            };
            match find_on_path(program) {
                Some(path) => DoctorCheck::pass("oracle", format!("command backend: {}", path.display())),
                None => DoctorCheck::fail("oracle", format!("`{program}` not found on PATH")),
            }
        }
        "http" => {
            let Some(endpoint) = oracle.endpoint.as_deref().filter(|e| !e.is_empty()) else {
                return DoctorCheck::fail("oracle", "oracle.endpoint is not set");
            };
            match oracle.api_key_env.as_deref() {
                Some(var) if std::env::var_os(var).is_none() => {
                    DoctorCheck::fail("oracle", format!("API key variable {var} is not set"))
                }
                _ => DoctorCheck::pass("oracle", format!("http backend: {endpoint}")),
            }
        }
        other => DoctorCheck::fail("oracle", format!("unknown oracle backend `{other}` (expected command or http)")),
    }
}

fn check_runs_root(project_root: &Path, cfg: &Config) -> DoctorCheck {
    let root = cfg.runs_root(project_root);
    let probe = root.join(".doctor-probe");
    let result = std::fs::create_dir_all(&root)
        .and_then(|_| std::fs::write(&probe, b"ok"))
        .and_then(|_| std::fs::remove_file(&probe));
    match result {
        Ok(()) => DoctorCheck::pass("runs_root", root.display().to_string()),
        Err(e) => DoctorCheck::fail("runs_root", format!("{} is not writable: {e}", root.display())),
    }
}

fn find_on_path(program: &str) -> Option<std::path::PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).map(|dir| dir.join(program)).find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reports_each_check() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::default_for_project("p");
        cfg.runtime.interpreters = vec!["definitely-not-a-python".into()];
        cfg.oracle.command = vec!["definitely-not-an-llm-cli".into()];
        let checks = doctor(dir.path(), &cfg);
        let by_name = |n: &str| checks.iter().find(|c| c.name == n).unwrap().clone();
        assert!(!by_name("interpreter").ok);
        assert!(!by_name("oracle").ok);
        assert!(by_name("runs_root").ok);
        assert!(dir.path().join(".mlsmith/runs").is_dir());
    }

    #[test]
    fn http_backend_needs_its_key() {
        let mut cfg = Config::default_for_project("p");
        cfg.oracle.backend = "http".into();
        cfg.oracle.api_key_env = Some("MLSMITH_DOCTOR_TEST_KEY_THAT_IS_UNSET".into());
        assert!(!check_oracle(&cfg).ok);
        cfg.oracle.api_key_env = None;
        assert!(check_oracle(&cfg).ok);
    }

    #[cfg(unix)]
    #[test]
    fn finds_programs_on_path() {
        assert!(find_on_path("sh").is_some());
        assert!(find_on_path("/definitely/not/here").is_none());
    }
}

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use smith_core::{DependencyPlan, PipelineError};
use smith_oracle::{ask, CodeOracle};
use smith_runtime::ScriptRuntime;

use crate::prompts;

/// Hard upper bound on one dependency plan; a configured cap can only lower it.
pub const MAX_DEPENDENCY_PLAN: usize = 15;

/// Packages installed during one pipeline run. Append-only; shared by every
/// candidate and stage of the run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstalledSet {
    packages: BTreeSet<String>,
}

impl InstalledSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, package: &str) -> bool {
        self.packages.contains(&package_key(package))
    }

    pub fn record(&mut self, package: &str) {
        self.packages.insert(package_key(package));
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }
}

/// Distribution name without version specifier, lowercased, `_` folded to `-`.
pub fn package_key(spec: &str) -> String {
    let name = spec.trim().split(|c: char| "=<>!~;[ ".contains(c)).next().unwrap_or_default();
    name.to_lowercase().replace('_', "-")
}

const IMPORT_TO_DIST: &[(&str, &str)] = &[
    ("sklearn", "scikit-learn"),
    ("skimage", "scikit-image"),
    ("cv2", "opencv-python"),
    ("PIL", "pillow"),
    ("yaml", "pyyaml"),
    ("bs4", "beautifulsoup4"),
    ("dateutil", "python-dateutil"),
    ("dotenv", "python-dotenv"),
    ("Crypto", "pycryptodome"),
];

const STDLIB: &[&str] = &[
    "abc", "argparse", "array", "ast", "asyncio", "base64", "bisect", "collections", "concurrent", "contextlib",
    "copy", "csv", "dataclasses", "datetime", "decimal", "enum", "functools", "gc", "glob", "gzip", "hashlib",
    "heapq", "inspect", "io", "itertools", "json", "logging", "math", "multiprocessing", "operator", "os",
    "pathlib", "pickle", "platform", "pprint", "queue", "random", "re", "shutil", "signal", "statistics",
    "string", "struct", "subprocess", "sys", "tempfile", "textwrap", "threading", "time", "timeit", "traceback",
    "typing", "unittest", "uuid", "warnings", "zipfile",
];

pub fn is_stdlib(package: &str) -> bool {
    let key = package_key(package);
    STDLIB.iter().any(|m| *m == key)
}

static MISSING_MODULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"No module named ['"]?([A-Za-z_][A-Za-z0-9_.]*)['"]?"#).expect("Invalid missing-module regex")
});

/// Install candidates read straight off `No module named 'x'` lines, mapped
/// from import names to distribution names.
pub fn missing_module_hints(output: &str) -> Vec<String> {
    let mut hints = vec![];
    for cap in MISSING_MODULE.captures_iter(output) {
        let module = cap[1].split('.').next().unwrap_or_default();
        if module.is_empty() || module == "model" || module == "test" {
            continue;
        }
        let dist = IMPORT_TO_DIST
            .iter()
            .find(|(import, _)| *import == module)
            .map(|(_, dist)| dist.to_string())
            .unwrap_or_else(|| module.to_string());
        if !hints.contains(&dist) {
            hints.push(dist);
        }
    }
    hints
}

/// Hints first, then planned packages; dropping stdlib names, duplicates and
/// anything already installed, then capping at `cap` (never above
/// [`MAX_DEPENDENCY_PLAN`]).
pub fn merge_plan(hints: &[String], planned: &[String], installed: &InstalledSet, cap: usize) -> Vec<String> {
    let cap = cap.min(MAX_DEPENDENCY_PLAN);
    let mut seen = BTreeSet::new();
    let mut out = vec![];
    for pkg in hints.iter().chain(planned) {
        if out.len() >= cap {
            break;
        }
        let pkg = pkg.trim();
        let key = package_key(pkg);
        if key.is_empty() || is_stdlib(pkg) || installed.contains(pkg) || !seen.insert(key) {
            continue;
        }
        out.push(pkg.to_string());
    }
    out
}

/// What a dependency pass did.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    NothingToInstall,
    Installed(Vec<String>),
    InstallFailed(PipelineError),
}

pub struct DependencyResolver<'a> {
    pub oracle: &'a dyn CodeOracle,
    pub runtime: &'a dyn ScriptRuntime,
    pub max_plan: usize,
    pub install_timeout: Duration,
}

impl DependencyResolver<'_> {
    /// Packages to install for a failing run. An oracle failure degrades to
    /// the output hints alone.
    pub fn plan(&self, installed: &InstalledSet, model_code: &str, test_code: &str, output: &str) -> DependencyPlan {
        let hints = missing_module_hints(output);
        let prompt = prompts::dependencies(model_code, test_code, output);
        let (planned, rationale) = match ask::<DependencyPlan>(self.oracle, &prompt, &prompts::dependency_schema()) {
            Ok(plan) => (plan.packages, plan.rationale),
            Err(e) => {
                tracing::warn!(error = %e, "dependency inference failed; using output hints only");
                (vec![], String::new())
            }
        };
        DependencyPlan { packages: merge_plan(&hints, &planned, installed, self.max_plan), rationale }
    }

    /// Install whatever of `packages` is not yet in `installed`.
    pub fn ensure(&self, installed: &mut InstalledSet, packages: &[String]) -> Resolution {
        let wanted = merge_plan(&[], packages, installed, self.max_plan);
        if wanted.is_empty() {
            return Resolution::NothingToInstall;
        }
        tracing::info!(packages = ?wanted, "installing packages");
        let message = match self.runtime.install(&wanted, self.install_timeout) {
            Ok(out) if out.success() => {
                for pkg in &wanted {
                    installed.record(pkg);
                }
                return Resolution::Installed(wanted);
            }
            Ok(out) => {
                tracing::warn!(exit_code = out.exit_code, "package install failed");
                prompts::tail(out.output.trim(), 2000)
            }
            Err(e) => format!("{e:#}"),
        };
        Resolution::InstallFailed(PipelineError::DependencyInstallFailure { packages: wanted, message })
    }

    /// Infer and install after a failing run.
    pub fn resolve(&self, installed: &mut InstalledSet, model_code: &str, test_code: &str, output: &str) -> Resolution {
        let plan = self.plan(installed, model_code, test_code, output);
        if plan.is_empty() {
            return Resolution::NothingToInstall;
        }
        self.ensure(installed, &plan.packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use smith_oracle::{Purpose, Scripted, ScriptedOracle};
    use smith_runtime::ScriptedRuntime;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hints_map_import_names() {
        let out = "Traceback...\nModuleNotFoundError: No module named 'sklearn'\nNo module named 'xgboost.core'\n";
        assert_eq!(missing_module_hints(out), strings(&["scikit-learn", "xgboost"]));
        assert!(missing_module_hints("No module named 'model'").is_empty());
    }

    #[test]
    fn merge_filters_dedups_and_caps() {
        let mut installed = InstalledSet::new();
        installed.record("numpy");
        let planned = strings(&["os", "NumPy", "lightgbm", "LightGBM==4.0", "catboost", "xgboost"]);
        let merged = merge_plan(&strings(&["xgboost"]), &planned, &installed, 3);
        assert_eq!(merged, strings(&["xgboost", "lightgbm", "catboost"]));
        let many: Vec<String> = (0..40).map(|i| format!("pkg{i}")).collect();
        assert_eq!(merge_plan(&[], &many, &installed, 15).len(), 15);
    }

    #[test]
    fn configured_cap_cannot_exceed_the_plan_limit() {
        let many: Vec<String> = (0..40).map(|i| format!("pkg{i}")).collect();
        let oracle = ScriptedOracle::new();
        oracle.fallback(Purpose::Dependencies, Scripted::Json(json!({"packages": many, "rationale": ""})));
        let runtime = ScriptedRuntime::new();
        let resolver = DependencyResolver {
            oracle: &oracle,
            runtime: &runtime,
            max_plan: 40,
            install_timeout: Duration::from_secs(1),
        };
        match resolver.resolve(&mut InstalledSet::new(), "m", "t", "ImportError") {
            Resolution::Installed(packages) => {
                assert_eq!(packages.len(), MAX_DEPENDENCY_PLAN);
                assert_eq!(packages[0], "pkg0");
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
        assert_eq!(merge_plan(&[], &many, &InstalledSet::new(), 0).len(), 0);
    }

    #[test]
    fn never_installs_the_same_package_twice() {
        let oracle = ScriptedOracle::new();
        oracle.fallback(Purpose::Dependencies, Scripted::Json(json!({"packages": ["xgboost"], "rationale": ""})));
        let runtime = ScriptedRuntime::new();
        let resolver = DependencyResolver {
            oracle: &oracle,
            runtime: &runtime,
            max_plan: 15,
            install_timeout: Duration::from_secs(1),
        };
        let mut installed = InstalledSet::new();
        let out = "ModuleNotFoundError: No module named 'xgboost'";
        assert_eq!(resolver.resolve(&mut installed, "m", "t", out), Resolution::Installed(strings(&["xgboost"])));
        assert_eq!(resolver.resolve(&mut installed, "m2", "t2", out), Resolution::NothingToInstall);
        assert_eq!(runtime.installs(), vec![strings(&["xgboost"])]);
    }

    #[test]
    fn install_failure_is_reported_not_recorded() {
        let oracle = ScriptedOracle::new();
        let runtime = ScriptedRuntime::new();
        runtime.fail_install_of("nosuchpkg", "No matching distribution found for nosuchpkg");
        let resolver = DependencyResolver {
            oracle: &oracle,
            runtime: &runtime,
            max_plan: 15,
            install_timeout: Duration::from_secs(1),
        };
        let mut installed = InstalledSet::new();
        match resolver.ensure(&mut installed, &strings(&["nosuchpkg"])) {
            Resolution::InstallFailed(PipelineError::DependencyInstallFailure { packages, message }) => {
                assert_eq!(packages, strings(&["nosuchpkg"]));
                assert!(message.contains("No matching distribution"));
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
        assert!(installed.is_empty());
    }

    #[test]
    fn oracle_failure_falls_back_to_hints() {
        let oracle = ScriptedOracle::new();
        let runtime = ScriptedRuntime::new();
        let resolver = DependencyResolver {
            oracle: &oracle,
            runtime: &runtime,
            max_plan: 15,
            install_timeout: Duration::from_secs(1),
        };
        let plan = resolver.plan(&InstalledSet::new(), "", "", "No module named 'cv2'");
        assert_eq!(plan.packages, strings(&["opencv-python"]));
    }
}

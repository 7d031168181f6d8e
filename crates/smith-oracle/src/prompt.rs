use serde_json::Value;
use smith_core::StageKind;

/// What a prompt is for. Used for logging and by the scripted test oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Purpose {
    ModelFamily,
    ConcreteModels,
    TestScript,
    TestFix,
    ModelCode,
    Triage,
    Dependencies,
    Stage(StageKind),
    Report,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::ModelFamily => "model_family",
            Purpose::ConcreteModels => "concrete_models",
            Purpose::TestScript => "test_script",
            Purpose::TestFix => "test_fix",
            Purpose::ModelCode => "model_code",
            Purpose::Triage => "triage",
            Purpose::Dependencies => "dependencies",
            Purpose::Stage(stage) => stage.as_str(),
            Purpose::Report => "report",
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System instructions plus titled context sections.
#[derive(Clone, Debug, PartialEq)]
pub struct Prompt {
    pub purpose: Purpose,
    pub system: String,
    pub sections: Vec<(String, String)>,
}

impl Prompt {
    pub fn new(purpose: Purpose, system: impl Into<String>) -> Self {
        Self { purpose, system: system.into(), sections: vec![] }
    }

    pub fn section(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.sections.push((title.into(), body.into()));
        self
    }

    /// Adds the section only when `body` is present and non-empty.
    pub fn optional_section(self, title: impl Into<String>, body: Option<&str>) -> Self {
        match body {
            Some(b) if !b.trim().is_empty() => self.section(title, b),
            _ => self,
        }
    }

    pub fn user_text(&self) -> String {
        let mut s = String::new();
        for (title, body) in &self.sections {
            s.push_str(&format!("## {}\n\n{}\n\n", title, body.trim_end()));
        }
        s
    }

    pub fn section_body(&self, title: &str) -> Option<&str> {
        self.sections.iter().find(|(t, _)| t == title).map(|(_, b)| b.as_str())
    }
}

/// Declared shape of a structured reply (JSON Schema subset).
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(name: &'static str, schema: Value) -> Self {
        Self { name, schema }
    }

    pub fn required_keys(&self) -> Vec<&str> {
        self.schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|keys| keys.iter().filter_map(|k| k.as_str()).collect())
            .unwrap_or_default()
    }

    /// Problems with `value` against the schema's top-level shape, if any.
    pub fn check(&self, value: &Value) -> Option<String> {
        let Some(obj) = value.as_object() else {
            return Some("reply must be a JSON object".to_string());
        };
        let missing: Vec<&str> = self.required_keys().into_iter().filter(|k| !obj.contains_key(*k)).collect();
        if missing.is_empty() {
            None
        } else {
            Some(format!("missing required keys: {}", missing.join(", ")))
        }
    }
}

use crate::target::Target;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The resolved build description for one project, as handed over by the
/// configure-time front-end. Targets appear in definition order; output
/// ordering follows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,

    /// Top-level source directory (project root).
    pub source_dir: PathBuf,

    /// Top-level build directory.
    pub build_dir: PathBuf,

    /// Active single-config build type; `Release` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Configurations for the multi-config variant.
    #[serde(default)]
    pub configurations: Vec<String>,

    #[serde(default)]
    pub targets: Vec<Target>,

    /// Cache-variable snapshot: compiler ids and paths, user overrides,
    /// `CROSSCOMPILING`, `NIX_EXPLICIT_SOURCES`, ...
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Build-script files that configured this project, for the
    /// external-project usage check.
    #[serde(default)]
    pub list_files: Vec<PathBuf>,

    /// Additional system path prefixes beyond the built-in defaults.
    #[serde(default)]
    pub system_prefixes: Vec<String>,
}

impl Project {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse target model")
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read target model {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(|s| s.as_str())
    }

    /// Variable interpreted as a boolean, CMake style.
    pub fn variable_on(&self, name: &str) -> bool {
        match self.variable(name) {
            Some(v) => {
                let v = v.to_ascii_uppercase();
                v == "1" || v == "ON" || v == "TRUE" || v == "YES" || v == "Y"
            }
            None => false,
        }
    }

    /// The active build configuration, defaulting to `Release`.
    pub fn build_config(&self) -> &str {
        self.config.as_deref().unwrap_or("Release")
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Language, SourceFile};
    use crate::target::{LinkItem, TargetKind};

    fn sample_json() -> &'static str {
        r#"{
            "name": "hello",
            "source_dir": "/src/hello",
            "build_dir": "/src/hello/build",
            "targets": [
                {
                    "name": "hello",
                    "kind": "executable",
                    "sources": [ { "path": "/src/hello/main.c", "language": "C" } ],
                    "link_items": [ { "library": "m" } ]
                }
            ],
            "variables": { "CMAKE_C_COMPILER_ID": "GNU" }
        }"#
    }

    #[test]
    fn test_from_json() {
        let project = Project::from_json(sample_json()).unwrap();
        assert_eq!(project.name, "hello");
        assert_eq!(project.build_config(), "Release");
        assert_eq!(project.targets.len(), 1);

        let target = project.target("hello").unwrap();
        assert_eq!(target.kind, TargetKind::Executable);
        assert_eq!(target.link_items[0], LinkItem::Library("m".to_string()));
        assert_eq!(project.variable("CMAKE_C_COMPILER_ID"), Some("GNU"));
    }

    #[test]
    fn test_roundtrip() {
        let mut project = Project::from_json(sample_json()).unwrap();
        project.targets[0]
            .sources
            .push(SourceFile::new("/src/hello/util.c", Language::C));

        let json = serde_json::to_string(&project).unwrap();
        let again = Project::from_json(&json).unwrap();
        assert_eq!(again.targets[0].sources.len(), 2);
        assert_eq!(again.targets[0].sources[1].language, Language::C);
    }

    #[test]
    fn test_variable_on() {
        let mut project = Project::from_json(sample_json()).unwrap();
        assert!(!project.variable_on("CROSSCOMPILING"));
        project
            .variables
            .insert("CROSSCOMPILING".to_string(), "ON".to_string());
        assert!(project.variable_on("CROSSCOMPILING"));
    }

    #[test]
    fn test_explicit_config() {
        let mut project = Project::from_json(sample_json()).unwrap();
        project.config = Some("Debug".to_string());
        assert_eq!(project.build_config(), "Debug");
    }
}

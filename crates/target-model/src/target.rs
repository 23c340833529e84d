use crate::command::CustomCommand;
use crate::install::InstallRule;
use crate::source::{Language, SourceFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Kind of build artifact a target produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    Executable,
    StaticLibrary,
    SharedLibrary,
    ModuleLibrary,
    ObjectLibrary,
}

impl TargetKind {
    /// Targets that get a link derivation of their own.
    pub fn is_linkable(&self) -> bool {
        !matches!(self, TargetKind::ObjectLibrary)
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, TargetKind::SharedLibrary | TargetKind::ModuleLibrary)
    }
}

/// One entry of a target's link implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkItem {
    /// Another target in the same project, by name.
    Target(String),
    /// An imported target such as `ZLIB::ZLIB`, resolved via the package
    /// mapper.
    Package(String),
    /// A raw library string (`m`, `ssl`, or a path).
    Library(String),
}

/// Precompiled-header configuration for one language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PchConfig {
    pub header: PathBuf,
    pub source: PathBuf,

    #[serde(default)]
    pub archs: Vec<String>,

    /// Compile options for the translation unit that creates the PCH.
    #[serde(default)]
    pub create_options: Vec<String>,

    /// Compile options for translation units consuming the PCH.
    #[serde(default)]
    pub use_options: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// A named build artifact. Constructed by the front-end; the backend
/// only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub kind: TargetKind,

    #[serde(default)]
    pub sources: Vec<SourceFile>,

    /// Per-configuration source overrides (multi-config projects).
    #[serde(default)]
    pub per_config_sources: BTreeMap<String, Vec<SourceFile>>,

    /// Ordered link implementation.
    #[serde(default)]
    pub link_items: Vec<LinkItem>,

    /// Per-language compile flags.
    #[serde(default)]
    pub compile_flags: BTreeMap<String, Vec<String>>,

    /// Per-language preprocessor defines (without the `-D`).
    #[serde(default)]
    pub defines: BTreeMap<String, Vec<String>>,

    /// Per-language include directories.
    #[serde(default)]
    pub include_dirs: BTreeMap<String, Vec<String>>,

    /// Language features such as `C_STANDARD` / `CXX_STANDARD`.
    #[serde(default)]
    pub features: BTreeMap<String, String>,

    /// Free-form target properties (`VERSION`, `SOVERSION`, `UNITY_BUILD`,
    /// `PRECOMPILE_HEADERS`, ...).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    #[serde(default)]
    pub install_rules: Vec<InstallRule>,

    #[serde(default)]
    pub pre_build: Vec<CustomCommand>,
    #[serde(default)]
    pub pre_link: Vec<CustomCommand>,
    #[serde(default)]
    pub post_build: Vec<CustomCommand>,

    /// Per-language precompiled-header setup.
    #[serde(default)]
    pub pch: BTreeMap<String, PchConfig>,
}

impl Target {
    pub fn new<S: Into<String>>(name: S, kind: TargetKind) -> Self {
        Target {
            name: name.into(),
            kind,
            sources: Vec::new(),
            per_config_sources: BTreeMap::new(),
            link_items: Vec::new(),
            compile_flags: BTreeMap::new(),
            defines: BTreeMap::new(),
            include_dirs: BTreeMap::new(),
            features: BTreeMap::new(),
            properties: BTreeMap::new(),
            install_rules: Vec::new(),
            pre_build: Vec::new(),
            pre_link: Vec::new(),
            post_build: Vec::new(),
            pch: BTreeMap::new(),
        }
    }

    pub fn sources(&self, config: &str) -> &[SourceFile] {
        self.per_config_sources
            .get(config)
            .map(|v| v.as_slice())
            .unwrap_or(&self.sources)
    }

    pub fn link_items(&self, _config: &str) -> &[LinkItem] {
        &self.link_items
    }

    pub fn compile_flags(&self, lang: Language, _config: &str) -> &[String] {
        self.compile_flags
            .get(lang.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn defines(&self, lang: Language, _config: &str) -> &[String] {
        self.defines
            .get(lang.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn include_dirs(&self, lang: Language, _config: &str) -> &[String] {
        self.include_dirs
            .get(lang.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn feature(&self, name: &str, _config: &str) -> Option<&str> {
        self.features.get(name).map(|s| s.as_str())
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(|s| s.as_str())
    }

    /// Property interpreted as a boolean, CMake style.
    pub fn property_bool(&self, name: &str) -> bool {
        match self.property(name) {
            Some(v) => {
                let v = v.to_ascii_uppercase();
                v == "1" || v == "ON" || v == "TRUE" || v == "YES" || v == "Y"
            }
            None => false,
        }
    }

    pub fn pch_config(&self, lang: Language) -> Option<&PchConfig> {
        self.pch.get(lang.as_str())
    }

    pub fn pch_archs(&self, _config: &str, lang: Language) -> &[String] {
        self.pch_config(lang).map(|p| p.archs.as_slice()).unwrap_or(&[])
    }

    pub fn pch_source(&self, _config: &str, lang: Language, _arch: &str) -> Option<&PathBuf> {
        self.pch_config(lang).map(|p| &p.source)
    }

    pub fn pch_header(&self, _config: &str, lang: Language, _arch: &str) -> Option<&PathBuf> {
        self.pch_config(lang).map(|p| &p.header)
    }

    pub fn pch_file(&self, _config: &str, lang: Language, _arch: &str) -> Option<&PathBuf> {
        self.pch_config(lang).and_then(|p| p.file.as_ref())
    }

    /// Every PCH source across all languages, used to exclude them from
    /// link object lists.
    pub fn pch_sources(&self) -> Vec<&PathBuf> {
        self.pch.values().map(|p| &p.source).collect()
    }

    pub fn has_install_rules(&self) -> bool {
        !self.install_rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&TargetKind::StaticLibrary).unwrap(),
            "\"static-library\""
        );
        let kind: TargetKind = serde_json::from_str("\"shared-library\"").unwrap();
        assert_eq!(kind, TargetKind::SharedLibrary);
    }

    #[test]
    fn test_link_item_serde() {
        let items: Vec<LinkItem> = serde_json::from_str(
            r#"[ { "target": "core" }, { "package": "ZLIB::ZLIB" }, { "library": "m" } ]"#,
        )
        .unwrap();
        assert_eq!(items[0], LinkItem::Target("core".to_string()));
        assert_eq!(items[1], LinkItem::Package("ZLIB::ZLIB".to_string()));
        assert_eq!(items[2], LinkItem::Library("m".to_string()));
    }

    #[test]
    fn test_per_config_sources_fallback() {
        let mut target = Target::new("app", TargetKind::Executable);
        target
            .sources
            .push(SourceFile::new("main.c", Language::C));
        assert_eq!(target.sources("Release").len(), 1);

        target.per_config_sources.insert(
            "Debug".to_string(),
            vec![
                SourceFile::new("main.c", Language::C),
                SourceFile::new("debug_hooks.c", Language::C),
            ],
        );
        assert_eq!(target.sources("Debug").len(), 2);
        assert_eq!(target.sources("Release").len(), 1);
    }

    #[test]
    fn test_property_bool() {
        let mut target = Target::new("lib", TargetKind::StaticLibrary);
        target
            .properties
            .insert("UNITY_BUILD".to_string(), "ON".to_string());
        assert!(target.property_bool("UNITY_BUILD"));
        assert!(!target.property_bool("PRECOMPILE_HEADERS"));

        target
            .properties
            .insert("UNITY_BUILD".to_string(), "0".to_string());
        assert!(!target.property_bool("UNITY_BUILD"));
    }

    #[test]
    fn test_language_scoped_accessors() {
        let mut target = Target::new("app", TargetKind::Executable);
        target
            .compile_flags
            .insert("CXX".to_string(), vec!["-Wall".to_string()]);
        target
            .defines
            .insert("CXX".to_string(), vec!["FOO=1".to_string()]);

        assert_eq!(target.compile_flags(Language::Cxx, "Release"), ["-Wall"]);
        assert!(target.compile_flags(Language::C, "Release").is_empty());
        assert_eq!(target.defines(Language::Cxx, "Release"), ["FOO=1"]);
    }
}

use crate::cache::CacheManager;
use crate::paths;
use nix_expr::{sanitize_identifier, NixWriter};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use target_model::prelude::Project;

/// Classification of a source file's header dependencies. Paths in
/// `existing` and `generated` are project-root-relative; config-time and
/// external entries stay absolute because they need staging.
#[derive(Debug, Default, Clone)]
pub struct ClassifiedHeaders {
    /// Present on disk inside the project; go into the fileset.
    pub existing: Vec<String>,
    /// Project-local but produced during the build; fileset entries with
    /// maybe-missing semantics.
    pub generated: Vec<String>,
    /// Exist in the build directory at generation time; their contents
    /// get embedded into a composite source.
    pub config_time: Vec<PathBuf>,
    /// Resolve outside project and build roots without being system
    /// paths; served from a shared header derivation.
    pub external: Vec<PathBuf>,
}

/// Sort each source file's headers into the buckets the source
/// composition step consumes. System headers are dropped: the Nix
/// toolchain provides them.
pub fn classify_headers(project: &Project, headers: &[PathBuf]) -> ClassifiedHeaders {
    let mut result = ClassifiedHeaders::default();
    let source_dir = &project.source_dir;
    let build_dir = &project.build_dir;

    for header in headers {
        let absolute = if header.is_absolute() {
            header.clone()
        } else {
            source_dir.join(header)
        };
        let resolved = paths::resolve_to_real_path(&absolute);

        if paths::is_system_path(&resolved, &project.system_prefixes) {
            continue;
        }

        if let Some(rel_to_build) = paths::relative_to(&resolved, build_dir) {
            if !paths::is_outside_tree(&rel_to_build) {
                if resolved.is_file() {
                    result.config_time.push(resolved);
                } else {
                    result.generated.push(rel_to_build.display().to_string());
                }
                continue;
            }
        }

        if let Some(rel) = paths::relative_to(&resolved, source_dir) {
            if !paths::is_outside_tree(&rel) {
                let rel = rel.display().to_string();
                if resolved.is_file() {
                    result.existing.push(rel);
                } else {
                    result.generated.push(rel);
                }
                continue;
            }
        }

        result.external.push(resolved);
    }

    result
}

#[derive(Debug, Clone)]
struct HeaderDerivation {
    name: String,
    headers: Vec<PathBuf>,
}

/// Registry of shared external-header derivations, one per source
/// directory. Every translation unit whose source lives in a directory
/// shares that directory's derivation.
#[derive(Default)]
pub struct HeaderRegistry {
    by_dir: Mutex<BTreeMap<PathBuf, HeaderDerivation>>,
    by_source: Mutex<HashMap<PathBuf, String>>,
}

impl HeaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derivation name serving `headers` for sources under `source_dir`,
    /// creating or extending the directory's derivation. `name_suffix`
    /// keeps names distinct across configuration families.
    pub fn get_or_create(
        &self,
        cache: &CacheManager,
        source_dir: &Path,
        headers: &[PathBuf],
        name_suffix: &str,
    ) -> String {
        let mut by_dir = self.by_dir.lock().expect("header registry mutex");

        if let Some(existing) = by_dir.get_mut(source_dir) {
            for header in headers {
                if !existing.headers.contains(header) {
                    existing.headers.push(header.clone());
                }
            }
            return existing.name.clone();
        }

        let safe = sanitize_identifier(&source_dir.display().to_string());
        let safe = safe.trim_matches('_');
        let base = if safe.is_empty() {
            format!("headers{name_suffix}")
        } else {
            format!("headers_{safe}{name_suffix}")
        };
        let name = cache.unique_name(&base);

        by_dir.insert(
            source_dir.to_path_buf(),
            HeaderDerivation {
                name: name.clone(),
                headers: headers.to_vec(),
            },
        );
        name
    }

    pub fn set_source_derivation(&self, source: &Path, derivation: &str) {
        self.by_source
            .lock()
            .expect("header registry mutex")
            .insert(source.to_path_buf(), derivation.to_string());
    }

    pub fn source_derivation(&self, source: &Path) -> Option<String> {
        self.by_source
            .lock()
            .expect("header registry mutex")
            .get(source)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.by_dir.lock().expect("header registry mutex").is_empty()
    }

    /// Emit one derivation per source directory, copying each header
    /// while preserving its directory structure under `$out`.
    pub fn write_derivations(&self, writer: &mut NixWriter) {
        let by_dir = self.by_dir.lock().expect("header registry mutex");
        if by_dir.is_empty() {
            return;
        }

        writer.write_indented_comment(1, "External header derivations");
        for info in by_dir.values() {
            writer.write_indented(1, &format!("{} = stdenv.mkDerivation {{", info.name));
            writer.write_attribute(2, "name", &info.name);
            writer.write_raw_attribute(2, "src", "/.");
            writer.write_raw_attribute(2, "phases", "[ \"unpackPhase\" \"installPhase\" ]");
            writer.start_multiline_attribute(2, "installPhase");
            writer.write_multiline_line(3, "mkdir -p $out");
            for header in &info.headers {
                let dir = header
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                writer.write_multiline_line(3, &format!("mkdir -p \"$out{dir}\""));
                writer.write_multiline_line(
                    3,
                    &format!("cp \"{}\" \"$out{}/\"", header.display(), dir),
                );
            }
            writer.end_multiline_attribute(2);
            writer.write_attribute_bool(2, "dontFixup", true);
            writer.write_indented(1, "};");
            writer.blank_line();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project(source_dir: &Path, build_dir: &Path) -> Project {
        Project::from_json(&format!(
            r#"{{ "name": "p", "source_dir": "{}", "build_dir": "{}" }}"#,
            source_dir.display(),
            build_dir.display()
        ))
        .unwrap()
    }

    #[test]
    fn test_classify_buckets() {
        let src = TempDir::new().unwrap();
        let build = TempDir::new().unwrap();
        let project = project(src.path(), build.path());

        fs::write(src.path().join("real.h"), "").unwrap();
        fs::write(build.path().join("config.h"), "").unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("shared.h"), "").unwrap();

        let headers = vec![
            PathBuf::from("real.h"),
            PathBuf::from("gen.h"),
            build.path().join("config.h"),
            outside.path().join("shared.h"),
            PathBuf::from("/usr/include/stdio.h"),
        ];

        let classified = classify_headers(&project, &headers);
        assert_eq!(classified.existing, ["real.h"]);
        assert_eq!(classified.generated, ["gen.h"]);
        assert_eq!(classified.config_time.len(), 1);
        assert_eq!(classified.external.len(), 1);
        assert!(classified.external[0].ends_with("shared.h"));
    }

    #[test]
    fn test_registry_shares_per_directory() {
        let cache = CacheManager::new();
        let registry = HeaderRegistry::new();

        let first = registry.get_or_create(
            &cache,
            Path::new("/proj/ext"),
            &[PathBuf::from("/outside/a.h")],
            "",
        );
        let second = registry.get_or_create(
            &cache,
            Path::new("/proj/ext"),
            &[PathBuf::from("/outside/b.h")],
            "",
        );
        assert_eq!(first, second);

        let other = registry.get_or_create(
            &cache,
            Path::new("/proj/other"),
            &[PathBuf::from("/outside/a.h")],
            "",
        );
        assert_ne!(first, other);
    }

    #[test]
    fn test_registry_source_mapping() {
        let registry = HeaderRegistry::new();
        let source = Path::new("/proj/ext/src.c");
        assert!(registry.source_derivation(source).is_none());
        registry.set_source_derivation(source, "headers_outside");
        assert_eq!(
            registry.source_derivation(source).as_deref(),
            Some("headers_outside")
        );
    }

    #[test]
    fn test_write_derivations() {
        let cache = CacheManager::new();
        let registry = HeaderRegistry::new();
        registry.get_or_create(
            &cache,
            Path::new("/proj/ext"),
            &[PathBuf::from("/outside/include/shared.h")],
            "",
        );

        let mut writer = NixWriter::new();
        registry.write_derivations(&mut writer);
        let out = writer.into_string();

        assert!(out.contains("headers_proj_ext = stdenv.mkDerivation {"));
        assert!(out.contains("mkdir -p \"$out/outside/include\""));
        assert!(out.contains("cp \"/outside/include/shared.h\" \"$out/outside/include/\""));
        assert!(out.contains("dontFixup = true;"));
    }

    #[test]
    fn test_empty_registry_writes_nothing() {
        let registry = HeaderRegistry::new();
        let mut writer = NixWriter::new();
        registry.write_derivations(&mut writer);
        assert!(writer.into_string().is_empty());
    }
}

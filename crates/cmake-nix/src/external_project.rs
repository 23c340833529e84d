use crate::diag::Diagnostics;
use regex::Regex;
use std::path::{Path, PathBuf};
use target_model::prelude::Project;
use walkdir::WalkDir;

const EXTERNAL_PROJECT_WARNING: &str = "ExternalProject_Add is incompatible with the Nix backend.\n\
ExternalProject downloads dependencies at build time, which conflicts with Nix's pure build model.\n\
Alternatives:\n\
  1. Pre-fetch dependencies and add them to the Nix store\n\
  2. Use find_package() with Nix-provided packages\n\
  3. Include dependencies as Git submodules\n\
  4. Create pkg_<Package>.nix files for external dependencies\n\
Generation continues, but builds may fail when ExternalProject tries to download content.";

const FETCH_CONTENT_WARNING: &str = "FetchContent is incompatible with the Nix backend.\n\
FetchContent downloads dependencies at configure time, which conflicts with Nix's pure build model.\n\
Alternatives:\n\
  1. Pre-fetch dependencies and add them to the Nix store\n\
  2. Use find_package() with Nix-provided packages\n\
  3. Include dependencies as Git submodules\n\
  4. Create pkg_<Package>.nix files for external dependencies";

/// Warn when the project's build scripts pull in source-time fetching
/// modules. Never fatal: the expression is still written and the user
/// resolves the downloads externally.
pub fn check_for_external_project_usage(project: &Project, diag: &Diagnostics) {
    let pattern =
        Regex::new(r"include\s*\(\s*(ExternalProject|FetchContent)\s*\)").expect("valid pattern");

    let files = if project.list_files.is_empty() {
        discover_list_files(&project.source_dir)
    } else {
        project.list_files.clone()
    };

    let mut has_external_project = false;
    let mut has_fetch_content = false;

    for file in files {
        let Ok(contents) = std::fs::read_to_string(&file) else {
            continue;
        };
        for caps in pattern.captures_iter(&contents) {
            match &caps[1] {
                "ExternalProject" => has_external_project = true,
                "FetchContent" => has_fetch_content = true,
                _ => {}
            }
        }
    }

    if has_external_project {
        diag.warning(EXTERNAL_PROJECT_WARNING);
    }
    if has_fetch_content {
        diag.warning(FETCH_CONTENT_WARNING);
    }
}

/// Fallback when the front-end did not hand over its script list: a
/// shallow walk for CMakeLists.txt and *.cmake files.
fn discover_list_files(source_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(source_dir)
        .max_depth(4)
        .sort_by_file_name()
        .into_iter()
        .flatten()
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name == "CMakeLists.txt" || name.ends_with(".cmake") {
            files.push(entry.into_path());
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project_with_script(dir: &TempDir, contents: &str) -> Project {
        let script = dir.path().join("CMakeLists.txt");
        fs::write(&script, contents).unwrap();

        let mut project = Project::from_json(&format!(
            r#"{{ "name": "p", "source_dir": "{}", "build_dir": "{}" }}"#,
            dir.path().display(),
            dir.path().display()
        ))
        .unwrap();
        project.list_files.push(script);
        project
    }

    #[test]
    fn test_external_project_warns() {
        let dir = TempDir::new().unwrap();
        let project = project_with_script(&dir, "include(ExternalProject)\nproject(x)\n");
        let diag = Diagnostics::new();

        check_for_external_project_usage(&project, &diag);
        let warnings = diag.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("ExternalProject_Add is incompatible"));
    }

    #[test]
    fn test_fetch_content_warns_with_spacing() {
        let dir = TempDir::new().unwrap();
        let project = project_with_script(&dir, "include( FetchContent )\n");
        let diag = Diagnostics::new();

        check_for_external_project_usage(&project, &diag);
        assert!(diag.warnings()[0].contains("FetchContent is incompatible"));
    }

    #[test]
    fn test_clean_project_is_silent() {
        let dir = TempDir::new().unwrap();
        let project = project_with_script(&dir, "project(x)\nadd_executable(x main.c)\n");
        let diag = Diagnostics::new();

        check_for_external_project_usage(&project, &diag);
        assert!(!diag.has_warnings());
    }

    #[test]
    fn test_discovery_without_list_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("cmake")).unwrap();
        fs::write(
            dir.path().join("cmake/deps.cmake"),
            "include(FetchContent)\n",
        )
        .unwrap();

        let project = Project::from_json(&format!(
            r#"{{ "name": "p", "source_dir": "{}", "build_dir": "{}" }}"#,
            dir.path().display(),
            dir.path().display()
        ))
        .unwrap();
        let diag = Diagnostics::new();

        check_for_external_project_usage(&project, &diag);
        assert!(diag.has_warnings());
    }
}

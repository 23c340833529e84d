use std::path::{Component, Path, PathBuf};

/// Filesystem prefixes the Nix toolchain provides on its own; files under
/// them never enter a source set.
static SYSTEM_PREFIXES: &[&str] = &[
    "/usr/",
    "/usr/local/",
    "/opt/",
    "/nix/store/",
    "/System/Library/",
    "/Library/Developer/",
];

/// Collapse `.` and `..` components without touching the filesystem.
pub fn collapse(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) => {}
                _ => parts.push(comp),
            },
            other => parts.push(other),
        }
    }

    let mut result = PathBuf::new();
    for comp in parts {
        result.push(comp.as_os_str());
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}

/// Resolve a path to its real absolute form: collapse dot segments, then
/// follow symlinks when the file exists.
pub fn resolve_to_real_path(path: &Path) -> PathBuf {
    let collapsed = collapse(path);
    std::fs::canonicalize(&collapsed).unwrap_or(collapsed)
}

/// Relative path from `base` to `path`, or `None` when `path` does not
/// live under `base`.
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    collapse(path).strip_prefix(collapse(base)).ok().map(|p| p.to_path_buf())
}

/// True when a computed relative path points outside its tree.
pub fn is_outside_tree(relative: &Path) -> bool {
    relative.as_os_str().is_empty() || relative.starts_with("..")
}

/// True for paths the toolchain supplies (`/usr`, the Nix store, ...).
/// `extra_prefixes` extends the built-in list with user configuration.
pub fn is_system_path(path: &Path, extra_prefixes: &[String]) -> bool {
    let s = path.to_string_lossy();
    SYSTEM_PREFIXES.iter().any(|p| s.starts_with(p))
        || extra_prefixes.iter().any(|p| !p.is_empty() && s.starts_with(p.as_str()))
}

/// Express a path as a Nix source token: project-relative paths become
/// `./...`, everything else stays an absolute string for `builtins.path`.
pub fn normalize_for_nix(path: &Path, project_root: &Path) -> String {
    let resolved = resolve_to_real_path(path);
    match relative_to(&resolved, &resolve_to_real_path(project_root)) {
        Some(rel) if !is_outside_tree(&rel) => {
            if rel.as_os_str() == "." {
                "./.".to_string()
            } else {
                format!("./{}", rel.display())
            }
        }
        _ => resolved.display().to_string(),
    }
}

/// Wrap an absolute path in the Nix builtin that imports paths outside
/// the project tree.
pub fn absolute_to_nix_expr(path: &Path) -> String {
    format!(
        "(builtins.path {{ path = \"{}\"; }})",
        nix_expr::escape_nix_string(&path.to_string_lossy())
    )
}

/// The relative path token from the build directory back to the project
/// source directory, `./.` for in-source builds.
pub fn project_source_rel_path(source_dir: &Path, build_dir: &Path) -> String {
    if source_dir == build_dir {
        return "./.".to_string();
    }
    match relative_to(source_dir, build_dir) {
        Some(rel) if !rel.as_os_str().is_empty() && rel.as_os_str() != "." => {
            format!("./{}", rel.display())
        }
        _ => {
            // Out-of-source build with the source dir not under the build
            // dir: climb with explicit parent segments.
            let mut build = collapse(build_dir);
            let mut ups = PathBuf::new();
            loop {
                if let Some(rel) = relative_to(source_dir, &build) {
                    if !is_outside_tree(&rel) || rel.as_os_str().is_empty() {
                        let mut token = ups;
                        token.push(rel);
                        let token = collapse(&token);
                        if token.as_os_str() == "." {
                            return "./.".to_string();
                        }
                        return format!("./{}", token.display());
                    }
                }
                if !build.pop() {
                    return "./.".to_string();
                }
                ups.push("..");
            }
        }
    }
}

/// Quote a value for POSIX shell.
pub fn shell_escape(value: &str) -> String {
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '.' | '-' | '+'));
    if safe && !value.is_empty() {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

/// Severity of a source-path check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathCheck {
    Ok,
    Warning(String),
    Error(String),
}

/// Validate a source path before it enters a Nix expression. Unescapable
/// characters are fatal; escaping both roots is only worth a warning
/// because compiler ABI probe files legitimately live elsewhere.
pub fn validate_source_path(
    path: &Path,
    project_root: &Path,
    build_root: &Path,
    extra_prefixes: &[String],
) -> PathCheck {
    let s = path.to_string_lossy();
    if s.is_empty() {
        return PathCheck::Error("Empty source file path".to_string());
    }

    if s.contains('"') || s.contains('$') || s.contains('`') || s.contains('\n') || s.contains('\r')
    {
        return PathCheck::Error(format!(
            "Source file path contains characters that may break Nix expressions: {s}"
        ));
    }

    let resolved = resolve_to_real_path(path);
    let in_project = relative_to(&resolved, &resolve_to_real_path(project_root))
        .map(|r| !is_outside_tree(&r))
        .unwrap_or(false);
    let in_build = relative_to(&resolved, &resolve_to_real_path(build_root))
        .map(|r| !is_outside_tree(&r))
        .unwrap_or(false);

    if !in_project && !in_build && !is_system_path(&resolved, extra_prefixes) {
        return PathCheck::Warning(format!(
            "Source file path is outside project directory: {}",
            path.display()
        ));
    }

    PathCheck::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse() {
        assert_eq!(collapse(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
        assert_eq!(collapse(Path::new("a/./b")), PathBuf::from("a/b"));
        assert_eq!(collapse(Path::new("/a/../../b")), PathBuf::from("/b"));
        assert_eq!(collapse(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(collapse(Path::new(".")), PathBuf::from("."));
    }

    #[test]
    fn test_is_outside_tree() {
        assert!(is_outside_tree(Path::new("")));
        assert!(is_outside_tree(Path::new("../other")));
        assert!(!is_outside_tree(Path::new("src/main.c")));
    }

    #[test]
    fn test_is_system_path() {
        assert!(is_system_path(Path::new("/usr/include/stdio.h"), &[]));
        assert!(is_system_path(Path::new("/nix/store/abc-gcc/include/x.h"), &[]));
        assert!(is_system_path(Path::new("/opt/cuda/include/cuda.h"), &[]));
        assert!(!is_system_path(Path::new("/home/u/project/a.h"), &[]));

        let extra = vec!["/custom/sdk/".to_string()];
        assert!(is_system_path(Path::new("/custom/sdk/x.h"), &extra));
    }

    #[test]
    fn test_normalize_for_nix() {
        let root = Path::new("/proj");
        assert_eq!(normalize_for_nix(Path::new("/proj/src/a.c"), root), "./src/a.c");
        assert_eq!(normalize_for_nix(Path::new("/proj"), root), "./.");
        assert_eq!(
            normalize_for_nix(Path::new("/elsewhere/a.c"), root),
            "/elsewhere/a.c"
        );
        assert_eq!(
            normalize_for_nix(Path::new("/proj/src/../inc/b.h"), root),
            "./inc/b.h"
        );
    }

    #[test]
    fn test_absolute_to_nix_expr() {
        assert_eq!(
            absolute_to_nix_expr(Path::new("/outside/include")),
            "(builtins.path { path = \"/outside/include\"; })"
        );
    }

    #[test]
    fn test_project_source_rel_path() {
        let src = Path::new("/proj");
        assert_eq!(project_source_rel_path(src, src), "./.");
        assert_eq!(project_source_rel_path(src, Path::new("/proj/build")), "./..");
        assert_eq!(
            project_source_rel_path(src, Path::new("/proj/build/sub")),
            "./../.."
        );
        // Source nested under the build directory.
        assert_eq!(
            project_source_rel_path(Path::new("/b/src"), Path::new("/b")),
            "./src"
        );
    }

    #[test]
    fn test_validate_source_path() {
        let project = Path::new("/proj");
        let build = Path::new("/proj/build");

        assert_eq!(
            validate_source_path(Path::new("/proj/main.c"), project, build, &[]),
            PathCheck::Ok
        );
        assert!(matches!(
            validate_source_path(Path::new(""), project, build, &[]),
            PathCheck::Error(_)
        ));
        assert!(matches!(
            validate_source_path(Path::new("/proj/bad\"name.c"), project, build, &[]),
            PathCheck::Error(_)
        ));
        assert!(matches!(
            validate_source_path(Path::new("/proj/$(pwd).c"), project, build, &[]),
            PathCheck::Error(_)
        ));
        assert!(matches!(
            validate_source_path(Path::new("/elsewhere/probe.c"), project, build, &[]),
            PathCheck::Warning(_)
        ));
        // System files never warn.
        assert_eq!(
            validate_source_path(Path::new("/usr/share/x.c"), project, build, &[]),
            PathCheck::Ok
        );
    }
}

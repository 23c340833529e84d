use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Regex fallback for `#include` discovery when the compiler scan fails
/// or is unavailable. Resolves quoted and angle includes against the
/// given include directories and the including file's directory.
pub struct IncludeScanner {
    pattern: Regex,
    include_dirs: Vec<PathBuf>,
}

impl IncludeScanner {
    pub fn new<I, P>(include_dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        IncludeScanner {
            pattern: Regex::new(r#"^\s*#\s*include\s*["<]([^">]+)[">]"#)
                .expect("include pattern is valid"),
            include_dirs: include_dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Raw include names as written in the file.
    pub fn include_names(&self, path: &Path) -> std::io::Result<Vec<String>> {
        let file = File::open(path)?;
        let mut names = Vec::new();

        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Some(caps) = self.pattern.captures(&line) {
                names.push(caps[1].to_string());
            }
        }

        Ok(names)
    }

    /// Resolve one include name to an on-disk path, trying the include
    /// directories first and the including file's own directory last.
    pub fn resolve(&self, name: &str, including_file: &Path) -> Option<PathBuf> {
        for dir in &self.include_dirs {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        let sibling = including_file.parent()?.join(name);
        if sibling.is_file() {
            return Some(sibling);
        }

        None
    }

    /// Scan a file and return every include that resolves to a real file.
    /// Unresolvable includes (system headers, generated files not yet on
    /// disk) are silently skipped.
    pub fn scan(&self, path: &Path) -> Vec<PathBuf> {
        let names = match self.include_names(path) {
            Ok(names) => names,
            Err(_) => return Vec::new(),
        };

        names
            .iter()
            .filter_map(|name| self.resolve(name, path))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_include_names() {
        let dir = TempDir::new().unwrap();
        let main = write(
            &dir,
            "main.c",
            "#include <stdio.h>\n#include \"util.h\"\n  #  include \"deep/x.h\"\nint main() {}\n",
        );

        let scanner = IncludeScanner::new(Vec::<PathBuf>::new());
        let names = scanner.include_names(&main).unwrap();
        assert_eq!(names, vec!["stdio.h", "util.h", "deep/x.h"]);
    }

    #[test]
    fn test_scan_resolves_local_headers() {
        let dir = TempDir::new().unwrap();
        write(&dir, "util.h", "#pragma once\n");
        let main = write(&dir, "main.c", "#include \"util.h\"\n#include <stdio.h>\n");

        let scanner = IncludeScanner::new(Vec::<PathBuf>::new());
        let deps = scanner.scan(&main);
        assert_eq!(deps, vec![dir.path().join("util.h")]);
    }

    #[test]
    fn test_include_dirs_take_precedence() {
        let dir = TempDir::new().unwrap();
        write(&dir, "inc/shared.h", "#pragma once\n");
        let main = write(&dir, "src/main.c", "#include \"shared.h\"\n");

        let scanner = IncludeScanner::new(vec![dir.path().join("inc")]);
        let deps = scanner.scan(&main);
        assert_eq!(deps, vec![dir.path().join("inc/shared.h")]);
    }

    #[test]
    fn test_commented_include_still_matches_line_start_only() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.h", "");
        let main = write(&dir, "main.c", "// #include \"a.h\"\n");

        // Leading comment markers keep the line from matching.
        let scanner = IncludeScanner::new(Vec::<PathBuf>::new());
        assert!(scanner.scan(&main).is_empty());
    }
}

use std::path::{Path, PathBuf};

/// Parse make-style dependency output (`object: source header1 ...`).
///
/// Continuation lines end in `\`; everything after the first colon forms
/// the dependency list, minus the scanned file itself.
pub fn parse_make_deps(output: &str, source: &Path) -> Vec<PathBuf> {
    let mut joined = String::with_capacity(output.len());
    for line in output.lines() {
        let line = line.strip_suffix('\\').unwrap_or(line);
        joined.push_str(line);
        joined.push(' ');
    }

    let Some(colon) = joined.find(':') else {
        return Vec::new();
    };

    joined[colon + 1..]
        .split_whitespace()
        .filter(|tok| !tok.is_empty() && Path::new(tok) != source)
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let deps = parse_make_deps("main.o: main.c util.h config.h\n", Path::new("main.c"));
        assert_eq!(deps, vec![PathBuf::from("util.h"), PathBuf::from("config.h")]);
    }

    #[test]
    fn test_continuation_lines() {
        let output = "main.o: main.c \\\n  include/a.h \\\n  include/b.h\n";
        let deps = parse_make_deps(output, Path::new("main.c"));
        assert_eq!(
            deps,
            vec![PathBuf::from("include/a.h"), PathBuf::from("include/b.h")]
        );
    }

    #[test]
    fn test_no_colon() {
        assert!(parse_make_deps("garbage output", Path::new("main.c")).is_empty());
    }

    #[test]
    fn test_source_excluded_by_path() {
        let deps = parse_make_deps("x.o: /src/x.c /src/x.h", Path::new("/src/x.c"));
        assert_eq!(deps, vec![PathBuf::from("/src/x.h")]);
    }

    #[test]
    fn test_no_dependencies() {
        let deps = parse_make_deps("lone.o: lone.c\n", Path::new("lone.c"));
        assert!(deps.is_empty());
    }
}

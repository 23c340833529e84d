use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Write `contents` to `path`, but only touch the file when the contents
/// actually changed. Returns whether a write happened. Keeping the mtime
/// stable lets consumers skip re-evaluation on no-op regenerations.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<bool> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == contents {
            return Ok(false);
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_skip() {
        let dir = std::env::temp_dir().join(format!("nix-expr-test-{}", std::process::id()));
        let path = dir.join("default.nix");

        assert!(write_if_changed(&path, "a = 1;\n").unwrap());
        assert!(!write_if_changed(&path, "a = 1;\n").unwrap());
        assert!(write_if_changed(&path, "a = 2;\n").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "a = 2;\n");

        fs::remove_dir_all(&dir).unwrap();
    }
}

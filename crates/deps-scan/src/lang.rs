/// Languages the scanner can preprocess. Headers are treated as C++ so a
/// single scan covers mixed C/C++ hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScanLang {
    C,
    Cxx,
    Cuda,
}

impl ScanLang {
    /// Classify a file by extension; `None` stops recursion at files the
    /// preprocessor would not understand.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "c" => Some(ScanLang::C),
            "cc" | "cpp" | "cxx" | "C" => Some(ScanLang::Cxx),
            "h" | "hpp" | "hxx" | "hh" | "H" | "h++" | "hp" => Some(ScanLang::Cxx),
            "cu" => Some(ScanLang::Cuda),
            "cuh" => Some(ScanLang::Cuda),
            _ => None,
        }
    }

    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_from_extension() {
        assert_eq!(ScanLang::from_extension("c"), Some(ScanLang::C));
        assert_eq!(ScanLang::from_extension("cpp"), Some(ScanLang::Cxx));
        assert_eq!(ScanLang::from_extension("hpp"), Some(ScanLang::Cxx));
        assert_eq!(ScanLang::from_extension("cuh"), Some(ScanLang::Cuda));
        assert_eq!(ScanLang::from_extension("rs"), None);
        assert_eq!(ScanLang::from_extension("txt"), None);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(ScanLang::from_path(Path::new("a/b.h")), Some(ScanLang::Cxx));
        assert_eq!(ScanLang::from_path(Path::new("noext")), None);
    }
}

use crate::command::CustomCommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Source languages understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Language {
    C,
    #[serde(rename = "CXX")]
    Cxx,
    Fortran,
    #[serde(rename = "CUDA")]
    Cuda,
    Swift,
    #[serde(rename = "ASM")]
    Asm,
    #[serde(rename = "ASM-ATT")]
    AsmAtt,
    #[serde(rename = "ASM_NASM")]
    AsmNasm,
    #[serde(rename = "ASM_MASM")]
    AsmMasm,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "C",
            Language::Cxx => "CXX",
            Language::Fortran => "Fortran",
            Language::Cuda => "CUDA",
            Language::Swift => "Swift",
            Language::Asm => "ASM",
            Language::AsmAtt => "ASM-ATT",
            Language::AsmNasm => "ASM_NASM",
            Language::AsmMasm => "ASM_MASM",
        }
    }

    /// Languages compiled into object files by this backend.
    pub fn is_compilable(&self) -> bool {
        !matches!(self, Language::Swift)
    }

    pub fn is_assembly(&self) -> bool {
        matches!(
            self,
            Language::Asm | Language::AsmAtt | Language::AsmNasm | Language::AsmMasm
        )
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single translation unit belonging to a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub language: Language,

    /// File is produced during the build rather than present on disk.
    #[serde(default)]
    pub generated: bool,

    /// Opt this source out of precompiled-header use.
    #[serde(default)]
    pub skip_pch: bool,

    /// Manually declared header dependencies (OBJECT_DEPENDS style).
    #[serde(default)]
    pub extra_deps: Vec<PathBuf>,

    /// Command that produces this source, when it is a generated file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_command: Option<CustomCommand>,
}

impl SourceFile {
    pub fn new<P: Into<PathBuf>>(path: P, language: Language) -> Self {
        SourceFile {
            path: path.into(),
            language,
            generated: false,
            skip_pch: false,
            extra_deps: Vec::new(),
            custom_command: None,
        }
    }

    /// File name without its last extension, e.g. `main` for `src/main.c`.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Name of the object file this source compiles to.
    pub fn object_file_name(&self) -> String {
        format!("{}.o", self.stem())
    }
}

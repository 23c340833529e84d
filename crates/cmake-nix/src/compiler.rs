use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use target_model::prelude::{Language, Project};

/// Compiler-ID to nixpkgs package mapping.
static COMPILER_ID_PACKAGES: &[(&str, &str)] = &[
    ("GNU", "gcc"),
    ("Clang", "clang"),
    ("AppleClang", "clang"),
    ("Intel", "intel-compiler"),
    ("IntelLLVM", "intel-compiler"),
    ("PGI", "pgi"),
    ("NVHPC", "nvhpc"),
    ("XL", "xlc"),
    ("XLClang", "xlc"),
    ("Fujitsu", "fujitsu"),
    ("FujitsuClang", "fujitsu"),
];

/// Default compiler command per (language, package).
static DEFAULT_COMMANDS: &[(&str, &str)] = &[
    ("C_gcc", "gcc"),
    ("C_clang", "clang"),
    ("CXX_gcc", "g++"),
    ("CXX_clang", "clang++"),
    ("Fortran_gcc", "gfortran"),
    ("Fortran_gfortran", "gfortran"),
    ("Fortran_intel-compiler", "ifort"),
    ("CUDA_cudatoolkit", "nvcc"),
    ("Swift_swift", "swiftc"),
    ("ASM_gcc", "gcc"),
    ("ASM_clang", "clang"),
    ("ASM-ATT_gcc", "gcc"),
    ("ASM-ATT_clang", "clang"),
    ("ASM_NASM_nasm", "nasm"),
    ("ASM_MASM_masm", "ml"),
];

#[derive(Debug, Clone)]
struct CompilerInfo {
    package: String,
    command: String,
}

/// Resolves languages to Nix compiler packages and command names.
/// Resolution order: user overrides from the model, then compiler-ID
/// lookup, then binary-name sniffing, then per-language defaults.
/// Results are cached per language.
pub struct CompilerResolver {
    variables: BTreeMap<String, String>,
    crosscompiling: bool,
    cache: Mutex<HashMap<Language, CompilerInfo>>,
}

impl CompilerResolver {
    pub fn new(project: &Project) -> Self {
        CompilerResolver {
            variables: project.variables.clone(),
            crosscompiling: project.variable_on("CROSSCOMPILING")
                || project.variable_on("CMAKE_CROSSCOMPILING"),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The nixpkgs package providing the compiler for a language, with a
    /// `-cross` suffix when cross-compiling.
    pub fn compiler_package(&self, lang: Language) -> String {
        let mut package = self.resolve(lang).package;
        if self.crosscompiling {
            package.push_str("-cross");
        }
        package
    }

    /// The compiler command for a language (binary name inside the
    /// package).
    pub fn compiler_command(&self, lang: Language) -> String {
        self.resolve(lang).command
    }

    /// The configured compiler path from the front-end, used for `-MM`
    /// dependency scanning.
    pub fn compiler_path(&self, lang: Language) -> Option<&str> {
        self.variable(&format!("CMAKE_{}_COMPILER", lang.as_str()))
    }

    fn resolve(&self, lang: Language) -> CompilerInfo {
        {
            let cache = self.cache.lock().expect("compiler cache mutex");
            if let Some(info) = cache.get(&lang) {
                return info.clone();
            }
        }

        let info = self.detect(lang);

        let mut cache = self.cache.lock().expect("compiler cache mutex");
        cache.entry(lang).or_insert_with(|| info.clone());
        info
    }

    fn detect(&self, lang: Language) -> CompilerInfo {
        let package = self
            .override_for(lang, "_COMPILER_PACKAGE")
            .unwrap_or_else(|| self.detect_package(lang));

        let command = self
            .override_for(lang, "_COMPILER_COMMAND")
            .unwrap_or_else(|| default_command(lang, &package));

        CompilerInfo { package, command }
    }

    fn detect_package(&self, lang: Language) -> String {
        match lang {
            Language::Cuda => return "cudatoolkit".to_string(),
            Language::Swift => return "swift".to_string(),
            Language::AsmNasm => return "nasm".to_string(),
            Language::AsmMasm => return "masm".to_string(),
            Language::Fortran => {
                return match self.compiler_id(lang) {
                    Some("Intel") | Some("IntelLLVM") => "intel-compiler".to_string(),
                    _ => "gfortran".to_string(),
                };
            }
            _ => {}
        }

        if let Some(id) = self.compiler_id(lang) {
            if let Some((_, pkg)) = COMPILER_ID_PACKAGES.iter().find(|(k, _)| *k == id) {
                return pkg.to_string();
            }
        }

        if let Some(pkg) = self.sniff_compiler_binary(lang) {
            return pkg;
        }

        "gcc".to_string()
    }

    /// Classify the configured compiler by its binary name when the
    /// compiler ID is missing or unknown.
    fn sniff_compiler_binary(&self, lang: Language) -> Option<String> {
        let configured = self.compiler_path(lang)?;

        // A bare command name gets resolved on PATH so symlinked
        // toolchains (cc -> clang) classify correctly.
        let resolved = if Path::new(configured).is_absolute() {
            configured.to_string()
        } else {
            which::which(configured)
                .ok()
                .and_then(|p| std::fs::canonicalize(p).ok())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| configured.to_string())
        };

        let name = Path::new(&resolved)
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if name.contains("clang") {
            Some("clang".to_string())
        } else if name.contains("gcc") || name.contains("g++") {
            Some("gcc".to_string())
        } else if name.contains("icc") || name.contains("icpc") {
            Some("intel-compiler".to_string())
        } else {
            None
        }
    }

    fn compiler_id(&self, lang: Language) -> Option<&str> {
        self.variable(&format!("CMAKE_{}_COMPILER_ID", lang.as_str()))
    }

    fn override_for(&self, lang: Language, suffix: &str) -> Option<String> {
        self.variable(&format!("NIX_{}{}", lang.as_str(), suffix))
            .map(|s| s.to_string())
    }

    fn variable(&self, name: &str) -> Option<&str> {
        self.variables
            .get(name)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }
}

fn default_command(lang: Language, package: &str) -> String {
    let key = format!("{}_{}", lang.as_str(), package);
    if let Some((_, cmd)) = DEFAULT_COMMANDS.iter().find(|(k, _)| *k == key) {
        return cmd.to_string();
    }

    match lang {
        Language::Cxx => match package {
            "gcc" => "g++".to_string(),
            "clang" => "clang++".to_string(),
            _ => format!("{package}++"),
        },
        Language::C | Language::Asm | Language::AsmAtt => match package {
            "gcc" => "gcc".to_string(),
            "clang" => "clang".to_string(),
            _ => package.to_string(),
        },
        _ => package.to_string(),
    }
}

use crate::config;
use crate::diag::{debug, ProfileTimer};
use crate::generator::GenContext;
use crate::headers::{classify_headers, ClassifiedHeaders};
use crate::packages;
use crate::paths::{self, PathCheck};
use deps_scan::include_scanner::IncludeScanner;
use deps_scan::{HeaderScanner, ScanLang};
use nix_expr::escape_indented_string;
use nix_expr::fileset::write_fileset_source;
use nix_expr::NixWriter;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use target_model::prelude::{Language, SourceFile, Target};
use walkdir::WalkDir;

/// Emit one `cmakeNixCC` derivation per compilable `(target, source)`
/// pair, registering object outputs for custom commands along the way.
pub fn write_object_derivations(writer: &mut NixWriter, ctx: &mut GenContext) {
    writer.write_indented_comment(1, "Per-translation-unit derivations");
    let project = ctx.project;
    let config = ctx.config.clone();

    for target in &project.targets {
        if target.property_bool("UNITY_BUILD") {
            ctx.diag.target_warning(
                &target.name,
                "Unity builds are not supported by the Nix backend and will be ignored; \
                 fine-grained per-unit derivations parallelize better",
            );
        }

        for source in target.sources(&config) {
            if is_unity_batch_file(&source.path) {
                debug(format!("Skipping Unity batch file: {}", source.path.display()));
                continue;
            }
            if !source.language.is_compilable() {
                continue;
            }
            write_object_derivation(writer, ctx, target, source);
        }
    }
}

fn is_unity_batch_file(path: &Path) -> bool {
    let s = path.to_string_lossy();
    s.contains("/Unity/unity_") && s.contains("_cxx.cxx")
}

fn write_object_derivation(
    writer: &mut NixWriter,
    ctx: &mut GenContext,
    target: &Target,
    source: &SourceFile,
) {
    let _timer = ProfileTimer::detailed("write_object_derivation");

    // Resolve symlinked sources so the real file lands in the store.
    let source_file = if source.path.is_symlink() {
        paths::resolve_to_real_path(&source.path)
    } else {
        paths::collapse(&source.path)
    };

    match paths::validate_source_path(
        &source_file,
        ctx.source_dir(),
        ctx.build_dir(),
        &ctx.project.system_prefixes,
    ) {
        PathCheck::Error(msg) => {
            ctx.diag.target_warning(&target.name, msg);
            return;
        }
        PathCheck::Warning(msg) => ctx.diag.target_warning(&target.name, msg),
        PathCheck::Ok => {}
    }
    if !source.generated && !source_file.is_file() {
        ctx.diag.target_warning(
            &target.name,
            format!(
                "Source file does not exist: {} (might be generated later)",
                source_file.display()
            ),
        );
    }

    let deriv_name = ctx.object_derivation_name(&target.name, &source_file);
    let object_name = source.object_file_name();
    let lang = source.language;
    let config = ctx.config.clone();

    debug(format!(
        "Object derivation {} for {} (generated: {})",
        deriv_name,
        source_file.display(),
        source.generated
    ));

    let object_path = ctx.build_dir().join(&object_name);
    ctx.object_outputs.insert(object_path, deriv_name.clone());

    let dependencies = source_dependencies(ctx, target, source, &source_file);

    let (mut flags, config_time_from_flags) =
        assemble_compile_flags(ctx, target, source, &source_file, lang, &config, &object_name);

    let mut classified = classify_headers(ctx.project, &dependencies);
    for file in config_time_from_flags {
        if !classified.config_time.contains(&file) {
            classified.config_time.push(file);
        }
    }

    let include_dirs = absolute_include_dirs(ctx, target, lang, &config);
    let custom_headers = custom_command_headers(ctx, &source_file, &include_dirs);
    let has_external_includes = include_dirs.iter().any(|dir| {
        paths::relative_to(dir, ctx.source_dir())
            .map(|rel| paths::is_outside_tree(&rel))
            .unwrap_or(true)
            && !ctx.is_system(dir)
    });

    let is_external = paths::relative_to(&source_file, ctx.source_dir())
        .map(|rel| paths::is_outside_tree(&rel))
        .unwrap_or(true);

    writer.write_indented(1, &format!("{deriv_name} = cmakeNixCC {{"));
    writer.write_attribute(2, "name", &object_name);

    if is_external {
        write_external_source_composite(
            writer,
            ctx,
            &source_file,
            &classified,
            &custom_headers,
            &include_dirs,
        );
    } else {
        write_regular_source_attribute(
            writer,
            ctx,
            source,
            &source_file,
            &classified,
            &custom_headers,
            has_external_includes,
            &include_dirs,
        );
    }

    let compiler_pkg = compiler_package_for(ctx, lang, &flags);
    let build_inputs = build_inputs_list(
        ctx,
        target,
        &source_file,
        &dependencies,
        &custom_headers,
        &config,
        &compiler_pkg,
    );
    if !build_inputs.is_empty() {
        writer.write_list_attribute(2, "buildInputs", &build_inputs);
    }

    let source_path = determine_source_path(ctx, &source_file);

    rewrite_config_time_flags(&mut flags, &classified.config_time, ctx.build_dir());
    if target.kind.is_shared() && !flags.split_whitespace().any(|f| f == "-fPIC") {
        if !flags.is_empty() {
            flags.push(' ');
        }
        flags.push_str("-fPIC");
    }

    if source_path.contains("${") {
        // Derivation interpolation must survive unescaped.
        writer.write_indented(2, &format!("source = \"{source_path}\";"));
    } else {
        writer.write_attribute(2, "source", &source_path);
    }

    writer.write_raw_attribute(2, "compiler", &compiler_pkg);
    if !flags.is_empty() {
        writer.write_attribute(2, "flags", &flags);
    }

    writer.write_indented(1, "};");
    writer.blank_line();
}

/// Transitive header dependencies for a source, memoized per canonical
/// path. Without explicit sourcing no scan happens at all and the
/// fileset falls back to directory-level granularity.
fn source_dependencies(
    ctx: &GenContext,
    target: &Target,
    source: &SourceFile,
    source_file: &Path,
) -> Vec<PathBuf> {
    if !ctx.explicit_sources {
        return Vec::new();
    }

    let scan_lang = match source.language {
        Language::C => ScanLang::C,
        Language::Cxx => ScanLang::Cxx,
        Language::Cuda => ScanLang::Cuda,
        _ => return source.extra_deps.clone(),
    };

    let config = &ctx.config;
    let include_dirs = absolute_include_dirs(ctx, target, source.language, config);

    let mut scan_flags: Vec<String> = target
        .defines(source.language, config)
        .iter()
        .map(|d| format!("-D{d}"))
        .collect();
    scan_flags.extend(
        target
            .compile_flags(source.language, config)
            .iter()
            .flat_map(|raw| tokenize_flags(raw)),
    );

    ctx.cache.transitive_headers(source_file, || {
        let mut scanner =
            HeaderScanner::new(ctx.source_dir(), include_dirs.clone()).with_flags(scan_flags.clone());
        if let Some(compiler) = ctx.resolver.compiler_path(source.language) {
            scanner = scanner.with_compiler(scan_lang, compiler);
        }

        let outcome = scanner.scan_source(source_file, scan_lang);
        for warning in &outcome.warnings {
            ctx.diag.target_warning(&target.name, warning);
        }

        if outcome.headers.is_empty() && !source.extra_deps.is_empty() {
            return source.extra_deps.clone();
        }
        outcome.headers
    })
}

/// Shell-split a flag string; unquoted tokens that still contain
/// whitespace are split again.
fn tokenize_flags(raw: &str) -> Vec<String> {
    let mut trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed = &trimmed[1..trimmed.len() - 1];
    }

    let had_quotes = trimmed.contains('"') || trimmed.contains('\'');
    let tokens = match shell_words::split(trimmed) {
        Ok(tokens) => tokens,
        Err(_) => vec![trimmed.to_string()],
    };

    if had_quotes {
        tokens.into_iter().filter(|t| !t.is_empty()).collect()
    } else {
        tokens
            .into_iter()
            .flat_map(|t| {
                t.split_whitespace()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Assemble the full compile-flag string for one translation unit and
/// collect configuration-time files referenced through `-imacros` /
/// `-include`.
fn assemble_compile_flags(
    ctx: &GenContext,
    target: &Target,
    source: &SourceFile,
    source_file: &Path,
    lang: Language,
    config: &str,
    object_name: &str,
) -> (String, Vec<PathBuf>) {
    let mut parts: Vec<String> = Vec::new();
    let mut config_time: Vec<PathBuf> = Vec::new();

    parts.extend(
        config::configuration_flags(config)
            .split_whitespace()
            .map(|s| s.to_string()),
    );

    for raw in target.compile_flags(lang, config) {
        let tokens = tokenize_flags(raw);
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            if (token == "-imacros" || token == "-include") && i + 1 < tokens.len() {
                parts.push(token.clone());
                i += 1;
                let file_arg = &tokens[i];
                parts.push(process_flag_file_argument(ctx, file_arg, &mut config_time));
            } else {
                parts.push(token.clone());
            }
            i += 1;
        }
    }

    for define in target.defines(lang, config) {
        if !define.is_empty() {
            parts.push(format!("-D{define}"));
        }
    }

    for inc in target.include_dirs(lang, config) {
        if inc.is_empty() {
            continue;
        }
        let inc_path = Path::new(inc);
        if ctx.is_system(inc_path) {
            continue;
        }

        let final_path = if inc_path.is_absolute() {
            let collapsed = paths::collapse(inc_path);
            match paths::relative_to(&collapsed, ctx.source_dir()) {
                Some(rel) if !paths::is_outside_tree(&rel) => rel.display().to_string(),
                _ => collapsed.display().to_string(),
            }
        } else {
            inc.clone()
        };

        if final_path.contains(' ') {
            parts.push(format!("-I\"{final_path}\""));
        } else {
            parts.push(format!("-I{final_path}"));
        }
    }

    match lang {
        Language::Cxx => {
            if let Some(std) = target.feature("CXX_STANDARD", config) {
                parts.push(format!("-std=c++{std}"));
            }
        }
        Language::C => {
            if let Some(std) = target.feature("C_STANDARD", config) {
                parts.push(format!("-std=c{std}"));
            }
        }
        _ => {}
    }

    if let Some(pch) = target.pch_config(lang) {
        if !source.skip_pch {
            let options = if paths::collapse(&pch.source) == *source_file {
                &pch.create_options
            } else {
                &pch.use_options
            };
            for option in options {
                for piece in option.replace(';', " ").split_whitespace() {
                    parts.push(relativize_pch_token(piece, ctx.source_dir()));
                }
            }
        }
    }

    if lang.is_assembly() {
        parts.push("-o".to_string());
        parts.push(object_name.to_string());
    }

    parts.retain(|p| !p.trim().is_empty());
    (parts.join(" "), config_time)
}

fn relativize_pch_token(token: &str, source_dir: &Path) -> String {
    let path = Path::new(token);
    if path.is_absolute() {
        if let Some(rel) = paths::relative_to(path, source_dir) {
            if !paths::is_outside_tree(&rel) {
                return rel.display().to_string();
            }
        }
    }
    token.to_string()
}

/// `-imacros`/`-include` arguments in the build directory become
/// build-relative paths and get their files scheduled for embedding.
fn process_flag_file_argument(
    ctx: &GenContext,
    file_arg: &str,
    config_time: &mut Vec<PathBuf>,
) -> String {
    let path = Path::new(file_arg);
    let absolute = if path.is_absolute() {
        paths::collapse(path)
    } else {
        paths::collapse(&ctx.build_dir().join(path))
    };

    if let Some(rel) = paths::relative_to(&absolute, ctx.build_dir()) {
        if !paths::is_outside_tree(&rel) {
            if absolute.is_file() {
                config_time.push(absolute);
            } else {
                ctx.diag.warning(format!(
                    "Configuration-time file referenced by compile flags is not readable: {}",
                    absolute.display()
                ));
            }
            return rel.display().to_string();
        }
    }
    if let Some(rel) = paths::relative_to(&absolute, ctx.source_dir()) {
        if !paths::is_outside_tree(&rel) {
            return rel.display().to_string();
        }
    }
    file_arg.to_string()
}

/// Include directories as absolute paths; relative entries resolve
/// against the build directory, matching how compile commands run.
fn absolute_include_dirs(
    ctx: &GenContext,
    target: &Target,
    lang: Language,
    config: &str,
) -> Vec<PathBuf> {
    target
        .include_dirs(lang, config)
        .iter()
        .filter(|inc| !inc.is_empty())
        .map(|inc| {
            let path = Path::new(inc);
            if path.is_absolute() {
                paths::collapse(path)
            } else {
                paths::collapse(&ctx.build_dir().join(path))
            }
        })
        .collect()
}

/// Custom-command derivations producing headers this source can see,
/// either through an include directory or a relative include.
fn custom_command_headers(
    ctx: &GenContext,
    source_file: &Path,
    include_dirs: &[PathBuf],
) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for (output, deriv) in &ctx.custom_outputs {
        let Some(out_dir) = output.parent() else {
            continue;
        };
        for inc in include_dirs {
            if out_dir == inc.as_path() || output.starts_with(inc) {
                if !result.contains(deriv) {
                    result.push(deriv.clone());
                }
                break;
            }
        }
    }

    // Relative includes written directly in the source.
    let scanner = IncludeScanner::new(Vec::<PathBuf>::new());
    if let Ok(names) = scanner.include_names(source_file) {
        let source_dir = source_file.parent().unwrap_or(Path::new("."));
        for name in names {
            let mut candidates: Vec<PathBuf> = Vec::new();
            if Path::new(&name).is_absolute() {
                candidates.push(PathBuf::from(&name));
            } else {
                candidates.push(paths::collapse(&source_dir.join(&name)));
                for inc in include_dirs {
                    candidates.push(paths::collapse(&inc.join(&name)));
                }
            }
            for candidate in candidates {
                if let Some(deriv) = ctx.custom_outputs.get(&candidate) {
                    if !result.contains(deriv) {
                        result.push(deriv.clone());
                    }
                    break;
                }
            }
        }
    }

    result
}

fn compiler_package_for(ctx: &GenContext, lang: Language, flags: &str) -> String {
    let needs_32bit = flags.split_whitespace().any(|f| f == "-m32");

    if lang == Language::Cxx {
        // C++ uses the wrapped toolchain so the standard library and
        // linker defaults come along.
        return if needs_32bit {
            "pkgsi686Linux.stdenv.cc".to_string()
        } else {
            "stdenv.cc".to_string()
        };
    }

    let package = ctx.resolver.compiler_package(lang);
    if needs_32bit {
        match package.as_str() {
            "gcc" => return "pkgsi686Linux.gcc".to_string(),
            "clang" => return "pkgsi686Linux.clang".to_string(),
            _ => {}
        }
    }
    package
}

/// Nix packages required by the target's link implementation; cached per
/// `(target, config)` since every source of a target asks.
pub(crate) fn library_packages(target: &Target, config: &str) -> Vec<String> {
    use target_model::prelude::LinkItem;

    let mut result = Vec::new();
    for item in target.link_items(config) {
        let entry = match item {
            LinkItem::Package(name) => packages::nix_package_for_target(name),
            LinkItem::Library(raw) => {
                if raw.ends_with(".nix") {
                    // Project-provided package file.
                    format!("(import {raw} {{ inherit pkgs; }})")
                } else {
                    packages::nix_package_for_library(raw)
                }
            }
            LinkItem::Target(_) => String::new(),
        };
        if !entry.is_empty() && !result.contains(&entry) {
            result.push(entry);
        }
    }
    result
}

fn build_inputs_list(
    ctx: &GenContext,
    target: &Target,
    source_file: &Path,
    dependencies: &[PathBuf],
    custom_headers: &[String],
    config: &str,
    compiler_pkg: &str,
) -> Vec<String> {
    let _timer = ProfileTimer::detailed("build_inputs_list");
    let mut inputs: Vec<String> = vec![compiler_pkg.to_string()];

    let lib_packages = ctx
        .cache
        .library_dependencies(&target.name, config, || library_packages(target, config));
    for package in lib_packages {
        if !inputs.contains(&package) {
            inputs.push(package);
        }
    }

    // The source itself may come out of a custom command.
    if let Some(deriv) = ctx.custom_outputs.get(source_file) {
        if !inputs.contains(deriv) {
            inputs.push(deriv.clone());
        }
    }

    // Headers produced by custom commands, looked up under every path
    // they might have been reported as.
    for dep in dependencies {
        let candidates: Vec<PathBuf> = if dep.is_absolute() {
            vec![dep.clone()]
        } else {
            vec![
                ctx.source_dir().join(dep),
                ctx.build_dir().join(dep),
                dep.clone(),
            ]
        };
        for candidate in candidates {
            if let Some(deriv) = ctx.custom_outputs.get(&candidate) {
                if !inputs.contains(deriv) {
                    inputs.push(deriv.clone());
                }
                break;
            }
        }
    }

    for deriv in custom_headers {
        if !inputs.contains(deriv) {
            inputs.push(deriv.clone());
        }
    }

    if let Some(header_deriv) = ctx.headers.source_derivation(source_file) {
        if !inputs.contains(&header_deriv) {
            inputs.push(header_deriv);
        }
    }

    inputs
}

#[allow(clippy::too_many_arguments)]
fn write_regular_source_attribute(
    writer: &mut NixWriter,
    ctx: &GenContext,
    source: &SourceFile,
    source_file: &Path,
    classified: &ClassifiedHeaders,
    custom_headers: &[String],
    has_external_includes: bool,
    include_dirs: &[PathBuf],
) {
    if !classified.config_time.is_empty()
        || has_external_includes
        || !custom_headers.is_empty()
        || !classified.external.is_empty()
    {
        write_composite_source(writer, ctx, source_file, classified, custom_headers, include_dirs);
        return;
    }

    let root = ctx.project_source_rel_path();
    let mut existing: Vec<String> = Vec::new();
    let mut generated: Vec<String> = Vec::new();

    if let Some(rel) = paths::relative_to(source_file, ctx.source_dir()) {
        if !paths::is_outside_tree(&rel) {
            let rel = rel.display().to_string();
            if source.generated {
                generated.push(rel);
            } else {
                existing.push(rel);
            }
        }
    }

    if ctx.explicit_sources {
        for file in &classified.existing {
            if !existing.contains(file) {
                existing.push(file.clone());
            }
        }
        for file in &classified.generated {
            if !generated.contains(file) {
                generated.push(file.clone());
            }
        }
    } else {
        // Coarse mode: the source file, project-relative include
        // directories, and the sibling headers of the source's own
        // directory.
        for inc in include_dirs {
            if let Some(rel) = paths::relative_to(inc, ctx.source_dir()) {
                if !paths::is_outside_tree(&rel) && inc.is_dir() {
                    let rel = rel.display().to_string();
                    if !rel.is_empty() && rel != "." && !existing.contains(&rel) {
                        existing.push(rel);
                    }
                }
            }
        }

        for header in sibling_headers(ctx.source_dir(), source_file, &existing) {
            if !existing.contains(&header) {
                existing.push(header);
            }
        }
    }

    if existing.is_empty() && generated.is_empty() {
        writer.write_raw_attribute(2, "src", &root);
    } else {
        write_fileset_source(writer, 2, &root, &existing, &generated);
    }
}

/// Headers living next to the source file, unless its directory is
/// already covered by a fileset entry.
fn sibling_headers(project_root: &Path, source_file: &Path, existing: &[String]) -> Vec<String> {
    let Some(rel_source) = paths::relative_to(source_file, project_root) else {
        return Vec::new();
    };
    let source_dir_rel = rel_source
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let display_dir = if source_dir_rel.is_empty() { ".".to_string() } else { source_dir_rel };

    let dir_covered = existing.iter().any(|file| {
        file == &display_dir || (display_dir != "." && file.starts_with(&format!("{display_dir}/")))
    });
    if dir_covered {
        return Vec::new();
    }

    let full_dir = if display_dir == "." {
        project_root.to_path_buf()
    } else {
        project_root.join(&display_dir)
    };

    let mut headers = Vec::new();
    for entry in WalkDir::new(&full_dir)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .flatten()
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_header = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e, "h" | "hpp" | "hxx" | "H"))
            .unwrap_or(false);
        if !is_header {
            continue;
        }
        if display_dir == "." {
            headers.push(name);
        } else {
            headers.push(format!("{display_dir}/{name}"));
        }
    }
    headers
}

/// Unique, content-stable here-doc delimiter for an embedded file.
fn heredoc_delimiter(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("NIXEOF_{hex}_END")
}

/// Embed one configuration-time file into a composite source build
/// phase. Contents go in verbatim through a here-doc; the only escape
/// needed is the indented-string quote pair.
fn embed_config_time_file(
    writer: &mut NixWriter,
    ctx: &GenContext,
    file: &Path,
) {
    let rel = paths::relative_to(file, ctx.build_dir())
        .filter(|r| !paths::is_outside_tree(r))
        .unwrap_or_else(|| {
            PathBuf::from(
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )
        });

    match std::fs::read_to_string(file) {
        Ok(contents) => {
            if let Some(parent) = rel.parent() {
                if !parent.as_os_str().is_empty() {
                    writer.write_multiline_line(3, &format!("mkdir -p $out/{}", parent.display()));
                }
            }
            let delimiter = heredoc_delimiter(file);
            writer.write_multiline_line(
                3,
                &format!("cat > $out/{} <<'{}'", rel.display(), delimiter),
            );
            // Verbatim content: no indentation, or the here-doc payload
            // would change.
            writer.push_raw(&escape_indented_string(&contents));
            if !contents.ends_with('\n') {
                writer.push_raw("\n");
            }
            writer.write_multiline_line(0, &delimiter);
        }
        Err(_) => {
            ctx.diag.warning(format!(
                "Cannot read configuration-time generated file: {}",
                file.display()
            ));
            writer.write_multiline_line(3, &format!("# Warning: Could not read {}", file.display()));
        }
    }
}

fn write_external_include_dir_staging(writer: &mut NixWriter, include_dir: &Path) {
    let normalized = paths::collapse(include_dir);
    writer.write_multiline_line(
        3,
        &format!(
            "# Copy headers from external include directory: {}",
            normalized.display()
        ),
    );
    if let Some(parent) = normalized.parent() {
        writer.write_multiline_line(3, &format!("mkdir -p $out{}", parent.display()));
    }
    writer.write_multiline_line(
        3,
        &format!(
            "cp -rL ${{builtins.path {{ path = \"{}\"; }}}} $out{}",
            normalized.display(),
            normalized.display()
        ),
    );
}

fn write_custom_header_copies(
    writer: &mut NixWriter,
    ctx: &GenContext,
    custom_headers: &[String],
) {
    if custom_headers.is_empty() {
        return;
    }
    writer.write_multiline_line(3, "# Copy custom command generated headers");

    let mut processed: Vec<&String> = Vec::new();
    for deriv in custom_headers {
        if processed.contains(&deriv) {
            continue;
        }
        processed.push(deriv);

        for (output, name) in &ctx.custom_outputs {
            if name != deriv {
                continue;
            }
            let is_header = output
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e, "h" | "hpp" | "hxx" | "H"))
                .unwrap_or(false);
            if !is_header {
                continue;
            }
            let Some(rel) = paths::relative_to(output, ctx.build_dir()) else {
                continue;
            };
            if let Some(parent) = rel.parent() {
                if !parent.as_os_str().is_empty() {
                    writer.write_multiline_line(3, &format!("mkdir -p $out/{}", parent.display()));
                }
            }
            writer.write_multiline_line(3, &format!("if [ -e ${{{deriv}}}/{} ]; then", rel.display()));
            writer.write_multiline_line(
                4,
                &format!("cp ${{{deriv}}}/{} $out/{}", rel.display(), rel.display()),
            );
            writer.write_multiline_line(3, "fi");
        }
    }
}

/// Composite source: the project tree staged by a build phase, with
/// configuration-time files embedded, external include directories
/// copied in under their absolute prefixes, and external headers served
/// from their shared derivation.
fn write_composite_source(
    writer: &mut NixWriter,
    ctx: &GenContext,
    source_file: &Path,
    classified: &ClassifiedHeaders,
    custom_headers: &[String],
    include_dirs: &[PathBuf],
) {
    writer.write_indented(2, "src = pkgs.runCommand \"composite-src-with-generated\" {");
    if !custom_headers.is_empty() {
        let refs: Vec<String> = dedup(custom_headers);
        writer.write_list_attribute(3, "buildInputs", &refs);
    }
    writer.write_indented(2, "} ''");

    writer.write_multiline_line(3, "mkdir -p $out");
    writer.write_multiline_line(3, "# Copy source files");
    writer.write_multiline_line(
        3,
        &format!(
            "cp -rL ${{{}}}/* $out/ 2>/dev/null || true",
            ctx.project_source_rel_path()
        ),
    );

    for inc in include_dirs {
        if inc.is_absolute() && !ctx.is_system(inc) {
            let outside = paths::relative_to(inc, ctx.source_dir())
                .map(|rel| paths::is_outside_tree(&rel))
                .unwrap_or(true);
            if outside {
                write_external_include_dir_staging(writer, inc);
            }
        }
    }

    if !classified.config_time.is_empty() {
        writer.write_multiline_line(3, "# Copy configuration-time generated files");
        for file in &classified.config_time {
            embed_config_time_file(writer, ctx, file);
        }
    }

    write_external_header_links(writer, ctx, source_file, &classified.external);
    write_custom_header_copies(writer, ctx, custom_headers);

    writer.write_indented(2, "'';");
}

/// Stage the external headers a source consumes by linking in its
/// directory's shared header derivation.
fn write_external_header_links(
    writer: &mut NixWriter,
    ctx: &GenContext,
    source_file: &Path,
    external: &[PathBuf],
) {
    if external.is_empty() {
        return;
    }

    let source_dir = source_file.parent().unwrap_or(Path::new("/"));
    let deriv = ctx
        .headers
        .get_or_create(&ctx.cache, source_dir, external, &ctx.suffix);
    ctx.headers.set_source_derivation(source_file, &deriv);

    writer.write_multiline_line(3, "# Link headers from external header derivation");
    writer.write_multiline_line(3, &format!("if [ -d ${{{deriv}}} ]; then"));
    writer.write_multiline_line(4, &format!("cp -rL ${{{deriv}}}/* $out/ 2>/dev/null || true"));
    writer.write_multiline_line(3, "fi");
}

/// Composite source for a translation unit living outside the project
/// tree: the project is staged, then the external source (plus any
/// probe sibling headers and external-header derivations) is copied in
/// at top level.
fn write_external_source_composite(
    writer: &mut NixWriter,
    ctx: &GenContext,
    source_file: &Path,
    classified: &ClassifiedHeaders,
    custom_headers: &[String],
    include_dirs: &[PathBuf],
) {
    let name = if classified.config_time.is_empty() {
        "composite-src"
    } else {
        "composite-src-with-generated"
    };
    writer.write_indented(2, &format!("src = pkgs.runCommand \"{name}\" {{"));
    if !custom_headers.is_empty() {
        let refs = dedup(custom_headers);
        writer.write_list_attribute(3, "buildInputs", &refs);
    }
    writer.write_indented(2, "} ''");

    writer.write_multiline_line(3, "mkdir -p $out");
    writer.write_multiline_line(3, "# Copy source files");
    writer.write_multiline_line(
        3,
        &format!(
            "cp -rL ${{{}}}/* $out/ 2>/dev/null || true",
            ctx.project_source_rel_path()
        ),
    );

    for file in &classified.config_time {
        embed_config_time_file(writer, ctx, file);
    }

    for inc in include_dirs {
        if inc.is_absolute() && !ctx.is_system(inc) {
            let outside = paths::relative_to(inc, ctx.source_dir())
                .map(|rel| paths::is_outside_tree(&rel))
                .unwrap_or(true);
            if outside {
                write_external_include_dir_staging(writer, inc);
            }
        }
    }

    let file_name = source_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    writer.write_multiline_line(3, "# Copy external source file");
    writer.write_multiline_line(
        3,
        &format!(
            "cp ${{builtins.path {{ path = \"{}\"; }}}} $out/{}",
            source_file.display(),
            file_name
        ),
    );

    // Compiler ABI probes need their sibling header next to them.
    if file_name.contains("CMakeCCompilerABI.c") || file_name.contains("CMakeCXXCompilerABI.cpp") {
        if let Some(dir) = source_file.parent() {
            writer.write_multiline_line(
                3,
                &format!(
                    "cp ${{builtins.path {{ path = \"{}\"; }}}} $out/CMakeCompilerABI.h",
                    dir.join("CMakeCompilerABI.h").display()
                ),
            );
        }
    }

    write_external_header_links(writer, ctx, source_file, &classified.external);
    write_custom_header_copies(writer, ctx, custom_headers);

    writer.write_indented(2, "'';");
}

fn dedup(items: &[String]) -> Vec<String> {
    let mut result = Vec::new();
    for item in items {
        if !result.contains(item) {
            result.push(item.clone());
        }
    }
    result
}

/// The path the compile step reads the source from, relative to the
/// composed `src` (or interpolated out of a producing derivation).
fn determine_source_path(ctx: &GenContext, source_file: &Path) -> String {
    if let Some(deriv) = ctx.custom_outputs.get(source_file) {
        let rel = paths::relative_to(source_file, ctx.build_dir())
            .unwrap_or_else(|| source_file.to_path_buf());
        return format!("${{{}}}/{}", deriv, rel.display());
    }

    match paths::relative_to(source_file, ctx.source_dir()) {
        Some(rel) if !paths::is_outside_tree(&rel) => rel.display().to_string(),
        _ => {
            // Out-of-source generated file still under the build tree
            // keeps its build-relative location inside the composed
            // source.
            if ctx.source_dir() != ctx.build_dir() {
                if let Some(build_rel) = paths::relative_to(source_file, ctx.build_dir()) {
                    if !paths::is_outside_tree(&build_rel) {
                        if let Some(src_to_build) =
                            paths::relative_to(ctx.build_dir(), ctx.source_dir())
                        {
                            if !paths::is_outside_tree(&src_to_build) {
                                return format!(
                                    "{}/{}",
                                    src_to_build.display(),
                                    build_rel.display()
                                );
                            }
                        }
                        return build_rel.display().to_string();
                    }
                }
            }
            // External files are copied to the composite root by name.
            source_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        }
    }
}

/// Swap embedded configuration-time files' absolute paths for their
/// build-relative locations inside the composed source.
fn rewrite_config_time_flags(flags: &mut String, config_time: &[PathBuf], build_dir: &Path) {
    for file in config_time {
        let abs = file.display().to_string();
        if let Some(rel) = paths::relative_to(file, build_dir) {
            let rel = rel.display().to_string();
            if flags.contains(&abs) {
                *flags = flags.replace(&abs, &rel);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_flags() {
        assert_eq!(tokenize_flags("-Wall -O2"), ["-Wall", "-O2"]);
        // Unquoted multi-flag token splits.
        assert_eq!(tokenize_flags("-fPIC -pthread"), ["-fPIC", "-pthread"]);
        // Quoted values keep their spaces.
        assert_eq!(
            tokenize_flags("-DMSG=\"hello world\""),
            ["-DMSG=hello world"]
        );
        // Fully wrapped strings lose the outer quotes first.
        assert_eq!(tokenize_flags("\"-g -O0\""), ["-g", "-O0"]);
    }

    #[test]
    fn test_heredoc_delimiter_stable_and_unique() {
        let a = heredoc_delimiter(Path::new("/b/config.h"));
        let b = heredoc_delimiter(Path::new("/b/config.h"));
        let c = heredoc_delimiter(Path::new("/b/other.h"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("NIXEOF_"));
        assert!(a.ends_with("_END"));
    }

    #[test]
    fn test_rewrite_config_time_flags() {
        let mut flags = "-include /b/gen/config.h -Wall".to_string();
        rewrite_config_time_flags(
            &mut flags,
            &[PathBuf::from("/b/gen/config.h")],
            Path::new("/b"),
        );
        assert_eq!(flags, "-include gen/config.h -Wall");
    }

    #[test]
    fn test_is_unity_batch_file() {
        assert!(is_unity_batch_file(Path::new(
            "/b/CMakeFiles/t.dir/Unity/unity_0_cxx.cxx"
        )));
        assert!(!is_unity_batch_file(Path::new("/p/src/unity_helper.cxx")));
    }

    #[test]
    fn test_library_packages() {
        use target_model::prelude::{LinkItem, Target, TargetKind};
        let mut target = Target::new("app", TargetKind::Executable);
        target.link_items = vec![
            LinkItem::Package("ZLIB::ZLIB".to_string()),
            LinkItem::Package("Threads::Threads".to_string()),
            LinkItem::Library("m".to_string()),
            LinkItem::Library("ssl".to_string()),
            LinkItem::Library("./pkg_foo.nix".to_string()),
            LinkItem::Target("core".to_string()),
        ];

        let packages = library_packages(&target, "Release");
        assert_eq!(
            packages,
            [
                "zlib",
                "openssl",
                "(import ./pkg_foo.nix { inherit pkgs; })"
            ]
        );
    }

    #[test]
    fn test_dedup_preserves_order() {
        let items = vec![
            "b".to_string(),
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ];
        assert_eq!(dedup(&items), ["b", "a", "c"]);
    }
}

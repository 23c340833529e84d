use crate::diag::{debug, ProfileTimer};
use crate::generator::GenContext;
use crate::packages;
use crate::paths::shell_escape;
use nix_expr::NixWriter;
use std::collections::BTreeSet;
use std::path::Path;
use target_model::prelude::{Language, LinkItem, Target, TargetKind};

/// Emit one `cmakeNixLD` derivation per linkable target.
pub fn write_link_derivations(writer: &mut NixWriter, ctx: &GenContext) {
    writer.write_indented_comment(1, "Linking derivations");
    for target in &ctx.project.targets {
        if target.kind.is_linkable() {
            write_link_derivation(writer, ctx, target);
        }
    }
}

/// Language precedence for picking the link driver: C++ over Fortran
/// over C.
pub fn primary_language(target: &Target, config: &str) -> Language {
    let mut primary = Language::C;
    for source in target.sources(config) {
        match source.language {
            Language::Cxx => return Language::Cxx,
            Language::Fortran => primary = Language::Fortran,
            _ => {}
        }
    }
    primary
}

fn nix_target_type(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::StaticLibrary => "static",
        TargetKind::SharedLibrary => "shared",
        TargetKind::ModuleLibrary => "module",
        _ => "executable",
    }
}

pub fn write_link_derivation(writer: &mut NixWriter, ctx: &GenContext, target: &Target) {
    let _timer = ProfileTimer::new("write_link_derivation");

    let config = &ctx.config;
    let deriv_name = ctx.link_derivation_name(&target.name);
    let lang = primary_language(target, config);
    let compiler_pkg = ctx.resolver.compiler_package(lang);
    let compiler_cmd = ctx.resolver.compiler_command(lang);

    debug(format!(
        "Link derivation {} for target {} ({})",
        deriv_name,
        target.name,
        nix_target_type(target.kind)
    ));

    let objects = collect_objects(ctx, target);
    let link = process_libraries(ctx, target);
    let build_inputs = collect_build_inputs(ctx, target, &compiler_pkg);

    let mut flags: Vec<String> = Vec::new();
    if let Some(extra) = target.property("LINK_FLAGS") {
        flags.push(extra.to_string());
    }
    flags.extend(link.flags);

    let (version, soversion) = if target.kind == TargetKind::SharedLibrary {
        (
            target.property("VERSION").map(|s| s.to_string()),
            target.property("SOVERSION").map(|s| s.to_string()),
        )
    } else {
        (None, None)
    };

    writer.write_indented(1, &format!("{deriv_name} = cmakeNixLD {{"));
    writer.write_attribute(2, "name", &target.name);
    writer.write_attribute(2, "type", nix_target_type(target.kind));
    writer.write_list_attribute(2, "buildInputs", &build_inputs);
    writer.write_list_attribute(2, "objects", &objects);
    writer.write_raw_attribute(2, "compiler", &compiler_pkg);

    // The helper defaults to the package's plain C driver; only a
    // differing command needs spelling out.
    if compiler_cmd != compiler_pkg {
        writer.write_attribute(2, "compilerCommand", &compiler_cmd);
    }

    if !flags.is_empty() {
        writer.write_attribute(2, "flags", &flags.join(" "));
    }

    if !link.libraries.is_empty() {
        let quoted: Vec<String> = link
            .libraries
            .iter()
            .map(|lib| format!("\"{lib}\""))
            .collect();
        writer.write_list_attribute(2, "libraries", &quoted);
    }

    if let Some(version) = &version {
        writer.write_attribute(2, "version", version);
    }
    if let Some(soversion) = &soversion {
        writer.write_attribute(2, "soversion", soversion);
    }

    if ctx.is_try_compile() {
        writer.write_indented_comment(2, "Feature-probe builds copy results back for the caller");
        writer.start_multiline_attribute(2, "postBuildPhase");
        write_try_compile_post_build(writer, ctx.build_dir(), &target.name);
        writer.end_multiline_attribute(2);
    }

    writer.write_indented(1, "};");
    writer.blank_line();
}

/// Object derivation references for a target: its own compilable
/// sources (minus PCH creators and Unity batch files) plus the sources
/// of every object library it links.
fn collect_objects(ctx: &GenContext, target: &Target) -> Vec<String> {
    let config = &ctx.config;
    let pch_sources: Vec<_> = target
        .pch_sources()
        .into_iter()
        .map(|p| crate::paths::collapse(p))
        .collect();

    let mut objects = Vec::new();
    for source in target.sources(config) {
        let path_str = source.path.to_string_lossy();
        if path_str.contains("/Unity/unity_") && path_str.contains("_cxx.cxx") {
            continue;
        }
        if !source.language.is_compilable() {
            continue;
        }

        let resolved = if source.path.is_symlink() {
            crate::paths::resolve_to_real_path(&source.path)
        } else {
            crate::paths::collapse(&source.path)
        };
        if pch_sources.contains(&resolved) {
            continue;
        }

        objects.push(ctx.object_derivation_name(&target.name, &resolved));
    }

    // Objects contributed by linked object libraries.
    for item in target.link_items(config) {
        let LinkItem::Target(dep) = item else {
            continue;
        };
        if ctx.graph.kind(dep) != Some(TargetKind::ObjectLibrary) {
            continue;
        }
        let Some(dep_target) = ctx.project.target(dep) else {
            continue;
        };
        for source in dep_target.sources(config) {
            if source.language.is_compilable() {
                let resolved = crate::paths::collapse(&source.path);
                objects.push(ctx.object_derivation_name(dep, &resolved));
            }
        }
    }

    objects
}

struct LinkLibraries {
    libraries: Vec<String>,
    flags: Vec<String>,
}

fn internal_library_reference(ctx: &GenContext, dep: &str, kind: TargetKind) -> Option<String> {
    let deriv = ctx.link_derivation_name(dep);
    match kind {
        TargetKind::StaticLibrary => Some(format!("${{{deriv}}}")),
        TargetKind::SharedLibrary => Some(format!("${{{deriv}}}/lib{dep}.so")),
        TargetKind::ModuleLibrary => Some(format!("${{{deriv}}}/{dep}.so")),
        _ => None,
    }
}

/// Resolve the link implementation into library references and link
/// flags. With static dependencies in play, every transitive dependency
/// is laid out in topological order so each archive precedes the
/// archives it depends on.
fn process_libraries(ctx: &GenContext, target: &Target) -> LinkLibraries {
    let config = &ctx.config;
    let mut libraries: Vec<String> = Vec::new();
    let mut flags: Vec<String> = Vec::new();

    let direct_static: BTreeSet<&str> = target
        .link_items(config)
        .iter()
        .filter_map(|item| match item {
            LinkItem::Target(dep)
                if ctx.graph.kind(dep) == Some(TargetKind::StaticLibrary) =>
            {
                Some(dep.as_str())
            }
            _ => None,
        })
        .collect();
    let has_static = !direct_static.is_empty();

    for item in target.link_items(config) {
        match item {
            LinkItem::Package(name) => {
                let link_flags = packages::link_flags_for_target(name);
                if !link_flags.is_empty() {
                    flags.push(link_flags);
                } else if packages::nix_package_for_target(name).is_empty() {
                    // Unknown imported target: treat as a raw library.
                    let lib = name.rsplit("::").next().unwrap_or(name);
                    flags.push(format!("-l{lib}"));
                }
            }
            LinkItem::Target(dep) => {
                let Some(kind) = ctx.graph.kind(dep) else {
                    ctx.diag.target_warning(
                        &target.name,
                        format!("Link dependency '{dep}' is not a known target"),
                    );
                    continue;
                };
                // With static dependencies, archives are ordered below.
                if has_static && kind == TargetKind::StaticLibrary {
                    continue;
                }
                if let Some(reference) = internal_library_reference(ctx, dep, kind) {
                    libraries.push(reference);
                }
            }
            LinkItem::Library(raw) => {
                if !raw.ends_with(".nix") {
                    flags.push(format!("-l{raw}"));
                }
            }
        }
    }

    if has_static {
        order_static_libraries(ctx, target, &mut libraries);
    }

    LinkLibraries { libraries, flags }
}

/// Lay out all transitive internal libraries dependency-last: the
/// topological order is dependency-first, so after appending we reverse,
/// leaving each static archive ahead of everything it depends on.
fn order_static_libraries(ctx: &GenContext, target: &Target, libraries: &mut Vec<String>) {
    let order = ctx.graph.topological_order_for_linking(&target.name);
    let all_deps = ctx.graph.all_transitive_dependencies(&target.name);

    let mut already: BTreeSet<String> = libraries.iter().cloned().collect();

    for dep in &order {
        if dep == &target.name || !all_deps.contains(dep) {
            continue;
        }
        let Some(kind) = ctx.graph.kind(dep) else {
            continue;
        };
        if let Some(reference) = internal_library_reference(ctx, dep, kind) {
            if already.insert(reference.clone()) {
                libraries.push(reference);
            }
        }
    }

    libraries.reverse();
}

/// Build inputs: the compiler, mapped external packages, and every
/// shared library in the transitive closure (their presence lets the
/// toolchain wrapper set rpaths).
fn collect_build_inputs(ctx: &GenContext, target: &Target, compiler_pkg: &str) -> Vec<String> {
    let config = &ctx.config;
    let mut inputs: Vec<String> = vec![compiler_pkg.to_string()];

    let lib_packages = ctx.cache.library_dependencies(&target.name, config, || {
        crate::object::library_packages(target, config)
    });
    for package in lib_packages {
        if !inputs.contains(&package) {
            inputs.push(package);
        }
    }

    let mut direct_shared: BTreeSet<&str> = BTreeSet::new();
    for item in target.link_items(config) {
        if let LinkItem::Target(dep) = item {
            if matches!(
                ctx.graph.kind(dep),
                Some(TargetKind::SharedLibrary) | Some(TargetKind::ModuleLibrary)
            ) {
                let deriv = ctx.link_derivation_name(dep);
                if !inputs.contains(&deriv) {
                    inputs.push(deriv);
                }
                direct_shared.insert(dep.as_str());
            }
        }
    }

    for dep in ctx.graph.transitive_shared_libraries(&target.name) {
        if !direct_shared.contains(dep.as_str()) {
            let deriv = ctx.link_derivation_name(&dep);
            if !inputs.contains(&deriv) {
                inputs.push(deriv);
            }
        }
    }

    inputs
}

/// Probe builds copy their result back into the build tree and leave a
/// location file behind for the configure step to read.
fn write_try_compile_post_build(writer: &mut NixWriter, build_dir: &Path, target_name: &str) {
    let dir = shell_escape(&build_dir.to_string_lossy());
    let name = shell_escape(target_name);

    writer.write_multiline_line(3, &format!("COPY_DEST={dir}/{name}"));
    writer.write_multiline_line(3, "cp \"$out\" \"$COPY_DEST\"");
    writer.write_multiline_line(3, &format!("echo \"$COPY_DEST\" > {dir}/{name}_loc"));
}

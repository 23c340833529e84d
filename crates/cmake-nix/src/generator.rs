use crate::cache::CacheManager;
use crate::compiler::CompilerResolver;
use crate::custom_command;
use crate::diag::{Diagnostics, ProfileTimer};
use crate::external_project;
use crate::graph::DependencyGraph;
use crate::headers::HeaderRegistry;
use crate::install;
use crate::link;
use crate::object;
use crate::paths;
use anyhow::{bail, Result};
use nix_expr::generated_file::write_if_changed;
use nix_expr::{sanitize_identifier, NixWriter};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use target_model::prelude::{LinkItem, Project};

pub const DEFAULT_NIX: &str = "default.nix";

/// Marker in the build directory path identifying feature-probe builds.
const TRY_COMPILE_MARKER: &str = "CMakeScratch";

/// Everything one generation pass needs, owned for the duration of the
/// pass. The multi-config variant creates one context per configuration.
pub struct GenContext<'p> {
    pub project: &'p Project,
    pub config: String,
    /// Name suffix distinguishing configuration families (`_Debug`);
    /// empty for single-config output.
    pub suffix: String,
    pub cache: CacheManager,
    pub resolver: CompilerResolver,
    pub graph: DependencyGraph,
    pub diag: Diagnostics,
    pub headers: HeaderRegistry,
    /// Custom-command output path -> producing derivation name.
    pub custom_outputs: BTreeMap<PathBuf, String>,
    /// Object file path (as a traditional build would place it) ->
    /// producing derivation name.
    pub object_outputs: BTreeMap<PathBuf, String>,
    pub explicit_sources: bool,
}

impl<'p> GenContext<'p> {
    pub fn new(project: &'p Project, diag: Diagnostics) -> Self {
        let config = project.build_config().to_string();
        Self::for_config(project, diag, config, String::new())
    }

    pub fn for_config(
        project: &'p Project,
        diag: Diagnostics,
        config: String,
        suffix: String,
    ) -> Self {
        let graph = build_dependency_graph(project, &config);
        GenContext {
            project,
            config,
            suffix,
            cache: CacheManager::new(),
            resolver: CompilerResolver::new(project),
            graph,
            diag,
            headers: HeaderRegistry::new(),
            custom_outputs: BTreeMap::new(),
            object_outputs: BTreeMap::new(),
            explicit_sources: project.variable_on("NIX_EXPLICIT_SOURCES"),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.project.source_dir
    }

    pub fn build_dir(&self) -> &Path {
        &self.project.build_dir
    }

    /// Relative token from the build directory back to the source tree.
    pub fn project_source_rel_path(&self) -> String {
        paths::project_source_rel_path(self.source_dir(), self.build_dir())
    }

    pub fn is_try_compile(&self) -> bool {
        self.build_dir().to_string_lossy().contains(TRY_COMPILE_MARKER)
    }

    pub fn is_system(&self, path: &Path) -> bool {
        paths::is_system_path(path, &self.project.system_prefixes)
    }

    /// Derivation name for a target's link step: `link_<target>`.
    pub fn link_derivation_name(&self, target: &str) -> String {
        let key = format!("{}{}", target, self.suffix);
        self.cache.derivation_name(&key, "", || {
            let base = sanitize_identifier(&format!("link_{}{}", target, self.suffix));
            self.cache.unique_name(&base)
        })
    }

    /// Derivation name for one `(target, source)` compilation.
    pub fn object_derivation_name(&self, target: &str, source: &Path) -> String {
        let key = format!("{}{}", target, self.suffix);
        let source_str = source.to_string_lossy().into_owned();
        self.cache.derivation_name(&key, &source_str, || {
            let file_name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            // Disambiguate by parent directory unless the source sits at
            // the project root.
            let rel = paths::relative_to(source, self.source_dir())
                .unwrap_or_else(|| source.to_path_buf());
            let parent = rel
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let unique = if parent.is_empty() || parent == "." {
                file_name
            } else {
                format!("{parent}_{file_name}")
            };

            let base = sanitize_identifier(&format!(
                "{}_{}_o{}",
                target,
                unique.replace(['.', '-'], "_"),
                self.suffix
            ));
            self.cache.unique_name(&base)
        })
    }

    /// Compiler packages per target, keyed by target name; used for
    /// custom-command build inputs.
    pub fn compiler_packages_by_target(&self) -> BTreeMap<String, String> {
        self.project
            .targets
            .iter()
            .map(|t| {
                let lang = link::primary_language(t, &self.config);
                (t.name.clone(), self.resolver.compiler_package(lang))
            })
            .collect()
    }
}

/// Edges run from each target to the internal targets it links against.
pub fn build_dependency_graph(project: &Project, config: &str) -> DependencyGraph {
    let mut graph = DependencyGraph::new();

    for target in &project.targets {
        graph.add_target(&target.name, target.kind);
    }
    for target in &project.targets {
        for item in target.link_items(config) {
            if let LinkItem::Target(dep) = item {
                graph.add_edge(&target.name, dep);
            }
        }
    }

    graph
}

/// Single-configuration driver: owns a context and writes the complete
/// `default.nix`.
pub struct Generator<'p> {
    pub ctx: GenContext<'p>,
}

impl<'p> Generator<'p> {
    pub fn new(project: &'p Project) -> Self {
        Generator {
            ctx: GenContext::new(project, Diagnostics::new()),
        }
    }

    pub fn with_diagnostics(project: &'p Project, diag: Diagnostics) -> Self {
        Generator {
            ctx: GenContext::new(project, diag),
        }
    }

    /// Generate the Nix expression as a string.
    pub fn generate_to_string(&mut self) -> Result<String> {
        let _timer = ProfileTimer::new("generate");
        let ctx = &mut self.ctx;

        external_project::check_for_external_project_usage(ctx.project, &ctx.diag);

        if let Some(cycle) = ctx.graph.find_cycle() {
            bail!(
                "Circular dependency between targets: {}",
                cycle.join(" -> ")
            );
        }

        // Collect custom commands before object emission so generated
        // sources and headers resolve to their producing derivations.
        let commands = {
            let _t = ProfileTimer::new("collect_custom_commands");
            custom_command::collect_custom_commands(ctx.project, &ctx.config, &ctx.cache, &ctx.suffix)
        };
        custom_command::detect_cycles(&commands)?;
        for info in commands.values() {
            for output in &info.outputs {
                ctx.custom_outputs
                    .insert(output.clone(), info.derivation_name.clone());
            }
        }

        let mut writer = NixWriter::new();
        writer.write_comment("Generated by the Nix backend; do not edit.");
        writer.write_line("with import <nixpkgs> {};");
        writer.write_line("with pkgs;");
        writer.write_line("with lib;");
        writer.blank_line();
        writer.start_let_binding();

        write_helper_prelude(&mut writer);

        // Objects go through a buffer: emitting them populates the
        // external-header registry, whose derivations must appear first.
        let object_section = {
            let _t = ProfileTimer::new("write_object_derivations");
            let mut object_writer = NixWriter::new();
            object::write_object_derivations(&mut object_writer, ctx);
            object_writer.into_string()
        };

        ctx.headers.write_derivations(&mut writer);
        writer.push_raw(&object_section);

        {
            let _t = ProfileTimer::new("write_custom_command_derivations");
            let packages = ctx.compiler_packages_by_target();
            custom_command::write_custom_command_derivations(
                &mut writer,
                ctx.project,
                &commands,
                &ctx.custom_outputs,
                &ctx.object_outputs,
                &packages,
                &ctx.diag,
            );
        }

        {
            let _t = ProfileTimer::new("write_link_derivations");
            link::write_link_derivations(&mut writer, ctx);
        }

        {
            let _t = ProfileTimer::new("write_install_rules");
            install::write_install_rules(&mut writer, ctx);
        }

        writer.end_let_binding();
        writer.start_attribute_set(0);

        for target in &ctx.project.targets {
            if target.kind.is_linkable() {
                let derivation = ctx.link_derivation_name(&target.name);
                writer.write_indented(1, &format!("\"{}\" = {};", target.name, derivation));
            }
        }
        install::write_install_outputs(&mut writer, ctx);

        writer.end_attribute_set(0);
        Ok(writer.into_string())
    }

    /// Generate and write `default.nix` into the build directory,
    /// touching the file only when its contents changed.
    pub fn write_default_nix(&mut self) -> Result<PathBuf> {
        let contents = self.generate_to_string()?;
        let path = self.ctx.build_dir().join(DEFAULT_NIX);
        write_if_changed(&path, &contents)?;
        Ok(path)
    }
}

/// The compile helper shared by every object derivation. Selects the
/// compiler binary from the package (wrapped toolchains keep their
/// wrapper), locates the source inside the unpacked tree, and produces
/// `$out` as the object file.
const CC_HELPER: &str = r#"  cmakeNixCC = {
    name,
    src,
    compiler ? gcc,
    flags ? "",
    source,
    buildInputs ? []
  }: stdenv.mkDerivation {
    inherit name src buildInputs;
    dontFixup = true;
    buildPhase = ''
      mkdir -p "$(dirname "$out")"
      sourceFile="${source}"
      if [ "${compiler}" = "${stdenv.cc}" ] || [ "${compiler}" = "${pkgsi686Linux.stdenv.cc}" ]; then
        if [[ "$sourceFile" == *.cpp ]] || [[ "$sourceFile" == *.cxx ]] || [[ "$sourceFile" == *.cc ]] || [[ "$sourceFile" == *.C ]]; then
          compilerCmd="${compiler}/bin/g++"
        else
          compilerCmd="${compiler}/bin/gcc"
        fi
      else
        if [ "${compiler}" = "${gcc}" ] || [ "${compiler}" = "${pkgsi686Linux.gcc}" ]; then
          if [[ "$sourceFile" == *.cpp ]] || [[ "$sourceFile" == *.cxx ]] || [[ "$sourceFile" == *.cc ]] || [[ "$sourceFile" == *.C ]]; then
            compilerBin="g++"
          else
            compilerBin="gcc"
          fi
        elif [ "${compiler}" = "${clang}" ] || [ "${compiler}" = "${pkgsi686Linux.clang}" ]; then
          if [[ "$sourceFile" == *.cpp ]] || [[ "$sourceFile" == *.cxx ]] || [[ "$sourceFile" == *.cc ]] || [[ "$sourceFile" == *.C ]]; then
            compilerBin="clang++"
          else
            compilerBin="clang"
          fi
        elif [ "${compiler}" = "${gfortran}" ] || [ "${compiler}" = "${pkgsi686Linux.gfortran}" ]; then
          compilerBin="gfortran"
        else
          compilerBin="${compiler.pname or "cc"}"
        fi
        compilerCmd="${compiler}/bin/$compilerBin"
      fi
      if [[ "$sourceFile" == /* ]] || [[ "$sourceFile" == *"\$"* ]]; then
        srcFile="$sourceFile"
      elif [[ -f "$sourceFile" ]]; then
        srcFile="$sourceFile"
      elif [[ -f "$(basename "$src")/$sourceFile" ]]; then
        srcFile="$(basename "$src")/$sourceFile"
      else
        echo "Error: Cannot find source file $sourceFile"
        exit 1
      fi
      $compilerCmd -c ${flags} "$srcFile" -o "$out"
    '';
    installPhase = "true";
  };
"#;

/// The link helper shared by every link derivation. Unix naming only:
/// static archives via `ar rcs`, `lib*.so[.version]` for shared
/// libraries with symlinks, bare `*.so` for modules.
const LD_HELPER: &str = r#"  cmakeNixLD = {
    name,
    type ? "executable",
    objects,
    compiler ? gcc,
    compilerCommand ? null,
    flags ? "",
    libraries ? [],
    buildInputs ? [],
    version ? null,
    soversion ? null,
    postBuildPhase ? ""
  }: stdenv.mkDerivation {
    inherit name objects buildInputs;
    dontUnpack = true;
    buildPhase =
      if type == "static" then ''
        mkdir -p "$(dirname "$out")"
        ar rcs "$out" $objects
      '' else if type == "shared" || type == "module" then ''
        mkdir -p $out
        if [ "${compiler}" = "${stdenv.cc}" ] || [ "${compiler}" = "${pkgsi686Linux.stdenv.cc}" ]; then
          compilerCmd="${if compilerCommand != null then compilerCommand else "${compiler}/bin/gcc"}"
        else
          compilerBin="${if compilerCommand != null then
            compilerCommand
          else if compiler == gcc || compiler == pkgsi686Linux.gcc then
            "gcc"
          else if compiler == clang || compiler == pkgsi686Linux.clang then
            "clang"
          else if compiler == gfortran || compiler == pkgsi686Linux.gfortran then
            "gfortran"
          else
            compiler.pname or "cc"
          }";
          compilerCmd="${compiler}/bin/$compilerBin"
        fi
        libname="${if type == "module" then name else "lib" + name}.so"
        ${if version != null && type != "module" then ''
          libname="lib${name}.so.${version}"
        '' else ""}
        $compilerCmd -shared $objects ${flags} ${lib.concatMapStringsSep " " (l: l) libraries} -o "$out/$libname"
        ${if version != null && type != "module" then ''
          ln -sf "$libname" "$out/lib${name}.so"
          ${if soversion != null then ''
            ln -sf "$libname" "$out/lib${name}.so.${soversion}"
          '' else ""}
        '' else ""}
      '' else ''
        mkdir -p "$(dirname "$out")"
        if [ "${compiler}" = "${stdenv.cc}" ] || [ "${compiler}" = "${pkgsi686Linux.stdenv.cc}" ]; then
          compilerCmd="${if compilerCommand != null then compilerCommand else "${compiler}/bin/gcc"}"
        else
          compilerBin="${if compilerCommand != null then
            compilerCommand
          else if compiler == gcc || compiler == pkgsi686Linux.gcc then
            "gcc"
          else if compiler == clang || compiler == pkgsi686Linux.clang then
            "clang"
          else if compiler == gfortran || compiler == pkgsi686Linux.gfortran then
            "gfortran"
          else
            compiler.pname or "cc"
          }";
          compilerCmd="${compiler}/bin/$compilerBin"
        fi
        $compilerCmd $objects ${flags} ${lib.concatMapStringsSep " " (l: l) libraries} -o "$out"
      '';
    inherit postBuildPhase;
    installPhase = "true";
  };
"#;

pub fn write_helper_prelude(writer: &mut NixWriter) {
    writer.write_indented_comment(1, "Shared compile and link helpers");
    writer.push_raw(CC_HELPER);
    writer.blank_line();
    writer.push_raw(LD_HELPER);
    writer.blank_line();
}

#[cfg(test)]
mod tests {
    use super::*;
    use target_model::prelude::TargetKind;

    fn project(json: &str) -> Project {
        Project::from_json(json).unwrap()
    }

    #[test]
    fn test_dependency_graph_edges() {
        let project = project(
            r#"{ "name": "p", "source_dir": "/p", "build_dir": "/p",
                 "targets": [
                   { "name": "app", "kind": "executable",
                     "link_items": [ { "target": "core" }, { "library": "m" } ] },
                   { "name": "core", "kind": "static-library" }
                 ] }"#,
        );
        let graph = build_dependency_graph(&project, "Release");
        assert_eq!(graph.kind("core"), Some(TargetKind::StaticLibrary));
        let deps: Vec<&str> = graph.direct_dependencies("app").collect();
        assert_eq!(deps, ["core"]);
    }

    #[test]
    fn test_link_name_is_stable_and_unique() {
        let project = project(
            r#"{ "name": "p", "source_dir": "/p", "build_dir": "/p",
                 "targets": [ { "name": "app", "kind": "executable" } ] }"#,
        );
        let ctx = GenContext::new(&project, Diagnostics::new());
        assert_eq!(ctx.link_derivation_name("app"), "link_app");
        assert_eq!(ctx.link_derivation_name("app"), "link_app");
    }

    #[test]
    fn test_object_name_from_root_source() {
        let project = project(
            r#"{ "name": "p", "source_dir": "/p", "build_dir": "/p",
                 "targets": [ { "name": "hello", "kind": "executable" } ] }"#,
        );
        let ctx = GenContext::new(&project, Diagnostics::new());
        assert_eq!(
            ctx.object_derivation_name("hello", Path::new("/p/main.c")),
            "hello_main_c_o"
        );
        assert_eq!(
            ctx.object_derivation_name("hello", Path::new("/p/src/util.cpp")),
            "hello_src_util_cpp_o"
        );
    }

    #[test]
    fn test_object_name_collision_gets_suffix() {
        let project = project(
            r#"{ "name": "p", "source_dir": "/p", "build_dir": "/p",
                 "targets": [ { "name": "t", "kind": "executable" } ] }"#,
        );
        let ctx = GenContext::new(&project, Diagnostics::new());
        // Same basename from dirs that sanitize identically.
        let first = ctx.object_derivation_name("t", Path::new("/p/a.b/x.c"));
        let second = ctx.object_derivation_name("t", Path::new("/p/a-b/x.c"));
        assert_eq!(first, "t_a_b_x_c_o");
        assert_eq!(second, "t_a_b_x_c_o_2");
    }

    #[test]
    fn test_reserved_target_name_sanitized() {
        let project = project(
            r#"{ "name": "p", "source_dir": "/p", "build_dir": "/p",
                 "targets": [ { "name": "let", "kind": "executable" } ] }"#,
        );
        let ctx = GenContext::new(&project, Diagnostics::new());
        // "link_let" is itself a valid identifier; a target name that is
        // exactly a reserved word still produces one.
        assert_eq!(ctx.link_derivation_name("let"), "link_let");
    }

    #[test]
    fn test_config_suffix_in_names() {
        let project = project(
            r#"{ "name": "p", "source_dir": "/p", "build_dir": "/p",
                 "targets": [ { "name": "app", "kind": "executable" } ] }"#,
        );
        let ctx = GenContext::for_config(
            &project,
            Diagnostics::new(),
            "Debug".to_string(),
            "_Debug".to_string(),
        );
        assert_eq!(ctx.link_derivation_name("app"), "link_app_Debug");
        assert_eq!(
            ctx.object_derivation_name("app", Path::new("/p/main.c")),
            "app_main_c_o_Debug"
        );
    }

    #[test]
    fn test_try_compile_detection() {
        let project = project(
            r#"{ "name": "p", "source_dir": "/p",
                 "build_dir": "/p/CMakeFiles/CMakeScratch/TryCompile-x" }"#,
        );
        let ctx = GenContext::new(&project, Diagnostics::new());
        assert!(ctx.is_try_compile());
    }
}

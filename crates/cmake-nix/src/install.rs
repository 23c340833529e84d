use crate::generator::GenContext;
use crate::paths::shell_escape;
use nix_expr::NixWriter;
use target_model::prelude::{Target, TargetKind};

fn install_targets<'a>(ctx: &'a GenContext) -> Vec<&'a Target> {
    ctx.project
        .targets
        .iter()
        .filter(|t| t.has_install_rules())
        .collect()
}

fn default_destination(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Executable => "bin",
        TargetKind::StaticLibrary | TargetKind::SharedLibrary | TargetKind::ModuleLibrary => "lib",
        TargetKind::ObjectLibrary => "share",
    }
}

/// Emit `<link>_install` derivations copying each installed target's
/// link output to its destination under the prefix.
pub fn write_install_rules(writer: &mut NixWriter, ctx: &GenContext) {
    let targets = install_targets(ctx);
    if targets.is_empty() {
        return;
    }

    writer.write_indented_comment(1, "Install derivations");

    for target in targets {
        let deriv_name = ctx.link_derivation_name(&target.name);
        let install_name = format!("{deriv_name}_install");

        let destination = target
            .install_rules
            .first()
            .map(|rule| rule.destination.as_str())
            .unwrap_or_else(|| default_destination(target.kind));
        let dest = shell_escape(destination);
        let name = shell_escape(&target.name);

        writer.write_indented(1, &format!("{install_name} = stdenv.mkDerivation {{"));
        writer.write_attribute(2, "name", &format!("{}-install", target.name));
        writer.write_raw_attribute(2, "src", &deriv_name);
        writer.write_attribute_bool(2, "dontUnpack", true);
        writer.write_attribute_bool(2, "dontBuild", true);
        writer.write_attribute_bool(2, "dontConfigure", true);
        writer.start_multiline_attribute(2, "installPhase");
        writer.write_multiline_line(3, &format!("mkdir -p $out/{dest}"));

        match target.kind {
            TargetKind::Executable => {
                writer.write_multiline_line(3, &format!("cp $src $out/{dest}/{name}"));
            }
            TargetKind::SharedLibrary | TargetKind::ModuleLibrary => {
                writer.write_multiline_line(
                    3,
                    &format!("cp -r $src/* $out/{dest}/ 2>/dev/null || true"),
                );
            }
            TargetKind::StaticLibrary => {
                let lib_name = shell_escape(&format!("lib{}.a", target.name));
                writer.write_multiline_line(3, &format!("cp $src $out/{dest}/{lib_name}"));
            }
            TargetKind::ObjectLibrary => {
                writer.write_multiline_line(
                    3,
                    &format!("cp -r $src $out/{dest}/ 2>/dev/null || true"),
                );
            }
        }

        writer.end_multiline_attribute(2);
        writer.write_indented(1, "};");
        writer.blank_line();
    }
}

/// Top-level attribute entries exposing each installed target as
/// `"<target>_install"`.
pub fn write_install_outputs(writer: &mut NixWriter, ctx: &GenContext) {
    for target in install_targets(ctx) {
        let deriv_name = ctx.link_derivation_name(&target.name);
        writer.write_indented(
            1,
            &format!("\"{}_install\" = {}_install;", target.name, deriv_name),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostics;
    use target_model::prelude::Project;

    fn project_with_install() -> Project {
        Project::from_json(
            r#"{ "name": "p", "source_dir": "/p", "build_dir": "/p",
                 "targets": [
                   { "name": "tool", "kind": "executable",
                     "sources": [ { "path": "/p/main.c", "language": "C" } ],
                     "install_rules": [ { "destination": "bin" } ] },
                   { "name": "core", "kind": "static-library",
                     "sources": [ { "path": "/p/core.c", "language": "C" } ],
                     "install_rules": [ { "destination": "lib" } ] },
                   { "name": "plain", "kind": "executable" }
                 ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_only_targets_with_rules() {
        let project = project_with_install();
        let ctx = GenContext::new(&project, Diagnostics::new());
        let names: Vec<&str> = install_targets(&ctx).iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["tool", "core"]);
    }

    #[test]
    fn test_install_rule_emission() {
        let project = project_with_install();
        let ctx = GenContext::new(&project, Diagnostics::new());
        let mut writer = NixWriter::new();
        write_install_rules(&mut writer, &ctx);
        let out = writer.into_string();

        assert!(out.contains("link_tool_install = stdenv.mkDerivation {"));
        assert!(out.contains("name = \"tool-install\";"));
        assert!(out.contains("src = link_tool;"));
        assert!(out.contains("mkdir -p $out/bin"));
        assert!(out.contains("cp $src $out/bin/tool"));
        // Static archives install under the conventional lib name.
        assert!(out.contains("cp $src $out/lib/libcore.a"));
        assert!(!out.contains("plain"));
    }

    #[test]
    fn test_install_outputs() {
        let project = project_with_install();
        let ctx = GenContext::new(&project, Diagnostics::new());
        let mut writer = NixWriter::new();
        write_install_outputs(&mut writer, &ctx);
        let out = writer.into_string();

        assert!(out.contains("\"tool_install\" = link_tool_install;"));
        assert!(out.contains("\"core_install\" = link_core_install;"));
    }

    #[test]
    fn test_default_destination() {
        assert_eq!(default_destination(TargetKind::Executable), "bin");
        assert_eq!(default_destination(TargetKind::SharedLibrary), "lib");
        assert_eq!(default_destination(TargetKind::ObjectLibrary), "share");
    }
}

use crate::config::DEFAULT_CONFIGURATIONS;
use crate::custom_command;
use crate::diag::Diagnostics;
use crate::generator::{write_helper_prelude, GenContext, DEFAULT_NIX};
use crate::install;
use crate::link;
use crate::object;
use anyhow::{bail, Result};
use nix_expr::generated_file::write_if_changed;
use nix_expr::NixWriter;
use std::path::PathBuf;
use target_model::prelude::Project;

/// Multi-configuration driver: one derivation family per configuration,
/// names suffixed `_<config>`. The default configuration is additionally
/// exposed under the bare target names.
pub struct MultiConfigGenerator<'p> {
    project: &'p Project,
    diag: Diagnostics,
}

impl<'p> MultiConfigGenerator<'p> {
    pub fn new(project: &'p Project) -> Self {
        MultiConfigGenerator {
            project,
            diag: Diagnostics::new(),
        }
    }

    pub fn with_diagnostics(project: &'p Project, diag: Diagnostics) -> Self {
        MultiConfigGenerator { project, diag }
    }

    pub fn configurations(&self) -> Vec<String> {
        if self.project.configurations.is_empty() {
            DEFAULT_CONFIGURATIONS.iter().map(|s| s.to_string()).collect()
        } else {
            self.project.configurations.clone()
        }
    }

    pub fn default_configuration(&self) -> String {
        self.project
            .config
            .clone()
            .unwrap_or_else(|| self.configurations()[0].clone())
    }

    pub fn generate_to_string(&mut self) -> Result<String> {
        let configurations = self.configurations();
        let default_config = self.default_configuration();

        crate::external_project::check_for_external_project_usage(self.project, &self.diag);

        let mut writer = NixWriter::new();
        writer.write_comment("Generated by the Nix backend (multi-config); do not edit.");
        writer.write_line("with import <nixpkgs> {};");
        writer.write_line("with pkgs;");
        writer.write_line("with lib;");
        writer.blank_line();
        writer.start_let_binding();
        write_helper_prelude(&mut writer);

        let mut contexts: Vec<GenContext<'p>> = Vec::new();

        for config in &configurations {
            let mut ctx = GenContext::for_config(
                self.project,
                self.diag.clone(),
                config.clone(),
                format!("_{config}"),
            );

            if let Some(cycle) = ctx.graph.find_cycle() {
                bail!(
                    "Circular dependency between targets: {}",
                    cycle.join(" -> ")
                );
            }

            let suffix = ctx.suffix.clone();
            let commands =
                custom_command::collect_custom_commands(self.project, config, &ctx.cache, &suffix);
            custom_command::detect_cycles(&commands)?;
            for info in commands.values() {
                ctx.custom_outputs
                    .insert(info.primary_output.clone(), info.derivation_name.clone());
                for output in &info.outputs {
                    ctx.custom_outputs
                        .insert(output.clone(), info.derivation_name.clone());
                }
            }

            writer.write_indented_comment(1, &format!("Configuration: {config}"));

            let object_section = {
                let mut object_writer = NixWriter::new();
                object::write_object_derivations(&mut object_writer, &mut ctx);
                object_writer.into_string()
            };
            ctx.headers.write_derivations(&mut writer);
            writer.push_raw(&object_section);

            let packages = ctx.compiler_packages_by_target();
            custom_command::write_custom_command_derivations(
                &mut writer,
                self.project,
                &commands,
                &ctx.custom_outputs,
                &ctx.object_outputs,
                &packages,
                &ctx.diag,
            );

            link::write_link_derivations(&mut writer, &ctx);
            install::write_install_rules(&mut writer, &ctx);

            contexts.push(ctx);
        }

        writer.end_let_binding();
        writer.start_attribute_set(0);

        for ctx in &contexts {
            for target in &self.project.targets {
                if !target.kind.is_linkable() {
                    continue;
                }
                let derivation = ctx.link_derivation_name(&target.name);
                writer.write_indented(
                    1,
                    &format!("\"{}_{}\" = {};", target.name, ctx.config, derivation),
                );
                if ctx.config == default_config {
                    writer.write_indented(
                        1,
                        &format!("\"{}\" = {};", target.name, derivation),
                    );
                }
            }

            for target in &self.project.targets {
                if target.has_install_rules() {
                    let derivation = ctx.link_derivation_name(&target.name);
                    writer.write_indented(
                        1,
                        &format!(
                            "\"{}_install_{}\" = {}_install;",
                            target.name, ctx.config, derivation
                        ),
                    );
                }
            }
        }

        writer.end_attribute_set(0);
        Ok(writer.into_string())
    }

    pub fn write_default_nix(&mut self) -> Result<PathBuf> {
        let contents = self.generate_to_string()?;
        let path = self.project.build_dir.join(DEFAULT_NIX);
        write_if_changed(&path, &contents)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project() -> Project {
        Project::from_json(
            r#"{ "name": "p", "source_dir": "/p", "build_dir": "/p",
                 "configurations": ["Debug", "Release"],
                 "targets": [
                   { "name": "app", "kind": "executable",
                     "sources": [ { "path": "/p/main.c", "language": "C" } ] }
                 ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_configurations_from_model() {
        let project = sample_project();
        let generator = MultiConfigGenerator::new(&project);
        assert_eq!(generator.configurations(), ["Debug", "Release"]);
        assert_eq!(generator.default_configuration(), "Debug");
    }

    #[test]
    fn test_default_configurations_fallback() {
        let mut project = sample_project();
        project.configurations.clear();
        let generator = MultiConfigGenerator::new(&project);
        assert_eq!(
            generator.configurations(),
            ["Debug", "Release", "RelWithDebInfo", "MinSizeRel"]
        );
    }

    #[test]
    fn test_generates_suffixed_families() {
        let project = sample_project();
        let mut generator = MultiConfigGenerator::new(&project);
        let out = generator.generate_to_string().unwrap();

        assert!(out.contains("app_main_c_o_Debug = cmakeNixCC {"));
        assert!(out.contains("app_main_c_o_Release = cmakeNixCC {"));
        assert!(out.contains("link_app_Debug = cmakeNixLD {"));
        assert!(out.contains("link_app_Release = cmakeNixLD {"));
        assert!(out.contains("\"app_Debug\" = link_app_Debug;"));
        assert!(out.contains("\"app_Release\" = link_app_Release;"));
        // Default config doubles under the bare name.
        assert!(out.contains("\"app\" = link_app_Debug;"));

        // Per-config optimization flags land in each family.
        assert!(out.contains("flags = \"-g -O0\";"));
        assert!(out.contains("flags = \"-O3 -DNDEBUG\";"));
    }
}

use crate::cache::CacheManager;
use crate::diag::Diagnostics;
use crate::paths;
use anyhow::{bail, Result};
use nix_expr::{escape_indented_string, sanitize_identifier, NixWriter};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use target_model::prelude::{CustomCommand, Project};

/// One collected custom command, keyed in the handler by its primary
/// output path.
#[derive(Debug, Clone)]
pub struct CustomCommandInfo {
    pub primary_output: PathBuf,
    pub outputs: Vec<PathBuf>,
    pub inputs: Vec<PathBuf>,
    pub commands: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub comment: Option<String>,
    pub target_name: String,
    pub derivation_name: String,
}

/// Walk every target's pre-build, pre-link and post-build lists plus
/// per-source attached commands, keyed by primary output. The first
/// command claiming an output wins; later duplicates are skipped.
/// `name_suffix` keeps names distinct across configuration families.
pub fn collect_custom_commands(
    project: &Project,
    config: &str,
    cache: &CacheManager,
    name_suffix: &str,
) -> BTreeMap<PathBuf, CustomCommandInfo> {
    let mut commands = BTreeMap::new();

    for target in &project.targets {
        let phases = target
            .pre_build
            .iter()
            .chain(target.pre_link.iter())
            .chain(target.post_build.iter());
        for cc in phases {
            collect_one(cc, &target.name, cache, name_suffix, &mut commands);
        }

        for source in target.sources(config) {
            if let Some(cc) = &source.custom_command {
                collect_one(cc, &target.name, cache, name_suffix, &mut commands);
            }
        }
    }

    commands
}

fn collect_one(
    cc: &CustomCommand,
    target_name: &str,
    cache: &CacheManager,
    name_suffix: &str,
    commands: &mut BTreeMap<PathBuf, CustomCommandInfo>,
) {
    let Some(primary) = cc.primary_output() else {
        return;
    };
    if commands.contains_key(primary) {
        return;
    }

    let file_name = primary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "command".to_string());
    let derivation_name =
        cache.unique_name(&sanitize_identifier(&format!("custom_{file_name}{name_suffix}")));

    commands.insert(
        primary.clone(),
        CustomCommandInfo {
            primary_output: primary.clone(),
            outputs: cc.outputs.clone(),
            inputs: cc.inputs.clone(),
            commands: cc.commands.clone(),
            working_dir: cc.working_dir.clone(),
            comment: cc.comment.clone(),
            target_name: target_name.to_string(),
            derivation_name,
        },
    );
}

/// Check the command graph for cycles. Edges run from a command to the
/// commands producing its inputs; any cycle aborts generation.
pub fn detect_cycles(commands: &BTreeMap<PathBuf, CustomCommandInfo>) -> Result<()> {
    // Index every declared output, not just primaries, so a command
    // consuming a secondary output still forms an edge.
    let mut producer: HashMap<&Path, &Path> = HashMap::new();
    for (primary, info) in commands {
        for output in &info.outputs {
            producer.entry(output.as_path()).or_insert(primary.as_path());
        }
    }

    let mut visited: HashSet<&Path> = HashSet::new();
    let mut on_stack: Vec<&Path> = Vec::new();

    fn dfs<'a>(
        node: &'a Path,
        commands: &'a BTreeMap<PathBuf, CustomCommandInfo>,
        producer: &HashMap<&'a Path, &'a Path>,
        visited: &mut HashSet<&'a Path>,
        on_stack: &mut Vec<&'a Path>,
    ) -> Result<()> {
        visited.insert(node);
        on_stack.push(node);

        if let Some(info) = commands.get(node) {
            for input in &info.inputs {
                let Some(&dep) = producer.get(input.as_path()) else {
                    continue;
                };
                if on_stack.contains(&dep) {
                    let start = on_stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut path: Vec<String> = on_stack[start..]
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect();
                    path.push(dep.display().to_string());
                    bail!(
                        "Circular dependency in custom commands detected: {}",
                        path.join(" -> ")
                    );
                }
                if !visited.contains(dep) {
                    dfs(dep, commands, producer, visited, on_stack)?;
                }
            }
        }

        on_stack.pop();
        Ok(())
    }

    for primary in commands.keys() {
        if !visited.contains(primary.as_path()) {
            dfs(primary.as_path(), commands, &producer, &mut visited, &mut on_stack)?;
        }
    }

    Ok(())
}

/// Absolute invocations of cmake are rewritten to the bare name so the
/// Nix-provided package serves them.
fn rewrite_cmake_invocation(command: &str) -> String {
    let trimmed = command.trim_start();
    let (first, rest) = match trimmed.find(char::is_whitespace) {
        Some(pos) => (&trimmed[..pos], &trimmed[pos..]),
        None => (trimmed, ""),
    };

    if first.ends_with("/cmake") {
        format!("cmake{rest}")
    } else {
        command.to_string()
    }
}

/// Emit one derivation per collected command, in primary-output order.
///
/// Build inputs reference the owning target's compiler package, cmake
/// itself (generated rules routinely shell out to `cmake -E`), and any
/// derivation whose outputs this command consumes.
#[allow(clippy::too_many_arguments)]
pub fn write_custom_command_derivations(
    writer: &mut NixWriter,
    project: &Project,
    commands: &BTreeMap<PathBuf, CustomCommandInfo>,
    custom_outputs: &BTreeMap<PathBuf, String>,
    object_outputs: &BTreeMap<PathBuf, String>,
    compiler_packages: &BTreeMap<String, String>,
    diag: &Diagnostics,
) {
    if commands.is_empty() {
        return;
    }

    writer.write_indented_comment(1, "Custom command derivations");

    for info in commands.values() {
        crate::diag::debug(format!(
            "Writing custom command derivation: {}",
            info.derivation_name
        ));

        writer.write_indented(1, &format!("{} = stdenv.mkDerivation {{", info.derivation_name));
        writer.write_attribute(2, "name", &info.derivation_name);
        writer.write_raw_attribute(2, "src", &project_src_token(project));

        let compiler_package = compiler_packages
            .get(&info.target_name)
            .map(|s| s.as_str())
            .unwrap_or("gcc");
        let mut build_inputs = vec!["cmake".to_string(), compiler_package.to_string()];
        for input in &info.inputs {
            if let Some(dep) = custom_outputs.get(input) {
                if dep != &info.derivation_name && !build_inputs.contains(dep) {
                    build_inputs.push(dep.clone());
                }
            }
            if let Some(dep) = object_outputs.get(input) {
                if !build_inputs.contains(dep) {
                    build_inputs.push(dep.clone());
                }
            }
        }
        writer.write_list_attribute(2, "buildInputs", &build_inputs);

        writer.write_attribute_bool(2, "dontConfigure", true);

        writer.start_multiline_attribute(2, "buildPhase");
        if let Some(comment) = &info.comment {
            writer.write_multiline_line(3, &format!("# {comment}"));
        }
        writer.write_multiline_line(3, "mkdir -p $out");

        let working_dir = info
            .working_dir
            .as_deref()
            .unwrap_or(project.build_dir.as_path());
        if let Some(rel) = paths::relative_to(working_dir, &project.source_dir) {
            if !paths::is_outside_tree(&rel) && rel.as_os_str() != "." && !rel.as_os_str().is_empty()
            {
                writer.write_multiline_line(3, &format!("mkdir -p {}", rel.display()));
                writer.write_multiline_line(3, &format!("cd {}", rel.display()));
            }
        }

        for command in &info.commands {
            let line = rewrite_cmake_invocation(command);
            writer.write_multiline_line(3, &escape_indented_string(&line));
        }

        for output in &info.outputs {
            let rel = paths::relative_to(output, &project.build_dir)
                .filter(|r| !paths::is_outside_tree(r))
                .unwrap_or_else(|| {
                    PathBuf::from(output.file_name().map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default())
                });
            if rel.as_os_str().is_empty() {
                diag.target_warning(
                    &info.target_name,
                    format!("Custom command output has no usable path: {}", output.display()),
                );
                continue;
            }
            if let Some(parent) = rel.parent() {
                if !parent.as_os_str().is_empty() {
                    writer.write_multiline_line(3, &format!("mkdir -p $out/{}", parent.display()));
                }
            }
            let name = rel
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            writer.write_multiline_line(
                3,
                &format!("cp {} $out/{} || true", name, rel.display()),
            );
        }
        writer.end_multiline_attribute(2);

        writer.write_attribute(2, "installPhase", "true");
        writer.write_indented(1, "};");
        writer.blank_line();
    }
}

fn project_src_token(project: &Project) -> String {
    paths::project_source_rel_path(&project.source_dir, &project.build_dir)
}

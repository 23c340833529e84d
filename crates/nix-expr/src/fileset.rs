use crate::escape::escape_nix_string;
use crate::writer::NixWriter;

/// Whether a project-relative path needs the string-concatenation form
/// inside a fileset expression instead of a bare path token.
fn needs_quoting(path: &str) -> bool {
    path.chars().any(|c| {
        c == ' ' || c == '\'' || c == '"' || c == '$' || c == '\\' || !c.is_ascii()
    })
}

fn path_token(root: &str, file: &str) -> String {
    if needs_quoting(file) {
        format!("({} + \"/{}\")", root, escape_nix_string(file))
    } else {
        format!("{root}/{file}")
    }
}

fn maybe_missing_token(root: &str, file: &str) -> String {
    if needs_quoting(file) {
        format!(
            "(fileset.maybeMissing ({} + \"/{}\"))",
            root,
            escape_nix_string(file)
        )
    } else {
        format!("(fileset.maybeMissing {root}/{file})")
    }
}

/// Emit a `src = fileset.toSource { ... };` attribute covering exactly
/// the given files. Generated files are wrapped in `maybeMissing` so
/// evaluation succeeds before they exist.
///
/// With no files at all the whole root becomes the source.
pub fn write_fileset_source(
    writer: &mut NixWriter,
    level: usize,
    root: &str,
    existing: &[String],
    generated: &[String],
) {
    if existing.is_empty() && generated.is_empty() {
        writer.write_raw_attribute(level, "src", root);
        return;
    }

    writer.write_indented(level, "src = fileset.toSource {");
    writer.write_raw_attribute(level + 1, "root", root);
    writer.write_indented(level + 1, "fileset = fileset.unions [");
    for file in existing {
        writer.write_indented(level + 2, &path_token(root, file));
    }
    for file in generated {
        writer.write_indented(level + 2, &maybe_missing_token(root, file));
    }
    writer.write_indented(level + 1, "];");
    writer.write_indented(level, "};");
}

use crate::escape::escape_nix_string;

/// Spaces per indentation level; generated Nix follows the community
/// two-space convention.
const SPACES_PER_INDENT: usize = 2;

/// A stateful writer producing an indented Nix expression into an
/// in-memory buffer. The whole file is assembled before touching disk so
/// the output can be compared against an existing copy.
#[derive(Default)]
pub struct NixWriter {
    buf: String,
}

impl NixWriter {
    pub fn new() -> Self {
        NixWriter { buf: String::new() }
    }

    pub fn into_string(self) -> String {
        self.buf
    }

    /// Splice pre-rendered text (e.g. a buffered section) verbatim.
    pub fn push_raw(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    fn indent(level: usize) -> String {
        " ".repeat(level * SPACES_PER_INDENT)
    }

    pub fn write_comment(&mut self, comment: &str) {
        self.buf.push_str("# ");
        self.buf.push_str(comment);
        self.buf.push('\n');
    }

    pub fn write_line(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');
    }

    pub fn blank_line(&mut self) {
        self.buf.push('\n');
    }

    pub fn write_indented(&mut self, level: usize, line: &str) {
        self.buf.push_str(&Self::indent(level));
        self.buf.push_str(line);
        self.buf.push('\n');
    }

    pub fn write_indented_comment(&mut self, level: usize, comment: &str) {
        self.write_indented(level, &format!("# {comment}"));
    }

    pub fn start_let_binding(&mut self) {
        self.write_line("let");
    }

    pub fn end_let_binding(&mut self) {
        self.write_line("in");
    }

    pub fn start_attribute_set(&mut self, level: usize) {
        self.write_indented(level, "{");
    }

    pub fn end_attribute_set(&mut self, level: usize) {
        self.write_indented(level, "}");
    }

    /// `name = "escaped value";`
    pub fn write_attribute(&mut self, level: usize, name: &str, value: &str) {
        self.write_indented(level, &format!("{} = \"{}\";", name, escape_nix_string(value)));
    }

    /// `name = value;` with `value` emitted verbatim (identifiers,
    /// interpolations, path tokens).
    pub fn write_raw_attribute(&mut self, level: usize, name: &str, value: &str) {
        self.write_indented(level, &format!("{name} = {value};"));
    }

    pub fn write_attribute_bool(&mut self, level: usize, name: &str, value: bool) {
        self.write_indented(
            level,
            &format!("{} = {};", name, if value { "true" } else { "false" }),
        );
    }

    pub fn write_attribute_int(&mut self, level: usize, name: &str, value: i64) {
        self.write_indented(level, &format!("{name} = {value};"));
    }

    /// List attribute; short lists collapse onto one line.
    pub fn write_list_attribute(&mut self, level: usize, name: &str, items: &[String]) {
        match items {
            [] => self.write_indented(level, &format!("{name} = [ ];")),
            [only] => self.write_indented(level, &format!("{name} = [ {only} ];")),
            _ => {
                self.write_indented(level, &format!("{name} = ["));
                for item in items {
                    self.write_indented(level + 1, item);
                }
                self.write_indented(level, "];");
            }
        }
    }

    pub fn start_multiline_attribute(&mut self, level: usize, name: &str) {
        self.write_indented(level, &format!("{name} = ''"));
    }

    pub fn write_multiline_line(&mut self, level: usize, line: &str) {
        self.write_indented(level, line);
    }

    pub fn end_multiline_attribute(&mut self, level: usize) {
        self.write_indented(level, "'';");
    }
}

pub mod escape;
pub mod fileset;
pub mod generated_file;
pub mod ident;
pub mod writer;

pub use escape::{escape_indented_string, escape_nix_string};
pub use ident::sanitize_identifier;
pub use writer::NixWriter;

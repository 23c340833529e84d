pub mod error;
pub mod include_scanner;
pub mod lang;
pub mod mm_command;
pub mod mm_output;
pub mod transitive;

pub use error::ScanError;
pub use lang::ScanLang;
pub use transitive::{HeaderScanner, ScanOutcome, MAX_HEADER_RECURSION_DEPTH};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A custom command attached to a target or a generated source file.
///
/// Outputs and inputs are absolute paths as resolved by the front-end;
/// command lines are fully expanded (no generator expressions left).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCommand {
    /// Declared outputs; the first one is the primary output and keys the
    /// command in the custom-command graph.
    pub outputs: Vec<PathBuf>,

    /// Declared inputs. Inputs that are outputs of other commands become
    /// dependency edges.
    #[serde(default)]
    pub inputs: Vec<PathBuf>,

    /// Command lines executed in order.
    pub commands: Vec<String>,

    /// Working directory; defaults to the build directory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl CustomCommand {
    pub fn primary_output(&self) -> Option<&PathBuf> {
        self.outputs.first()
    }
}

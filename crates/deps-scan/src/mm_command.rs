use crate::error::ScanError;
use std::path::Path;
use std::process::Command;

/// List of GCC-compatible compilers whose `-MM` output we can parse.
static SUPPORTED_COMPILERS: &[&str] = &[
    "gcc", "g++", "clang", "clang++", "cc", "c++", "nvcc", "emcc", "em++",
];

/// A dependency-only preprocessor invocation for one source file.
pub struct ScanRequest<'a> {
    pub compiler: &'a str,
    pub flags: &'a [String],
    pub include_flags: &'a [String],
    pub source: &'a Path,
}

/// Build the `-MM` command for a scan request.
///
/// Optimization flags are dropped (they only slow the preprocessor), and
/// the command is assembled as an argv array so no shell quoting can
/// interfere.
pub fn dependency_command(req: &ScanRequest<'_>) -> Result<Command, ScanError> {
    if req.compiler.is_empty() {
        return Err(ScanError::Parse("Empty compiler command".to_string()));
    }

    let compiler_name = Path::new(req.compiler)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(req.compiler);

    if !SUPPORTED_COMPILERS
        .iter()
        .any(|&c| compiler_name == c || compiler_name.contains(c))
    {
        return Err(ScanError::UnsupportedCompiler(req.compiler.to_string()));
    }

    let mut cmd = Command::new(req.compiler);
    cmd.arg("-MM");

    for flag in req.flags {
        if !flag.is_empty() && !flag.starts_with("-O") {
            cmd.arg(flag);
        }
    }
    for flag in req.include_flags {
        if !flag.is_empty() {
            cmd.arg(flag);
        }
    }

    cmd.arg(req.source);
    Ok(cmd)
}

/// Run the `-MM` scan, capturing stdout, stderr and the exit code
/// together. The full output is read into memory before the child is
/// reaped.
pub fn run_scan(req: &ScanRequest<'_>) -> Result<String, ScanError> {
    let mut cmd = dependency_command(req)?;
    let output = cmd.output()?;

    if !output.status.success() {
        return Err(ScanError::ProcessFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

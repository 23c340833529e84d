use crate::diag::Diagnostics;
use crate::generator::Generator;
use crate::multi_config::MultiConfigGenerator;
use anyhow::Result;
use clap::Parser;
use nix_expr::generated_file::write_if_changed;
use std::path::PathBuf;
use target_model::prelude::Project;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    author,
    about = "cmake-nix: translate a resolved CMake target model into a Nix derivation graph"
)]
pub struct Cli {
    /// Change to DIR before doing anything else
    #[arg(short = 'C')]
    pub dir: Option<PathBuf>,

    /// Target model JSON produced by the configure front-end
    #[arg(short = 'f', default_value = "target-model.json")]
    pub model: PathBuf,

    /// Write the expression here instead of <build-dir>/default.nix
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Print the expression to stdout instead of writing a file
    #[arg(long, default_value = "false")]
    pub stdout: bool,

    /// Emit one derivation family per configuration
    #[arg(long = "multi-config", default_value = "false")]
    pub multi_config: bool,
}

pub fn run() -> Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(dir) = &cli.dir {
        std::env::set_current_dir(dir)?;
    }

    let project = Project::from_json_file(&cli.model)?;
    let diag = Diagnostics::new();

    let contents = if cli.multi_config {
        MultiConfigGenerator::with_diagnostics(&project, diag.clone()).generate_to_string()?
    } else {
        Generator::with_diagnostics(&project, diag.clone()).generate_to_string()?
    };

    if cli.stdout {
        print!("{contents}");
    } else {
        let path = cli
            .output
            .clone()
            .unwrap_or_else(|| project.build_dir.join(crate::generator::DEFAULT_NIX));
        let written = write_if_changed(&path, &contents)?;
        if written {
            eprintln!("cmake-nix: wrote {}", path.display());
        } else {
            eprintln!("cmake-nix: {} is up to date", path.display());
        }
    }

    for warning in diag.warnings() {
        eprintln!("cmake-nix: warning: {warning}");
    }

    Ok(0)
}

use cmake_nix::cli;

fn main() {
    let exit_code = match cli::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("cmake-nix: err: {err:#}");
            1
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

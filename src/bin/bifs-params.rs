use bifs_reco::BifsParams;
use clap::Parser;
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
struct Args {
    /// path to restoration parameters file to write
    parameter_file: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    let filename = args.parameter_file.with_extension("toml");
    match BifsParams::default().write_toml_file(&filename) {
        Ok(()) => {
            println!("wrote default parameter file to {}", filename.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("failed to write {}: {e}", filename.display());
            ExitCode::FAILURE
        }
    }
}

use bifs_reco::data_import::{GlobVolumeSource, RawDataType};
use bifs_reco::{EmpiricalScanner, NormalizationType, Result, ScanParams};
use clap::Parser;
use log::error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// build an empirical prior from a population of reference volumes
#[derive(Debug, Parser)]
struct Args {
    /// glob pattern matching the reference volumes
    pattern: String,
    /// prior artifact to write, the scan report is written next to it as json
    output: PathBuf,
    /// volume dimensions, first index fastest on disk
    #[arg(long, value_delimiter = ',', required = true)]
    dims: Vec<usize>,
    #[arg(long, value_enum, default_value_t = RawDataType::I16BigEndian)]
    dtype: RawDataType,
    /// fraction of the candidates to sample
    #[arg(long, default_value_t = 0.1)]
    fraction: f64,
    /// glob pattern of volumes to leave out, e.g. '*10933*'
    #[arg(long)]
    exclude: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 16)]
    batch_size: usize,
    #[arg(long, value_enum, default_value_t = NormalizationType::Unitary)]
    normalization: NormalizationType,
    /// also write a sorted reference voxel pool for distribution matching
    #[arg(long)]
    pool: Option<PathBuf>,
    /// keep every nth voxel in the pool
    #[arg(long, default_value_t = 1)]
    pool_stride: usize,
}

fn run(args: &Args) -> Result<()> {
    let source = GlobVolumeSource::new(args.pattern.as_str(), &args.dims, args.dtype)?;
    let params = ScanParams {
        sample_fraction: args.fraction,
        exclude: args.exclude.clone(),
        seed: args.seed,
        batch_size: args.batch_size,
        collect_voxels: args.pool.is_some(),
        voxel_stride: args.pool_stride,
        shape: Some(args.dims.clone()),
        normalization: args.normalization,
    };
    let scanner = EmpiricalScanner::new(&source, params)?;
    let outcome = scanner.scan(|p| {
        println!("batch {} of {}: {} of {} volumes processed", p.batch, p.batches, p.processed, p.selected);
    })?;

    outcome.prior.save(&args.output)?;
    println!("wrote empirical prior to {}", args.output.display());

    let report_file = args.output.with_extension("json");
    let report = serde_json::to_string_pretty(&outcome.report)?;
    fs::write(&report_file, report)?;
    println!(
        "{} volumes contributed, {} unreadable, {} rejected. report written to {}",
        outcome.report.contributing,
        outcome.report.failure_count(),
        outcome.report.rejected_count(),
        report_file.display()
    );

    if let (Some(pool), Some(pool_file)) = (&outcome.pool, &args.pool) {
        pool.save(pool_file)?;
        println!("wrote {} pool voxels to {}", pool.len(), pool_file.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("scan failed: {e}");
            ExitCode::FAILURE
        }
    }
}

use bifs_reco::data_import::{read_raw_volume, write_raw_volume, RawDataType};
use bifs_reco::fftshift::fftshift;
use bifs_reco::{apply_mask, match_distribution, Bifs, BifsParams, ReferencePool, Result};
use clap::Parser;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// restore a raw volume with the parameters of a toml file
#[derive(Debug, Parser)]
struct Args {
    /// restoration parameters, see bifs-params
    params: PathBuf,
    /// raw input volume
    input: PathBuf,
    /// restored volume to write
    output: PathBuf,
    /// volume dimensions, first index fastest on disk
    #[arg(long, value_delimiter = ',', required = true)]
    dims: Vec<usize>,
    #[arg(long, value_enum, default_value_t = RawDataType::I16BigEndian)]
    dtype: RawDataType,
    #[arg(long, value_enum, default_value_t = RawDataType::F32LittleEndian)]
    out_dtype: RawDataType,
    /// prior scales to restore with, one output per scale. defaults to the parameter file
    #[arg(long, value_delimiter = ',')]
    scale: Vec<f64>,
    /// reference voxel pool written by bifs-scan. the input is matched onto it before restoring
    #[arg(long)]
    pool: Option<PathBuf>,
    /// voxels where this mask (same dims and dtype as the input) is zero are zeroed in the
    /// matched input and in the output
    #[arg(long)]
    mask: Option<PathBuf>,
    /// also write the centered posterior k-space magnitude next to each output
    #[arg(long)]
    k_space: bool,
}

fn scaled_output(output: &Path, scale: f64) -> PathBuf {
    let stem = output.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let name = match output.extension() {
        Some(ext) => format!("{stem}_s{scale}.{}", ext.to_string_lossy()),
        None => format!("{stem}_s{scale}"),
    };
    output.with_file_name(name)
}

fn run(args: &Args) -> Result<()> {
    let params = BifsParams::from_toml_file(&args.params)?;
    let mut engine = Bifs::new(&params)?;

    let mut image = read_raw_volume(&args.input, &args.dims, args.dtype)?;
    let mask = match &args.mask {
        Some(m) => Some(read_raw_volume(m, &args.dims, args.dtype)?),
        None => None,
    };
    if let Some(pool_file) = &args.pool {
        let pool = ReferencePool::load(pool_file)?;
        info!("matching input onto {} reference voxels", pool.len());
        image = match_distribution(&image, &pool);
        if let Some(mask) = &mask {
            apply_mask(&mut image, mask)?;
        }
    }
    engine.load_image(image)?;

    let scales = if args.scale.is_empty() { vec![params.prior_scale] } else { args.scale.clone() };
    for &scale in &scales {
        engine.set_prior_scale(scale)?;
        let mut restored = engine.final_image()?.clone();
        if let Some(mask) = &mask {
            apply_mask(&mut restored, mask)?;
        }
        let output = if scales.len() > 1 { scaled_output(&args.output, scale) } else { args.output.clone() };
        write_raw_volume(&output, &restored, args.out_dtype)?;
        println!("wrote restored volume (prior scale {scale}) to {}", output.display());
        if args.k_space {
            let k_file = output.with_extension("ksp");
            let centered = fftshift(engine.posterior_modulus()?);
            write_raw_volume(&k_file, &centered, RawDataType::F32LittleEndian)?;
            println!("wrote posterior k-space magnitude to {}", k_file.display());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("restoration failed: {e}");
            ExitCode::FAILURE
        }
    }
}

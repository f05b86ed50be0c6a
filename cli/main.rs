// ========================================================================================
//
//                          The orchestrator: beamform
//
// ========================================================================================
//
// Loads a dataset manifest, runs the nearest-sample delay-and-sum reconstruction over
// every imaging point, and writes one TSV line per point. All numerical work lives in
// the library; this binary only resolves paths, configures logging and the thread
// pool, and reports progress.

#![deny(dead_code)]
#![deny(unused_imports)]

use beamform::{Dataset, DelayAndSumOptions, DEFAULT_CHUNK_SIZE};
use beamform::{delay_and_sum_nearest, write_results};
use clap::Parser;
use log::info;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

// ========================================================================================
//                              Command-line interface definition
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "beamform",
    version,
    about = "Nearest-sample delay-and-sum reconstruction for ultrasonic array data."
)]
struct Args {
    /// Path to the dataset manifest (TOML).
    #[clap(value_name = "MANIFEST")]
    manifest: PathBuf,

    /// Output TSV path. Defaults to `<manifest stem>.tfm.tsv` next to the manifest.
    #[clap(long)]
    out: Option<PathBuf>,

    /// Number of imaging points handed to a worker at a time.
    #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Worker thread count. Defaults to all logical cores.
    #[clap(long)]
    threads: Option<usize>,

    /// Replace masked points with the manifest's fill value before writing.
    #[clap(long)]
    apply_fillvalue: bool,
}

// ========================================================================================
//                              The main orchestration logic
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let overall_start_time = Instant::now();

    // --- Phase 1: Path Resolution & Safety Check ---
    let out_path = match args.out {
        Some(path) => path,
        None => default_output_path(&args.manifest),
    };
    if out_path.exists() {
        return Err(format!(
            "Output file '{}' already exists. Beamform will not overwrite it. Please remove it or rename it before running.",
            out_path.display()
        )
        .into());
    }

    // --- Phase 2: Dataset Loading ---
    eprintln!("> Loading dataset from {}", args.manifest.display());
    let dataset = Dataset::load(&args.manifest)?;
    let inputs = dataset.inputs()?;

    // --- Phase 3: Reconstruction ---
    let mut options = DelayAndSumOptions::default().with_chunk_size(args.chunk_size);
    if let Some(threads) = args.threads {
        options = options.with_num_threads(threads);
    }
    eprintln!(
        "> Reconstructing {} points from {} scanlines (chunk size {}, {} threads)...",
        inputs.num_points(),
        inputs.num_scanlines(),
        options.chunk_size,
        options.num_threads.unwrap_or_else(rayon::current_num_threads)
    );
    let compute_start = Instant::now();
    let mut output = delay_and_sum_nearest(&inputs, &options)?;
    info!("Reconstruction took {:.2?}", compute_start.elapsed());

    let valid_fraction = output.valid_fraction();
    if output.num_points() > 0 && valid_fraction == 0.0 {
        log::warn!(
            "Every point is masked: no lookup time fell inside the recorded window. Check t0 and invdt."
        );
    }
    eprintln!(
        "> {:.1}% of points received a contribution from every scanline.",
        valid_fraction * 100.0
    );

    // --- Phase 4: Post-processing & Output ---
    if args.apply_fillvalue {
        let filled = output.apply_fillvalue(inputs.fillvalue())?;
        eprintln!("> Replaced {filled} masked points with {}", inputs.fillvalue());
    }

    write_results(&out_path, &output)?;
    eprintln!("> Wrote results to {}", out_path.display());

    eprintln!(
        "\nSuccess! Total execution time: {:.2?}",
        overall_start_time.elapsed()
    );
    Ok(())
}

// ========================================================================================
//                                  Helper functions
// ========================================================================================

/// `path/to/scan.toml` -> `path/to/scan.tfm.tsv`.
fn default_output_path(manifest: &Path) -> PathBuf {
    let stem = manifest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "beamform".to_string());
    manifest.with_file_name(format!("{stem}.tfm.tsv"))
}

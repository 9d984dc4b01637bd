use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use debx::engine::{Engine, ExtractOptions, DEFAULT_DEPTH_LIMIT, DEFAULT_OUTPUT_DIR};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "debx", version, about = "Recursively extract a .deb and print a JSON manifest")]
struct Cli {
    /// Debian package to extract
    input: PathBuf,
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,
    /// Maximum archive nesting depth
    #[arg(short, long, default_value_t = DEFAULT_DEPTH_LIMIT)]
    depth_limit: u32,
    /// Concurrent extraction tasks (default: available cores)
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Task queue slots (default: 4 × jobs)
    #[arg(long)]
    queue_capacity: Option<usize>,
    /// Stop writing once this many bytes have been extracted
    #[arg(long, value_name = "BYTES")]
    max_total_size: Option<u64>,
    /// Cap on nested-archive spool bytes held at once (default: --max-total-size)
    #[arg(long, value_name = "BYTES")]
    max_spool_size: Option<u64>,
    /// Directory for nested-archive spool files (default: system temp)
    #[arg(long)]
    spool_dir: Option<PathBuf>,
    /// Write the manifest here instead of stdout
    #[arg(short, long)]
    manifest: Option<PathBuf>,
    /// -v info, -vv debug; RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Refuse early: the engine only ever sees a readable input.
    File::open(&cli.input).map_err(|e| format!("cannot read {}: {e}", cli.input.display()))?;

    let mut opts = ExtractOptions::default()
        .output_dir(&cli.output_dir)
        .depth_limit(cli.depth_limit);
    if let Some(jobs) = cli.jobs { opts = opts.jobs(jobs); }
    if let Some(capacity) = cli.queue_capacity { opts = opts.queue_capacity(capacity); }
    if let Some(limit) = cli.max_total_size { opts = opts.max_total_bytes(limit); }
    if let Some(limit) = cli.max_spool_size { opts = opts.max_spool_bytes(limit); }
    if let Some(dir) = &cli.spool_dir { opts = opts.spool_dir(dir); }

    let manifest = Engine::new(opts).run(&cli.input)?;

    match &cli.manifest {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            manifest.write_to(&mut out)?;
            out.write_all(b"\n")?;
            out.flush()?;
            eprintln!(
                "Extracted {} file(s) to {} ({} error(s), {} warning(s)); manifest: {}",
                manifest.summary.files_extracted,
                cli.output_dir.display(),
                manifest.summary.errors,
                manifest.summary.warnings,
                path.display(),
            );
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            manifest.write_to(&mut out)?;
            out.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();
}

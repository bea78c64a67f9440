//! PC5 container CLI application.
//!
//! Inspects `.pc5` LiDAR/IR containers, exports frame timestamps and point
//! dumps, and projects companion telemetry tables to CSV.

mod parquet_table;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn, LevelFilter};
use pc5_core::calibration::{load_calibration, Calibration};
use pc5_core::output::{self, timestamp_stem, ExportFormats};
use pc5_core::table::project_columns;
use pc5_core::Pc5Reader;
use parquet_table::ParquetTable;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

/// Reader and exporter for .pc5 multi-sensor survey containers.
#[derive(Parser, Debug)]
#[command(name = "pc5")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index a container and print a summary
    Info {
        /// Input .pc5 file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Calibration JSON to validate and summarise
        #[arg(long, value_name = "PATH")]
        calibration: Option<PathBuf>,
    },

    /// Write every frame's sequence number and timestamp to CSV
    Timestamps {
        /// Input .pc5 file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Calibration JSON; writes host times corrected by the LiDAR
        /// message-time offset instead of sensor timestamps
        #[arg(long, value_name = "PATH")]
        calibration: Option<PathBuf>,

        /// LiDAR name to look up in the calibration
        #[arg(long, default_value = "top")]
        lidar: String,

        /// Fail instead of exporting a partial index
        #[arg(long)]
        strict: bool,
    },

    /// Export point clouds to PCD, KITTI/nuScenes .bin and CSV
    Export {
        /// Input .pc5 file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output directory; one subdirectory per format
        #[arg(short, long, default_value = "exports")]
        out_dir: PathBuf,

        /// Comma-separated formats: pcd,bin,csv (default: all)
        ///
        /// Examples:
        /// - "pcd"
        /// - "pcd,bin"
        #[arg(short, long, default_value = "")]
        formats: String,

        /// Export only this 0-based frame position; all frames if omitted
        #[arg(long)]
        frame: Option<usize>,

        /// Also write IR images as PGM under <OUT_DIR>/ir
        #[arg(long)]
        ir: bool,

        /// Fail instead of exporting a partial index
        #[arg(long)]
        strict: bool,
    },

    /// Project columns of a Parquet telemetry table to CSV
    Telemetry {
        /// Input Parquet file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Columns to keep, in output order (default: all)
        #[arg(short, long, num_args = 1..)]
        columns: Option<Vec<String>>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Info { input, calibration } => {
            run_info(&input, calibration.as_deref())
        }
        Command::Timestamps {
            input,
            output,
            calibration,
            lidar,
            strict,
        } => run_timestamps(&input, &output, calibration.as_deref(), &lidar, strict, args.quiet),
        Command::Export {
            input,
            out_dir,
            formats,
            frame,
            ir,
            strict,
        } => {
            let formats = ExportFormats::from_str(&formats)
                .context("Invalid export formats. Use comma-separated: pcd,bin,csv")?;
            run_export(&input, &out_dir, formats, frame, ir, strict, args.quiet)
        }
        Command::Telemetry {
            input,
            output,
            columns,
        } => run_telemetry(&input, &output, columns.as_deref(), args.quiet),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn spinner(quiet: bool, message: String) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.set_message(message);
    pb
}

/// Opens a container and builds its index, rejecting partial indexes when
/// `strict` is set.
fn open_indexed(input: &Path, strict: bool, quiet: bool) -> Result<Pc5Reader> {
    let progress = spinner(
        quiet,
        format!("Indexing {:?}...", input.file_name().unwrap_or_default()),
    );
    let reader = Pc5Reader::open(input).with_context(|| format!("Failed to open {:?}", input))?;
    let report = reader.build_index();
    progress.finish_and_clear();

    if let Some(err) = report.error() {
        if strict {
            anyhow::bail!(
                "Index of {:?} is partial ({} frames): {}",
                input,
                report.index().len(),
                err
            );
        }
        warn!(
            "continuing with the {} frames indexed before the error",
            report.index().len()
        );
    }
    Ok(reader)
}

fn run_info(input: &Path, calibration: Option<&Path>) -> Result<()> {
    let start_time = Instant::now();
    let reader = open_indexed(input, false, true)?;
    let report = reader.build_index();
    let index = report.index();
    let counts = index.record_counts();

    println!("File:          {:?}", input);
    println!("Size:          {} bytes", reader.len());
    println!("Records:       {}", report.records_scanned());
    println!("Frames:        {}", index.len());
    println!("  point cloud: {}", counts.point_clouds);
    println!("  IR image:    {}", counts.ir_images);
    println!("  time meta:   {}", counts.time_metas);
    if let Some((first, last)) = index.time_span() {
        println!(
            "Time span:     {} .. {} ({:.3}s)",
            timestamp_stem(first),
            timestamp_stem(last),
            (last - first) as f64 / 1e9
        );
    }
    println!("Skipped:       {}", report.skipped().len());
    for skipped in report.skipped() {
        println!(
            "  {} seq={} at {}: {}",
            skipped.kind, skipped.sequence_number, skipped.record_offset, skipped.error
        );
    }
    match report.error() {
        Some(err) => println!("Index:         partial ({})", err),
        None => println!("Index:         complete"),
    }

    if let Some(path) = calibration {
        let calibration = load_calibration(path)
            .with_context(|| format!("Failed to load calibration {:?}", path))?;
        print_calibration(&calibration);
    }

    println!("Duration:      {:.3}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

fn print_calibration(calibration: &Calibration) {
    println!("Calibration:");
    for cam in &calibration.cameras {
        let k = &cam.intrinsics;
        println!(
            "  camera {:<8} {}x{} fx={:.1} fy={:.1} cx={:.1} cy={:.1}",
            cam.name, cam.width, cam.height, k.fx, k.fy, k.cx, k.cy
        );
    }
    for lidar in &calibration.lidars {
        println!(
            "  lidar  {:<8} msgtime offset {} ns",
            lidar.name, lidar.msgtime_offset_ns
        );
    }
}

fn run_timestamps(
    input: &Path,
    output_path: &Path,
    calibration: Option<&Path>,
    lidar: &str,
    strict: bool,
    quiet: bool,
) -> Result<()> {
    let reader = open_indexed(input, strict, quiet)?;

    let lidar_calibration = match calibration {
        Some(path) => {
            let calibration = load_calibration(path)
                .with_context(|| format!("Failed to load calibration {:?}", path))?;
            let lidar = calibration
                .lidar(lidar)
                .with_context(|| format!("No LiDAR named {:?} in {:?}", lidar, path))?
                .clone();
            Some(lidar)
        }
        None => None,
    };

    // Calibrated output is on the host timeline
    let rows: Vec<(u64, u64)> = match &lidar_calibration {
        Some(lidar) => {
            let rows = reader
                .host_times()
                .map(|r| r.map(|(seq, host)| (seq, lidar.correct_timestamp(host))))
                .collect::<pc5_core::Result<Vec<_>>>()
                .context("Failed to decode timing records")?;
            let missing = reader.frame_count() - rows.len();
            if missing > 0 {
                warn!("{} frames have no timing record and are left out", missing);
            }
            rows
        }
        None => reader.timestamps().collect(),
    };
    let count = output::write_timestamps_csv(output_path, rows)
        .context("Failed to write timestamp CSV")?;

    if !quiet {
        eprintln!("saved {} timestamps to {:?}", count, output_path);
    }
    Ok(())
}

fn run_export(
    input: &Path,
    out_dir: &Path,
    formats: ExportFormats,
    frame: Option<usize>,
    ir: bool,
    strict: bool,
    quiet: bool,
) -> Result<()> {
    let start_time = Instant::now();
    let reader = open_indexed(input, strict, quiet)?;
    let frame_count = reader.frame_count();

    let positions: Vec<usize> = match frame {
        None => (0..frame_count).collect(),
        Some(p) if p < frame_count => vec![p],
        Some(p) => anyhow::bail!(
            "--frame {} out of range [0, {})",
            p,
            frame_count
        ),
    };

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;

    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(positions.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap(),
        );
        pb
    };

    let mut exported = 0usize;
    let mut total_points = 0usize;
    let mut ir_images = 0usize;
    for &position in &positions {
        let frame = reader
            .get_frame_at(position)
            .with_context(|| format!("Failed to decode frame {}", position))?;

        match output::export_frame(&frame, out_dir, formats)
            .with_context(|| format!("Failed to export frame {}", position))?
        {
            Some(done) => {
                exported += 1;
                total_points += done.point_count;
                progress.set_message(format!("frame={} -> {} ({} pts)", position, done.stem, done.point_count));
            }
            None => info!("frame {}: no valid points", position),
        }

        if ir {
            match output::export_ir_image(&frame, out_dir) {
                Ok(Some(_)) => ir_images += 1,
                Ok(None) => {}
                Err(err) => warn!("frame {}: IR image not exported: {}", position, err),
            }
        }
        progress.inc(1);
    }

    let scope = match frame {
        Some(p) => format!("frame {}", p),
        None => "all frames".to_string(),
    };
    progress.finish_with_message(format!(
        "exported {}/{} ({}) to {:?}",
        exported,
        positions.len(),
        scope,
        out_dir
    ));

    if !quiet {
        let duration = start_time.elapsed();
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", input);
        eprintln!("  Output:       {:?}", out_dir);
        eprintln!("  Formats:      {}", formats.iter().map(|f| f.name()).collect::<Vec<_>>().join(","));
        eprintln!("  Frames:       {}/{}", exported, positions.len());
        eprintln!("  Points:       {}", total_points);
        if ir {
            eprintln!("  IR images:    {}", ir_images);
        }
        eprintln!("  Duration:     {:.3}s", duration.as_secs_f64());
    }

    Ok(())
}

fn run_telemetry(
    input: &Path,
    output_path: &Path,
    columns: Option<&[String]>,
    quiet: bool,
) -> Result<()> {
    let table = ParquetTable::open(input)?;
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {:?}", output_path))?;
    let report = project_columns(&table, columns, file).context("Failed to write telemetry CSV")?;

    if !quiet {
        if !report.missing.is_empty() {
            eprintln!("Warning: missing columns skipped: {:?}", report.missing);
        }
        eprintln!(
            "Wrote: {:?} with {} rows and {} columns.",
            output_path,
            report.rows,
            report.columns.len()
        );
    }
    Ok(())
}

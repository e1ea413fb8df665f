use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::File;
use std::path::{Path, PathBuf};

mod input;
mod output;

use input::{assemble, plane_for, read_records, read_records_with_progress, RawTables};
use output::{
    stop_anchor_rows, write_csv, write_segments_geojson, RouteDirectionSpeedRow, SegmentSpeedRow,
    SegmentTripRow, TripSpeedRow,
};
use transit_speeds::prelude::*;

#[derive(Parser, Debug)]
#[command(
    name = "segment-speeds",
    author,
    version,
    about = "Derive segment speeds and stop anchors from a day of vehicle positions",
    long_about = "Cuts route shapes into fixed-length segments, matches each trip's GPS \
                  pings to them, and derives per-segment speeds. Short, unreliable \
                  measurements are re-derived from neighboring pings. Speeds are \
                  aggregated per segment and per route-direction for peak, offpeak and \
                  all_day using distance/time weighting.\n\n\
                  When stop tables are given, each served stop is anchored to its \
                  nearest ping with a bracketing trio for arrival-time interpolation."
)]
struct Args {
    /// Shapes CSV (operator_id, route_id, direction_id, shape_id, shape_pt_sequence, shape_pt_lon, shape_pt_lat)
    #[arg(long)]
    shapes: PathBuf,

    /// Trips CSV (trip_id, operator_id, route_id, direction_id, shape_id, first_departure)
    #[arg(long)]
    trips: PathBuf,

    /// Vehicle positions CSV (trip_id, location_timestamp, lon, lat, optional vp_idx)
    #[arg(long)]
    positions: PathBuf,

    /// Stops CSV (stop_id, stop_lon, stop_lat, stop_primary_direction)
    #[arg(long, requires = "stop_times")]
    stops: Option<PathBuf>,

    /// Stop times CSV (trip_id, stop_id, stop_sequence)
    #[arg(long, requires = "stops")]
    stop_times: Option<PathBuf>,

    /// Directory for output tables
    #[arg(short, long)]
    output_dir: PathBuf,

    /// JSON pipeline config; missing fields take defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target segment length in meters (overrides config)
    #[arg(long)]
    segment_length: Option<f64>,

    /// Match buffer in meters (overrides config)
    #[arg(long)]
    buffer: Option<f64>,

    /// Stability threshold as a fraction of segment length (overrides config)
    #[arg(long)]
    stability_threshold: Option<f64>,

    /// Speeds above this are left out of aggregation (overrides config)
    #[arg(long)]
    max_speed: Option<f64>,

    /// Verbose output (show debug messages)
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    if let Some(v) = args.segment_length {
        config.segment_length_m = v;
    }
    if let Some(v) = args.buffer {
        config.buffer_m = v;
    }
    if let Some(v) = args.stability_threshold {
        config.stability_threshold = v;
    }
    if let Some(v) = args.max_speed {
        config.max_speed = v;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open(path: &Path) -> Result<File> {
    if !path.exists() {
        bail!("Input file does not exist: {}", path.display());
    }
    File::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .format_timestamp(None)
    .init();

    log::info!("=== Segment Speeds ===");
    log::info!("Output: {}", args.output_dir.display());

    let config = load_config(&args)?;
    log::info!(
        "Segments of {} m, {} m buffer, stability threshold {}",
        config.segment_length_m,
        config.buffer_m,
        config.stability_threshold
    );

    // Phase 1: Read input tables
    log::info!("");
    log::info!("Phase 1: Reading input tables...");
    let mut raw = RawTables {
        shapes: read_records(open(&args.shapes)?).context("Failed to read shapes")?,
        trips: read_records(open(&args.trips)?).context("Failed to read trips")?,
        positions: read_records_with_progress(open(&args.positions)?, "vehicle positions")
            .context("Failed to read vehicle positions")?,
        ..Default::default()
    };
    if let (Some(stops), Some(stop_times)) = (&args.stops, &args.stop_times) {
        raw.stops = read_records(open(stops)?).context("Failed to read stops")?;
        raw.stop_times = read_records(open(stop_times)?).context("Failed to read stop times")?;
    }
    log::info!(
        "  {} shape points, {} trips, {} vehicle positions, {} stops, {} stop times",
        raw.shapes.len(),
        raw.trips.len(),
        raw.positions.len(),
        raw.stops.len(),
        raw.stop_times.len()
    );

    // Phase 2: Project and assemble
    log::info!("");
    log::info!("Phase 2: Projecting and assembling trips...");
    let plane = plane_for(&raw.shapes)?;
    let (inputs, assembly_stats) = assemble(raw, &plane).context("Failed to assemble inputs")?;
    log::info!(
        "  {} shapes, {} trips",
        inputs.shapes().len(),
        inputs.trips().len()
    );
    assembly_stats.log_summary();

    // Phase 3: Run pipeline
    log::info!("");
    log::info!("Phase 3: Deriving speeds...");
    let outputs = run_day(&inputs, &config).context("Pipeline run failed")?;

    // Phase 4: Write output
    log::info!("");
    log::info!("Phase 4: Writing output...");
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    let out = |name: &str| args.output_dir.join(name);

    write_segments_geojson(&outputs.segments, &plane, &out("segments.geojson"))
        .context("Failed to write segments")?;
    write_csv(
        outputs.segment_trip_speeds.iter().map(SegmentTripRow::from),
        &out("speeds_by_segment_trip.csv"),
    )?;
    write_csv(
        outputs.segment_speeds.iter().map(SegmentSpeedRow::from),
        &out("speeds_by_segment.csv"),
    )?;
    write_csv(
        outputs
            .route_direction_speeds
            .iter()
            .map(RouteDirectionSpeedRow::from),
        &out("speeds_by_route_direction.csv"),
    )?;
    write_csv(
        outputs.trip_speeds.iter().map(TripSpeedRow::from),
        &out("speeds_by_trip.csv"),
    )?;
    write_csv(
        outputs
            .stop_anchors
            .iter()
            .flat_map(|anchor| stop_anchor_rows(anchor, &plane)),
        &out("stop_anchors.csv"),
    )?;

    // Summary
    log::info!("");
    outputs.stats.log_summary();
    log::info!("");
    log::info!("Speeds in {}", config.speed_unit);
    log::info!("Output written to: {}", args.output_dir.display());
    log::info!("Done!");

    Ok(())
}

mod api;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use env_logger::Builder;
use log::LevelFilter;

use pcd_capture::{
    BridgeSource, CaptureConfig, CaptureService, ColorMode, FrameCache, FrameProcessor,
    FrameSource, SensorSource, ServiceConfig, SyntheticSensor,
};
use pcd_catalog::{Catalog, CatalogConfig, Converter};
use pcd_core::pointcloud::point::PointCloud;
use pcd_ept::EptBuilder;

use api::{run_server, AppState};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(
    name = "pcdstream",
    about = "Live depth-sensor point clouds and tiled EPT point cloud serving",
    author = "MIERUNE Inc.",
    version = "0.0.1"
)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture bridge and point cloud API
    Serve(ServeArgs),
    /// Build an EPT tree from a pointcloud.json file
    Convert(ConvertArgs),
    /// Convert an uploaded model with the external converter
    Ingest(IngestArgs),
    /// Check stored point clouds and repair their metadata
    Audit(AuditArgs),
    /// Delete point cloud directories that never completed
    Sweep(SweepArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum SourceKind {
    Synthetic,
    Bridge,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(short, long, value_name = "DIR", default_value = "pointclouds")]
    root: PathBuf,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    #[arg(long, value_enum, default_value_t = SourceKind::Synthetic)]
    source: SourceKind,

    #[arg(long, default_value = "http://127.0.0.1:5000")]
    bridge_url: String,

    /// Keep every Nth depth sample
    #[arg(long, default_value_t = 2)]
    density: usize,

    /// rgb or gradient
    #[arg(long, default_value = "rgb")]
    color: ColorMode,

    /// Frame rate of the synthetic sensor
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Stream only while viewers are connected to /api/stream
    #[arg(long)]
    auto_stream: bool,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    #[arg(long, default_value_t = 100_000)]
    max_points_per_tile: usize,

    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(0..=31))]
    max_depth: u32,
}

#[derive(Args, Debug)]
struct IngestArgs {
    #[arg(short, long, value_name = "DIR", default_value = "pointclouds")]
    root: PathBuf,

    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    #[arg(long)]
    id: String,

    #[arg(short = 'n', long, default_value_t = 100_000)]
    point_count: u64,

    #[arg(long, default_value = "model_parser")]
    converter: PathBuf,

    #[arg(short, long)]
    strategy: Option<String>,
}

#[derive(Args, Debug)]
struct AuditArgs {
    #[arg(short, long, value_name = "DIR", default_value = "pointclouds")]
    root: PathBuf,

    #[arg(long, default_value_t = 24)]
    retention_hours: i64,
}

#[derive(Args, Debug)]
struct SweepArgs {
    #[command(flatten)]
    audit: AuditArgs,

    /// Actually delete; otherwise only list what would go
    #[arg(long)]
    confirm: bool,
}

fn catalog_config(args: &AuditArgs) -> CatalogConfig {
    CatalogConfig::new(&args.root).with_retention(chrono::Duration::hours(args.retention_hours))
}

fn serve(args: ServeArgs) -> AppResult<()> {
    log::info!("point cloud root: {:?}", args.root);
    log::info!("capture source: {:?}", args.source);

    let service_config = ServiceConfig::default();
    let source: Box<dyn FrameSource> = match args.source {
        SourceKind::Synthetic => {
            let processor = FrameProcessor::new(
                CaptureConfig::default()
                    .with_density(args.density)
                    .with_color_mode(args.color),
            )?;
            Box::new(SensorSource::new(SyntheticSensor::new(args.fps), processor))
        }
        SourceKind::Bridge => Box::new(BridgeSource::new(
            args.bridge_url.clone(),
            service_config.request_timeout,
        )?),
    };

    let capture = Arc::new(CaptureService::new(source, FrameCache::new(), service_config));
    if args.auto_stream {
        if let Err(e) = capture.initialize() {
            log::warn!("capture source not ready: {}", e);
        }
    }

    let catalog = Arc::new(Catalog::new(CatalogConfig::new(&args.root)));
    let state = Arc::new(AppState::new(capture.clone(), catalog, args.auto_stream));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let served = runtime.block_on(run_server(args.port, state));
    runtime.shutdown_timeout(Duration::from_secs(5));

    capture.shutdown();
    served?;
    Ok(())
}

fn convert(args: ConvertArgs) -> AppResult<()> {
    log::info!("input file: {:?}", args.input);
    log::info!("output folder: {:?}", args.output);

    let start = std::time::Instant::now();
    let point_cloud = PointCloud::load(&args.input)?;
    log::info!(
        "loaded {} points in {:?}",
        point_cloud.points.len(),
        start.elapsed()
    );

    let metadata = EptBuilder::new()
        .with_max_points_per_tile(args.max_points_per_tile)
        .with_max_depth(args.max_depth)
        .build(&point_cloud, &args.output)?;
    log::info!("bounds: {:?}", metadata.bounds);
    log::info!("wrote {} points in {:?}", metadata.points, start.elapsed());
    Ok(())
}

fn ingest(args: IngestArgs) -> AppResult<()> {
    let catalog = Catalog::new(CatalogConfig::new(&args.root).with_converter_program(&args.converter));
    let mut converter = Converter::new(&catalog.config().converter_program);
    if let Some(strategy) = &args.strategy {
        converter = converter.with_strategy(strategy);
    }
    let record = catalog.ingest(&converter, &args.input, &args.id, args.point_count)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn audit(args: AuditArgs) -> AppResult<()> {
    let catalog = Catalog::new(catalog_config(&args));
    let report = catalog.audit(Utc::now())?;
    log::info!(
        "fabricated {}, patched {}, flagged {}",
        report.fabricated.len(),
        report.patched.len(),
        report.flagged.len()
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn sweep(args: SweepArgs) -> AppResult<()> {
    let catalog = Catalog::new(catalog_config(&args.audit));
    let report = catalog.audit(Utc::now())?;
    if !args.confirm {
        for flagged in report.expired() {
            log::info!("would remove {} ({})", flagged.id, flagged.reason);
        }
        log::info!("dry run, pass --confirm to delete");
        return Ok(());
    }
    let removed = catalog.sweep(&report)?;
    log::info!("removed {} directories", removed.len());
    Ok(())
}

fn main() {
    let args = Cli::parse();

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            if args.verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            },
        )
        .parse_default_env()
        .init();

    let result = match args.command {
        Command::Serve(args) => serve(args),
        Command::Convert(args) => convert(args),
        Command::Ingest(args) => ingest(args),
        Command::Audit(args) => audit(args),
        Command::Sweep(args) => sweep(args),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

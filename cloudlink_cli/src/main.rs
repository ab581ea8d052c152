mod container;
mod pcd;
mod synth;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info};

use cloudlink_codecs::handler_from_config;
use cloudlink_core::{CompressionType, HandlerConfig, PointCloudHandler, StreamEngineKind};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "cloudlink",
    about = "Compress point cloud frames for transport, and restore or inspect CLC1 record streams",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Codec {
    /// Raw buffer, no compression
    None,
    /// Lossless general-purpose byte stream
    Stream,
    /// Lossy grid-delta point coder
    Grid,
}

impl From<Codec> for CompressionType {
    fn from(codec: Codec) -> Self {
        match codec {
            Codec::None => CompressionType::None,
            Codec::Stream => CompressionType::GenericStream,
            Codec::Grid => CompressionType::DomainSpecific,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Engine {
    Deflate,
    Zstd,
}

/// Handler settings shared by every subcommand that builds a handler.
#[derive(clap::Args)]
struct HandlerArgs {
    /// JSON handler configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Byte-stream engine for `--codec stream`
    #[arg(long, value_enum)]
    engine: Option<Engine>,
    /// Byte-stream compression level
    #[arg(long)]
    level: Option<i32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress PCD files, in order, into one CLC1 record stream
    Compress {
        /// Destination CLC1 file
        output: PathBuf,
        /// Source PCD files; grid frames are coded against their predecessors
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, value_enum, default_value = "stream")]
        codec: Codec,
        /// Voxel leaf size in metres applied before compression (0 disables)
        #[arg(long, default_value_t = 0.0)]
        voxel: f32,
        #[command(flatten)]
        handler: HandlerArgs,
    },
    /// Restore every record of a CLC1 stream as binary PCD files
    Decompress {
        /// Source CLC1 file
        input: PathBuf,
        /// Directory that receives frame_NNNN.pcd
        out_dir: PathBuf,
        #[command(flatten)]
        handler: HandlerArgs,
    },
    /// Print per-record metadata of a CLC1 stream
    Inspect {
        /// CLC1 file to inspect
        file: PathBuf,
    },
    /// Compress synthetic frames with every codec and report ratios and timings
    Bench {
        /// Number of consecutive frames
        #[arg(short, long, default_value_t = 60)]
        frames: u32,
        /// Points per frame
        #[arg(short, long, default_value_t = 50_000)]
        points: usize,
        /// Voxel leaf size in metres applied before compression (0 disables)
        #[arg(long, default_value_t = 0.0)]
        voxel: f32,
        #[command(flatten)]
        handler: HandlerArgs,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn load_config(path: &Path) -> anyhow::Result<HandlerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {:?}", path))
}

fn build_handler(args: &HandlerArgs) -> anyhow::Result<PointCloudHandler> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => HandlerConfig::default(),
    };
    if let Some(engine) = args.engine {
        config.stream.engine = match engine {
            Engine::Deflate => StreamEngineKind::Deflate,
            Engine::Zstd => StreamEngineKind::Zstd,
        };
    }
    if let Some(level) = args.level {
        config.stream.level = level;
    }
    debug!("effective config: {}", serde_json::to_string(&config)?);
    Ok(handler_from_config(&config)?)
}

fn throughput(bytes: u64, secs: f64) -> String {
    if secs <= 0.0 {
        return "-".to_string();
    }
    format!("{}/s", human_bytes((bytes as f64 / secs) as u64))
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_compress(
    output: PathBuf,
    inputs: Vec<PathBuf>,
    codec: Codec,
    voxel: f32,
    args: &HandlerArgs,
) -> anyhow::Result<()> {
    let mut handler = build_handler(args)?;
    let kind = CompressionType::from(codec);

    let t0 = Instant::now();
    let mut raw = 0u64;
    let mut records = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let cloud = pcd::read(path)?;
        raw += cloud.data.len() as u64;
        let record = handler
            .compress(&cloud, kind, voxel)
            .with_context(|| format!("compressing {:?}", path))?;
        info!(
            "{:?}: {} points -> {}",
            path,
            cloud.meta.point_count(),
            human_bytes(record.compressed_data.len() as u64)
        );
        records.push(record);
    }
    let bytes = container::write(&records)?;
    std::fs::write(&output, &bytes).with_context(|| format!("writing {:?}", output))?;
    let elapsed = t0.elapsed();

    eprintln!("  codec       : {}", kind.name());
    if kind == CompressionType::GenericStream {
        let stream = handler.stream_codec();
        eprintln!("  engine      : {}", stream.name());
        eprintln!("  chunk size  : {}", human_bytes(stream.chunk_size() as u64));
    }
    eprintln!("  frames      : {}", records.len());
    eprintln!("  raw size    : {}", human_bytes(raw));
    eprintln!("  compressed  : {}", human_bytes(bytes.len() as u64));
    eprintln!("  ratio       : {:.2}x", raw as f64 / bytes.len() as f64);
    eprintln!("  throughput  : {}", throughput(raw, elapsed.as_secs_f64()));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(input: PathBuf, out_dir: PathBuf, args: &HandlerArgs) -> anyhow::Result<()> {
    let bytes = std::fs::read(&input).with_context(|| format!("reading {:?}", input))?;
    let records = container::read(&bytes)?;
    let mut handler = build_handler(args)?;
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory {:?}", out_dir))?;

    let t0 = Instant::now();
    let mut raw = 0u64;
    for (i, record) in records.iter().enumerate() {
        let cloud = handler
            .decompress(record)
            .with_context(|| format!("decompressing record {}", i))?;
        raw += cloud.data.len() as u64;
        let path = out_dir.join(format!("frame_{:04}.pcd", i));
        pcd::write(&path, &cloud)?;
        info!("record {} -> {:?} ({} points)", i, path, cloud.meta.point_count());
    }
    let elapsed = t0.elapsed();

    eprintln!("  frames      : {}", records.len());
    eprintln!("  raw size    : {}", human_bytes(raw));
    eprintln!("  throughput  : {}", throughput(raw, elapsed.as_secs_f64()));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf) -> anyhow::Result<()> {
    let bytes = std::fs::read(&file).with_context(|| format!("reading {:?}", file))?;
    let records = container::read(&bytes)?;

    println!("=== CLC1 File: {:?} ===", file);
    println!();
    println!("  records        : {}", records.len());
    println!("  file on disk   : {}", human_bytes(bytes.len() as u64));
    println!();
    println!(
        "  {:>6}  {:<16}  {:<16}  {:>20}  {:>10}  {:>12}  {:>8}",
        "record", "codec", "frame", "stamp", "points", "payload", "ratio"
    );
    println!("  {}", "-".repeat(100));
    for (i, r) in records.iter().enumerate() {
        let codec = match r.compression() {
            Ok(kind) => kind.name().to_string(),
            Err(_) => format!("unknown ({})", r.compression_type),
        };
        let stamp = r.meta.header.stamp;
        let raw = r.meta.height as u64 * r.meta.row_step as u64;
        println!(
            "  {:>6}  {:<16}  {:<16}  {:>10}.{:09}  {:>10}  {:>12}  {:>7.2}x",
            i,
            codec,
            r.meta.header.frame_id,
            stamp.sec,
            stamp.nsec,
            r.meta.point_count(),
            human_bytes(r.compressed_data.len() as u64),
            raw as f64 / r.compressed_data.len().max(1) as f64
        );
    }
    Ok(())
}

fn run_bench(frames: u32, points: usize, voxel: f32, args: &HandlerArgs) -> anyhow::Result<()> {
    let clouds = (0..frames)
        .map(|i| synth::frame(i, points))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let raw: u64 = clouds.iter().map(|c| c.data.len() as u64).sum();
    eprintln!(
        "benchmarking {} frames of {} points ({})...",
        frames,
        points,
        human_bytes(raw)
    );

    println!();
    println!("=== Compression Benchmark ===");
    println!(
        "  {:<16}  {:>12}  {:>8}  {:>14}  {:>14}  {:>9}",
        "codec", "compressed", "ratio", "encode", "decode", "roundtrip"
    );
    println!("  {}", "-".repeat(83));
    for kind in [
        CompressionType::None,
        CompressionType::GenericStream,
        CompressionType::DomainSpecific,
    ] {
        let mut handler = build_handler(args)?;

        let t0 = Instant::now();
        let records = clouds
            .iter()
            .map(|c| handler.compress(c, kind, voxel))
            .collect::<Result<Vec<_>, _>>()?;
        let encode = t0.elapsed().as_secs_f64();

        let t1 = Instant::now();
        let restored = records
            .iter()
            .map(|r| handler.decompress(r))
            .collect::<Result<Vec<_>, _>>()?;
        let decode = t1.elapsed().as_secs_f64();

        // lossless strategies must reproduce their input; the grid coder must
        // deliver the point count it announced
        let intact = records.iter().zip(&restored).zip(&clouds).all(|((r, out), src)| {
            match kind {
                CompressionType::DomainSpecific => out.meta.width == r.meta.width,
                _ if voxel > 0.0 => out.data.len() == r.meta.height as usize * r.meta.row_step as usize,
                _ => out.data == src.data,
            }
        });

        let compressed: u64 = records.iter().map(|r| r.compressed_data.len() as u64).sum();
        println!(
            "  {:<16}  {:>12}  {:>7.2}x  {:>14}  {:>14}  {:>9}",
            kind.name(),
            human_bytes(compressed),
            raw as f64 / compressed.max(1) as f64,
            throughput(raw, encode),
            throughput(raw, decode),
            if intact { "ok" } else { "MISMATCH" }
        );
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Compress {
            output,
            inputs,
            codec,
            voxel,
            handler,
        } => run_compress(output, inputs, codec, voxel, &handler),
        Commands::Decompress {
            input,
            out_dir,
            handler,
        } => run_decompress(input, out_dir, &handler),
        Commands::Inspect { file } => run_inspect(file),
        Commands::Bench {
            frames,
            points,
            voxel,
            handler,
        } => run_bench(frames, points, voxel, &handler),
    }
}

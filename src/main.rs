//! vizenc CLI
//!
//! Command-line interface for probing encoder modules and running encode
//! benchmarks against a render target.

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use vizenc::{
    encode::ScriptedModule,
    render::{ExternalTexture, FrameCounter},
    BridgeConfig, Codec, FfmpegPipe, MemorySink, Pipeline, Resolution, RunReport, TextureId,
    TrailingPacketPolicy,
};

#[derive(Parser)]
#[command(name = "vizenc")]
#[command(about = "GPU render target to hardware encoder bridge")]
#[command(version)]
struct Cli {
    /// TOML config file (flags override its values)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that an encoder module exports every required entry point
    Probe {
        /// Module path (default: platform GlCudaNvEncoder library)
        #[arg(short, long)]
        module: Option<PathBuf>,
    },

    /// Encode frames from a texture filled outside this process
    Bench(BenchArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug, Clone)]
struct BenchArgs {
    /// Number of frames to encode
    #[arg(short, long, default_value = "600")]
    frames: u64,

    /// Native texture handle to register with the encoder
    #[arg(short, long, default_value = "1")]
    texture: u32,

    /// Resolution (e.g., 1920x1080)
    #[arg(short, long)]
    resolution: Option<String>,

    /// Output file path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Video codec of the module's bitstream (h264, hevc, av1)
    #[arg(long)]
    codec: Option<String>,

    /// Output framerate
    #[arg(long)]
    fps: Option<u32>,

    /// Accelerator index
    #[arg(short, long)]
    device: Option<u32>,

    /// Encoder module path
    #[arg(short, long)]
    module: Option<PathBuf>,

    /// Drop the encoder's trailing packet if a frame failed
    #[arg(long)]
    discard_trailing_on_error: bool,

    /// Use the in-process scripted encoder and an in-memory sink (no GPU)
    #[arg(long)]
    scripted: bool,

    /// Packet size emitted per frame in scripted mode
    #[arg(long, default_value = "4096")]
    packet_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vizenc=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Probe { module } => cmd_probe(config, module),
        Commands::Bench(args) => cmd_bench(config, args).await,
        Commands::Config => cmd_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BridgeConfig> {
    match path {
        Some(path) => Ok(BridgeConfig::load(path)?),
        None => Ok(BridgeConfig::default()),
    }
}

fn cmd_probe(mut config: BridgeConfig, module: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(module) = module {
        config = config.with_module(module);
    }

    let probe = vizenc::probe_module(&config.encoder)?;

    println!("Encoder module: {}", probe.module);
    for (symbol, found) in &probe.symbols {
        println!("  {:<24} {}", symbol, if *found { "ok" } else { "MISSING" });
    }

    if !probe.is_complete() {
        anyhow::bail!(
            "{} is missing {} of {} entry points",
            probe.module,
            probe.missing().len(),
            probe.symbols.len()
        );
    }
    println!("\nAll entry points present");
    Ok(())
}

fn cmd_config(config: &BridgeConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

async fn cmd_bench(mut config: BridgeConfig, args: BenchArgs) -> anyhow::Result<()> {
    if let Some(res) = &args.resolution {
        let res = Resolution::parse(res)
            .ok_or_else(|| anyhow::anyhow!("Invalid resolution: {} (expected WxH)", res))?;
        config = config.with_resolution(res.width, res.height);
    }
    if let Some(output) = &args.output {
        config = config.with_output_path(output);
    }
    if let Some(codec) = &args.codec {
        config = config.with_codec(codec.parse::<Codec>()?);
    }
    if let Some(fps) = args.fps {
        config = config.with_framerate(fps);
    }
    if let Some(device) = args.device {
        config = config.with_device_index(device);
    }
    if let Some(module) = &args.module {
        config = config.with_module(module);
    }
    if args.discard_trailing_on_error {
        config = config.with_trailing_policy(TrailingPacketPolicy::DiscardOnError);
    }
    config.validate()?;

    println!("vizenc Encode Benchmark");
    println!("=======================\n");
    println!("Frames: {}", args.frames);
    println!("Texture: {}", TextureId(args.texture));
    println!(
        "Resolution: {}",
        config.encoder.resolution.unwrap_or(Resolution::FHD_1080P)
    );
    if args.scripted {
        println!("Encoder: scripted ({} byte packets)", args.packet_size);
    } else {
        println!("Codec: {}", config.output.codec);
        println!("Output: {}", config.output.path.display());
    }
    println!();

    let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping after the current frame");
            let _ = cancel_tx.try_send(());
        }
    });

    // Encoder calls block; keep them off the async workers
    let report =
        tokio::task::spawn_blocking(move || run_bench(config, &args, cancel_rx)).await??;

    println!("{}", report);
    println!("\nResults:");
    println!("  Stopped: {}", report.stop_reason);
    println!("  Frames encoded: {}", report.frames_encoded);
    println!("  Packets written: {}", report.packets_written);
    println!(
        "  Bytes written: {} ({:.2} MB)",
        report.bytes_written,
        report.bytes_written as f64 / 1_000_000.0
    );
    println!(
        "  Realtime capable (60fps): {}",
        if report.fps() >= 60.0 { "Yes" } else { "No" }
    );

    Ok(())
}

fn run_bench(
    config: BridgeConfig,
    args: &BenchArgs,
    cancel: Receiver<()>,
) -> anyhow::Result<RunReport> {
    let resolution = config.encoder.resolution.unwrap_or(Resolution::FHD_1080P);
    let source = FrameCounter::new(resolution, args.frames);
    let surface = ExternalTexture::new(TextureId(args.texture));

    if args.scripted {
        let module = ScriptedModule::new().with_synthetic_packets(args.packet_size);
        let report = Pipeline::new(&module, config)
            .with_cancel(cancel)
            .run(source, surface, || Ok(MemorySink::new()))?;
        return Ok(report);
    }

    let module = vizenc::load_module(&config.encoder)?;
    let output = config.output.clone();
    let report = Pipeline::new(&module, config)
        .with_cancel(cancel)
        .run(source, surface, || FfmpegPipe::open(&output))?;
    Ok(report)
}

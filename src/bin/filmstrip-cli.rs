use std::{path::PathBuf, sync::Arc};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use filmstrip::{
    CacheKey, CacheStore, ExtractionStrategy, FfmpegLogLevel, FfmpegSource, FileStore,
    FilmstripContext, FilmstripOptions, OperationType, ProgressCallback, ProgressInfo, ReadyPool,
    configuration::DEFAULT_THUMBNAIL_HEIGHT,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio::runtime::Runtime;

const CLI_AFTER_HELP: &str = "Examples:\n  filmstrip probe input.mp4 --json\n  filmstrip build input.mp4 --cache-dir .filmstrip --sprite-out sprite.jpg --progress\n  filmstrip resample input.mp4 --cache-dir .filmstrip --width 1280\n  filmstrip cache list --cache-dir .filmstrip\n  filmstrip completions zsh > _filmstrip";

#[derive(Debug, Parser)]
#[command(
    name = "filmstrip",
    version,
    about = "Build, cache, and resample video filmstrips",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional output.
    #[arg(long, global = true)]
    verbose: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Parser, Clone)]
struct PoolArgs {
    /// Input video path or URL.
    input: String,

    /// Directory holding cached pools.
    #[arg(long)]
    cache_dir: PathBuf,

    /// Thumbnail display height in pixels.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_HEIGHT)]
    height: u32,

    /// Extraction strategy: serial | concurrent.
    #[arg(long, default_value = "concurrent")]
    strategy: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print source metadata.
    #[command(
        about = "Print video source metadata",
        visible_alias = "info",
        after_help = "Examples:\n  filmstrip probe input.mp4\n  filmstrip probe input.mp4 --json"
    )]
    Probe {
        /// Input video path or URL.
        input: String,

        /// Output metadata as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract, pack, and cache a frame pool.
    #[command(
        about = "Build and cache a frame pool",
        after_help = "Examples:\n  filmstrip build input.mp4 --cache-dir .filmstrip\n  filmstrip build input.mp4 --cache-dir .filmstrip --strategy serial --max-width 2560 --sprite-out sprite.jpg"
    )]
    Build {
        #[command(flatten)]
        pool: PoolArgs,

        /// Widest layout the pool must serve.
        #[arg(long)]
        max_width: Option<u32>,

        /// Write the sprite sheet JPEG to this path.
        #[arg(long)]
        sprite_out: Option<PathBuf>,

        /// Output the result as machine-readable JSON.
        #[arg(long)]
        json: bool,

        /// Show a progress bar.
        #[arg(long)]
        progress: bool,
    },

    /// Resample a cached pool for a display width. Never extracts.
    #[command(
        about = "Resample a cached frame pool",
        after_help = "Examples:\n  filmstrip resample input.mp4 --cache-dir .filmstrip --width 1280 --json"
    )]
    Resample {
        #[command(flatten)]
        pool: PoolArgs,

        /// Display width in pixels.
        #[arg(long)]
        width: u32,

        /// Output frames as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear a cache directory.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completion scripts")]
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    /// List cached records.
    List {
        /// Directory holding cached pools.
        #[arg(long)]
        cache_dir: PathBuf,
    },
    /// Remove every cached record.
    Clear {
        /// Directory holding cached pools.
        #[arg(long)]
        cache_dir: PathBuf,
    },
}

/// Drives an indicatif bar from library progress callbacks.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for BarProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(total) = info.total {
            self.bar.set_length(total);
        }
        self.bar.set_position(info.current);
        let stage = match info.operation {
            OperationType::FrameExtraction => "extracting",
            OperationType::SpritePacking => "packing",
            _ => "working",
        };
        self.bar.set_message(stage);
    }
}

fn parse_strategy(value: &str) -> Result<ExtractionStrategy, Box<dyn std::error::Error>> {
    Ok(value
        .parse::<ExtractionStrategy>()
        .map_err(|error| format!("unsupported --strategy: {error}"))?)
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = &global.log_level {
        let parsed = level
            .parse::<FfmpegLogLevel>()
            .map_err(|error| format!("unsupported --log-level: {error}"))?;
        filmstrip::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

fn runtime() -> Result<Runtime, Box<dyn std::error::Error>> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn open_context(pool: &PoolArgs, options: FilmstripOptions) -> FilmstripContext {
    FilmstripContext::new(
        Arc::new(FfmpegSource::new(pool.input.clone())),
        Arc::new(FileStore::new(&pool.cache_dir)),
        options,
    )
}

fn print_ready(ready: &ReadyPool) {
    println!("{} {}", "pool".cyan().bold(), ready.key);
    println!(
        "  frames:   {} ({}x{} px each)",
        ready.pool.total_frames, ready.pool.frame_width, ready.pool.frame_height
    );
    println!(
        "  sprite:   {}x{} grid, {} bytes",
        ready.sprite.rows,
        ready.sprite.cols,
        ready.sprite.image.len()
    );
    println!(
        "  duration: {:.2}s, aspect {:.3}",
        ready.pool.duration.as_secs_f64(),
        ready.pool.aspect_ratio
    );
}

fn ready_json(ready: &ReadyPool) -> serde_json::Value {
    json!({
        "key": ready.key.pool_key(),
        "total_frames": ready.pool.total_frames,
        "frame_width": ready.pool.frame_width,
        "frame_height": ready.pool.frame_height,
        "aspect_ratio": ready.pool.aspect_ratio,
        "duration_seconds": ready.pool.duration.as_secs_f64(),
        "has_audio": ready.pool.has_audio,
        "created_at": ready.pool.created_at,
        "sprite": {
            "rows": ready.sprite.rows,
            "cols": ready.sprite.cols,
            "bytes": ready.sprite.image.len(),
            "empty": ready.sprite.is_empty(),
        },
    })
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Probe { input, json } => {
            let source = FfmpegSource::new(input);
            let info = runtime()?.block_on(source.probe())?;
            if json {
                let payload = json!({
                    "duration_seconds": info.duration.as_secs_f64(),
                    "width": info.native_width,
                    "height": info.native_height,
                    "aspect_ratio": info.aspect_ratio(),
                    "has_audio": info.has_audio,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Duration: {:.2}s", info.duration.as_secs_f64());
                println!("Video: {}x{}", info.native_width, info.native_height);
                println!("Aspect ratio: {:.3}", info.aspect_ratio());
                match info.has_audio {
                    Some(true) => println!("Audio: yes"),
                    Some(false) => println!("Audio: no"),
                    None => println!("Audio: unknown"),
                }
            }
        }
        Commands::Build {
            pool,
            max_width,
            sprite_out,
            json,
            progress,
        } => {
            let strategy = parse_strategy(&pool.strategy)?;
            let mut options = FilmstripOptions::new()
                .with_thumbnail_height(pool.height)
                .with_strategy(strategy);
            if let Some(width) = max_width {
                options = options.with_max_anticipated_width(width);
            }
            let bar = if progress {
                let progress = Arc::new(BarProgress::new()?);
                options = options.with_progress(progress.clone());
                Some(progress)
            } else {
                None
            };

            let context = open_context(&pool, options);
            let ready = runtime()?.block_on(context.ensure_pool(pool.height, strategy))?;

            if let Some(progress) = bar {
                progress.bar.finish_with_message("done");
            }

            if ready.sprite.is_empty() {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    "no frames could be captured; nothing was cached".yellow()
                );
            }

            if let Some(path) = &sprite_out {
                if ready.sprite.is_empty() {
                    return Err("no sprite to write".into());
                }
                std::fs::write(path, &ready.sprite.image)?;
                if cli.global.verbose {
                    eprintln!("{} {}", "saved".green().bold(), path.display());
                }
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&ready_json(&ready))?);
            } else {
                print_ready(&ready);
                println!(
                    "{} {}",
                    "success:".green().bold(),
                    format!("Cached frame pool in {}", pool.cache_dir.display()).green()
                );
            }
        }
        Commands::Resample { pool, width, json } => {
            let strategy = parse_strategy(&pool.strategy)?;
            let context = open_context(
                &pool,
                FilmstripOptions::new()
                    .with_thumbnail_height(pool.height)
                    .with_strategy(strategy),
            );
            let ready = runtime()?
                .block_on(context.cached_pool(pool.height, strategy))
                .ok_or("no cached frame pool for this input; run `filmstrip build` first")?;
            let frames = ready.resample(width);

            if json {
                let payload = json!({
                    "width": width,
                    "total_frames": ready.pool.total_frames,
                    "sprite": { "rows": ready.sprite.rows, "cols": ready.sprite.cols },
                    "frames": frames.iter().map(|frame| json!({
                        "display_index": frame.display_index,
                        "source_index": frame.source_index,
                        "grid_row": frame.grid_row,
                        "grid_col": frame.grid_col,
                        "display_width": frame.display_width,
                        "display_height": frame.display_height,
                        "scale": frame.scale,
                    })).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                if cli.global.verbose {
                    print_ready(&ready);
                }
                println!(
                    "{} {} of {} frame(s) for {width}px",
                    "resampled".cyan().bold(),
                    frames.len(),
                    ready.pool.total_frames
                );
                for frame in &frames {
                    println!(
                        "  #{:<3} frame {:<3} cell ({}, {})",
                        frame.display_index, frame.source_index, frame.grid_row, frame.grid_col
                    );
                }
            }
        }
        Commands::Cache { action } => match action {
            CacheAction::List { cache_dir } => {
                let store = FileStore::new(&cache_dir);
                let runtime = runtime()?;
                let mut keys = runtime.block_on(store.keys())?;
                keys.sort();
                if keys.is_empty() {
                    println!("Cache is empty: {}", cache_dir.display());
                }
                for key in keys {
                    match CacheKey::parse(&key) {
                        Some((kind, parsed)) => {
                            println!("{:<7} {parsed}", kind.as_str().cyan());
                        }
                        None => println!("{:<7} {key}", "other".yellow()),
                    }
                }
                if cli.global.verbose {
                    let bytes = runtime.block_on(store.usage())?;
                    println!("{bytes} bytes in {}", cache_dir.display());
                }
            }
            CacheAction::Clear { cache_dir } => {
                let store = FileStore::new(&cache_dir);
                let removed = runtime()?.block_on(async {
                    let keys = store.keys().await?;
                    for key in &keys {
                        store.remove(key).await?;
                    }
                    Ok::<usize, filmstrip::StoreError>(keys.len())
                })?;
                println!(
                    "{} {}",
                    "success:".green().bold(),
                    format!("Removed {removed} record(s) from {}", cache_dir.display()).green()
                );
            }
        },
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "filmstrip", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Commands, parse_strategy};
    use filmstrip::ExtractionStrategy;

    #[test]
    fn parse_strategy_aliases() {
        assert_eq!(parse_strategy("serial").unwrap(), ExtractionStrategy::Serial);
        assert_eq!(parse_strategy("Parallel").unwrap(), ExtractionStrategy::Concurrent);
        assert!(parse_strategy("random").is_err());
    }

    #[test]
    fn build_arguments_parse() {
        let cli = Cli::try_parse_from([
            "filmstrip",
            "build",
            "clip.mp4",
            "--cache-dir",
            "cache",
            "--height",
            "48",
            "--strategy",
            "serial",
        ])
        .unwrap();
        match cli.command {
            Commands::Build { pool, json, .. } => {
                assert_eq!(pool.input, "clip.mp4");
                assert_eq!(pool.height, 48);
                assert_eq!(pool.strategy, "serial");
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn resample_requires_width() {
        assert!(
            Cli::try_parse_from(["filmstrip", "resample", "clip.mp4", "--cache-dir", "cache"])
                .is_err()
        );
    }
}

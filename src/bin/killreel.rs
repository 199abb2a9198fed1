use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use killreel::{
    ClipWindow, ColorMode, DetectionEvent, FfmpegLogLevel, ProgressCallback, ProgressInfo,
    ReelOptions, ReelOutcome, ReelPhase, SearchRegion, Template, VideoSource, WindowMerge,
};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  killreel probe match.mp4 --json\n  killreel scan match.mp4 --template kill_icon.png --threshold 0.8\n  killreel cut match.mp4 --template kill_icon.png --out kill_highlight.mp4 --progress\n  killreel completions zsh > _killreel";

const NOTHING_FOUND_HINT: &str = "  1. Capture the icon from a paused frame of this very video, at its native resolution.\n  2. Lower the threshold to 0.5-0.6 (--threshold 0.55) and try again.";

/// Exit code when the scan found nothing.
const EXIT_NOTHING_FOUND: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "killreel",
    version,
    about = "Find a kill-feed icon in gameplay footage and cut a highlight reel",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long, global = true)]
    progress: bool,

    /// Allow replacing an existing output file.
    #[arg(long, global = true)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Args, Clone)]
struct DetectionArgs {
    /// Reference image of the kill icon (PNG or JPEG).
    #[arg(long, short = 't')]
    template: PathBuf,

    /// Minimum match score to accept, in (0, 1].
    #[arg(long, default_value_t = killreel::DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Match in color instead of grayscale.
    #[arg(long)]
    color: bool,

    /// Minimum seconds between two accepted kills.
    #[arg(long, default_value_t = killreel::DEFAULT_COOLDOWN_SECONDS)]
    cooldown: f64,

    /// Seconds kept before each kill.
    #[arg(long)]
    pre: Option<f64>,

    /// Seconds kept after each kill.
    #[arg(long)]
    post: Option<f64>,

    /// Seconds kept on both sides of each kill (overridden by --pre/--post).
    #[arg(long, default_value_t = killreel::DEFAULT_MARGIN_SECONDS)]
    margin: f64,

    /// Match every Nth decoded frame.
    #[arg(long, default_value_t = killreel::DEFAULT_SAMPLE_STRIDE)]
    stride: u64,

    /// Overlapping clip windows: keep (default) or union.
    #[arg(long, default_value = "keep")]
    merge: String,

    /// Only search this rectangle of the frame: x,y,width,height.
    #[arg(long)]
    region: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print video metadata.
    #[command(
        after_help = "Examples:\n  killreel probe match.mp4\n  killreel probe match.mp4 --json"
    )]
    Probe {
        /// Input video path.
        input: PathBuf,

        /// Output metadata as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Detect kills and print their timestamps without cutting.
    #[command(
        after_help = "Examples:\n  killreel scan match.mp4 --template kill_icon.png\n  killreel scan match.mp4 --template kill_icon.png --region 1500,0,420,300 --json"
    )]
    Scan {
        /// Input video path.
        input: PathBuf,

        #[command(flatten)]
        detection: DetectionArgs,

        /// Output events and windows as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Detect kills and write the highlight reel.
    #[command(
        after_help = "Examples:\n  killreel cut match.mp4 --template kill_icon.png\n  killreel cut match.mp4 --template kill_icon.png --out best.mp4 --margin 3 --merge union"
    )]
    Cut {
        /// Input video path.
        input: PathBuf,

        #[command(flatten)]
        detection: DetectionArgs,

        /// Output video path.
        #[arg(long, short = 'o', default_value = "kill_highlight.mp4")]
        out: PathBuf,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_merge(value: &str) -> Option<WindowMerge> {
    match value.trim().to_ascii_lowercase().as_str() {
        "keep" | "none" => Some(WindowMerge::Keep),
        "union" | "merge" => Some(WindowMerge::Union),
        _ => None,
    }
}

fn parse_region(value: &str) -> Option<SearchRegion> {
    let parts: Vec<u32> = value
        .split(',')
        .map(|part| part.trim().parse().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [x, y, width, height] if *width > 0 && *height > 0 => {
            Some(SearchRegion::new(*x, *y, *width, *height))
        }
        _ => None,
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let environment = env_logger::Env::default().default_filter_or(default_filter);
    let _ = env_logger::Builder::from_env(environment)
        .format_timestamp(None)
        .try_init();
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(global.verbose);
    if let Some(level) = &global.log_level {
        let parsed: FfmpegLogLevel = level.parse()?;
        killreel::set_ffmpeg_log_level(parsed);
    } else if !global.verbose {
        killreel::set_ffmpeg_log_level(FfmpegLogLevel::Error);
    }
    Ok(())
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn reel_options(
    detection: &DetectionArgs,
    global: &GlobalOptions,
) -> Result<(ReelOptions, Option<ProgressBar>), Box<dyn std::error::Error>> {
    let merge = parse_merge(&detection.merge)
        .ok_or(format!("unsupported --merge: {} (keep, union)", detection.merge))?;

    let mut options = ReelOptions::new()
        .with_threshold(detection.threshold)
        .with_color_mode(if detection.color {
            ColorMode::Color
        } else {
            ColorMode::Grayscale
        })
        .with_cooldown(detection.cooldown)
        .with_margins(
            detection.pre.unwrap_or(detection.margin),
            detection.post.unwrap_or(detection.margin),
        )
        .with_sample_stride(detection.stride)
        .with_window_merge(merge);

    if let Some(region) = &detection.region {
        let region = parse_region(region)
            .ok_or(format!("invalid --region: {region} (expected x,y,width,height)"))?;
        options = options.with_search_region(region);
    }

    let bar = if global.progress {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.green} {bar:40.cyan/blue} {pos:>3}% {msg}",
        )?;
        bar.set_style(style.progress_chars("##-"));
        options = options.with_progress(Arc::new(TerminalProgress { bar: bar.clone() }));
        Some(bar)
    } else {
        None
    };

    options.validate()?;
    Ok((options, bar))
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_position(info.overall_percent.round() as u64);
        let message = match (info.phase, info.current_timestamp) {
            (ReelPhase::Scanning, Some(at)) => format!("scanning {:.1}s", at.as_secs_f64()),
            (ReelPhase::Scanning, None) => "scanning".to_string(),
            (ReelPhase::Extracting, _) => match info.total {
                Some(total) => format!("cutting clip {}/{}", info.current, total),
                None => "cutting".to_string(),
            },
            _ => "done".to_string(),
        };
        self.bar.set_message(message);
    }
}

fn events_json(events: &[DetectionEvent], windows: &[ClipWindow]) -> serde_json::Value {
    json!({
        "events": events.iter().map(|event| json!({
            "timestamp": event.timestamp,
            "score": event.score.score,
            "x": event.score.location.0,
            "y": event.score.location.1,
        })).collect::<Vec<_>>(),
        "windows": windows.iter().map(|window| json!({
            "start": window.start,
            "end": window.end,
            "event": window.event_index,
        })).collect::<Vec<_>>(),
    })
}

fn print_events(events: &[DetectionEvent], windows: &[ClipWindow]) {
    for (index, event) in events.iter().enumerate() {
        println!(
            "{} {:>8.2}s  score {:.2} at ({}, {})",
            format!("kill #{}", index + 1).green().bold(),
            event.timestamp,
            event.score.score,
            event.score.location.0,
            event.score.location.1,
        );
    }
    for window in windows {
        println!(
            "{} {:.2}s .. {:.2}s ({:.2}s)",
            "clip".cyan(),
            window.start,
            window.end,
            window.duration()
        );
    }
}

fn print_nothing_found(frames_scanned: u64) {
    eprintln!(
        "{} no kills found in {frames_scanned} frames",
        "nothing found:".red().bold()
    );
    eprintln!("{}", "Things to try:".yellow());
    eprintln!("{NOTHING_FOUND_HINT}");
}

fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Probe { input, json } => {
            let source = VideoSource::open(&input)?;
            let metadata = source.metadata();
            if json {
                let payload = json!({
                    "format": metadata.format,
                    "duration_seconds": metadata.duration.as_secs_f64(),
                    "video": {
                        "width": metadata.video.width,
                        "height": metadata.video.height,
                        "fps": metadata.video.frames_per_second,
                        "frame_count": metadata.video.frame_count,
                        "codec": metadata.video.codec,
                        "start_seconds": metadata.video.start_seconds,
                    },
                    "audio": metadata.audio.as_ref().map(|audio| json!({
                        "sample_rate": audio.sample_rate,
                        "channels": audio.channels,
                        "codec": audio.codec,
                    })),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Format: {}", metadata.format);
                println!("Duration: {:.2}s", metadata.duration.as_secs_f64());
                println!(
                    "Video: {}x{} @ {:.2} fps [{}]",
                    metadata.video.width,
                    metadata.video.height,
                    metadata.video.frames_per_second,
                    metadata.video.codec,
                );
                match &metadata.audio {
                    Some(audio) => println!(
                        "Audio: {} Hz, {} ch [{}]",
                        audio.sample_rate, audio.channels, audio.codec,
                    ),
                    None => println!("Audio: none"),
                }
            }
        }

        Commands::Scan {
            input,
            detection,
            json,
        } => {
            let (options, bar) = reel_options(&detection, &cli.global)?;
            let template = Template::open(&detection.template, options.color_mode())?;
            let mut source = VideoSource::open(&input)?;

            let report = killreel::scan_video(&mut source, &template, &options)?;
            if let Some(bar) = &bar {
                bar.finish_and_clear();
            }

            let (pre, post) = options.margins();
            let windows = killreel::plan_windows(
                &report.events,
                source.metadata().duration_seconds(),
                pre,
                post,
                options.window_merge(),
            )?;

            if json {
                let mut payload = events_json(&report.events, &windows);
                payload["frames_decoded"] = json!(report.frames_decoded);
                payload["frames_sampled"] = json!(report.frames_sampled);
                payload["match_failures"] = json!(report.match_failures);
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else if report.events.is_empty() {
                print_nothing_found(report.frames_decoded);
            } else {
                print_events(&report.events, &windows);
            }

            if report.events.is_empty() {
                return Ok(ExitCode::from(EXIT_NOTHING_FOUND));
            }
        }

        Commands::Cut {
            input,
            detection,
            out,
        } => {
            ensure_writable_path(&out, cli.global.overwrite)?;
            let (options, bar) = reel_options(&detection, &cli.global)?;

            let outcome = killreel::run(&input, &detection.template, &out, &options);
            if let Some(bar) = &bar {
                bar.finish_and_clear();
            }

            match outcome? {
                ReelOutcome::Created {
                    events,
                    windows,
                    reel,
                } => {
                    if cli.global.verbose {
                        print_events(&events, &windows);
                    }
                    println!(
                        "{} {} kills, {} clips, {:.2}s -> {}",
                        "created".green().bold(),
                        events.len(),
                        reel.clips,
                        reel.written_duration,
                        reel.path.display()
                    );
                }
                ReelOutcome::NothingFound { frames_scanned } => {
                    print_nothing_found(frames_scanned);
                    return Ok(ExitCode::from(EXIT_NOTHING_FOUND));
                }
            }
        }

        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "killreel", &mut std::io::stdout());
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, parse_merge, parse_region};
    use clap::CommandFactory;
    use killreel::{SearchRegion, WindowMerge};

    #[test]
    fn parse_merge_aliases() {
        assert_eq!(parse_merge("keep"), Some(WindowMerge::Keep));
        assert_eq!(parse_merge("UNION"), Some(WindowMerge::Union));
        assert_eq!(parse_merge("merge"), Some(WindowMerge::Union));
        assert_eq!(parse_merge("splice"), None);
    }

    #[test]
    fn parse_region_needs_four_numbers() {
        assert_eq!(
            parse_region("1500, 0, 420, 300"),
            Some(SearchRegion::new(1500, 0, 420, 300))
        );
        assert_eq!(parse_region("1,2,3"), None);
        assert_eq!(parse_region("1,2,0,4"), None);
        assert_eq!(parse_region("a,b,c,d"), None);
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}

//! Terminal front-end (`ytmd`).
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ytmd search <query>` | Search, or resolve a URL to a single result |
//! | `ytmd info <target>` | Show the format list for one item |
//! | `ytmd download <targets>...` | Download into the Music / Videos library |
//! | `ytmd history` | List, delete or clear downloaded items |
//! | `ytmd engine` | Show the yt-dlp in use, optionally update it |
//!
//! The front-end only dispatches intents to the [`Orchestrator`] and renders
//! state snapshots; it never mutates state itself.

use clap::{ArgAction, ArgGroup, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{oneshot, watch};

use crate::config::AppConfig;
use crate::downloader::{FormatChoice, FormatOption};
use crate::errors::{AppError, Result};
use crate::history::DownloadItem;
use crate::orchestrator::{FormatPrompt, Orchestrator};
use crate::state::{DownloadPhase, TaskId, UiState};

/// Search, preview and download online audio/video into your media library.
#[derive(Parser, Debug)]
#[command(name = "ytmd", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file.
    ///
    /// Defaults to `<config dir>/yt-music-downloader/config.toml` when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace). `RUST_LOG` still wins.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search for media. A URL is resolved directly instead.
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Resolve one URL or id and list its formats.
    Info { target: String },

    /// Download one or more URLs / ids. Defaults to best audio.
    #[command(group(ArgGroup::new("mode").args(["audio", "video", "format", "pick"])))]
    Download {
        #[arg(required = true, num_args = 1..)]
        targets: Vec<String>,

        /// Best audio, converted to the configured audio format
        #[arg(long)]
        audio: bool,

        /// Best video up to --max-height, merged with best audio
        #[arg(long)]
        video: bool,

        #[arg(long, requires = "video")]
        max_height: Option<u32>,

        /// A literal format id, or an alias such as `720p`
        #[arg(long)]
        format: Option<String>,

        /// Choose a format interactively for each target
        #[arg(long)]
        pick: bool,
    },

    /// Show download history.
    History {
        /// Delete one entry by id
        #[arg(long, conflicts_with = "clear")]
        delete: Option<i64>,

        /// Delete every entry
        #[arg(long)]
        clear: bool,
    },

    /// Show the engine in use.
    Engine {
        /// Update the engine now
        #[arg(long)]
        update: bool,
    },
}

pub async fn execute(command: Commands, mut config: AppConfig) -> Result<()> {
    // Short-lived commands would cut a background update short.
    if !matches!(command, Commands::Download { .. }) {
        config.engine.update_check = false;
    }
    let orchestrator = Orchestrator::from_config(config)?;

    match command {
        Commands::Search { query } => {
            orchestrator.initialize().await?;
            let results = orchestrator.search(&query.join(" ")).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{:>2}. {}  [{}]  {}  ({})",
                    i + 1,
                    r.title,
                    r.duration,
                    r.channel,
                    r.video_id
                );
            }
            Ok(())
        }

        Commands::Info { target } => {
            orchestrator.initialize().await?;
            let prompt = orchestrator.fetch_info(&target).await?;
            print_prompt(&prompt);
            Ok(())
        }

        Commands::Download {
            targets,
            audio: _,
            video,
            max_height,
            format,
            pick,
        } => {
            orchestrator.initialize().await?;
            if pick {
                download_with_prompt(&orchestrator, &targets).await
            } else {
                let request = if video {
                    DownloadRequest::Preset(FormatChoice::BestVideo {
                        max_height: max_height
                            .unwrap_or(orchestrator.config().engine.max_video_height),
                    })
                } else if let Some(format) = format {
                    DownloadRequest::Typed(format)
                } else {
                    DownloadRequest::Preset(FormatChoice::BestAudio)
                };
                download_all(&orchestrator, targets, request).await
            }
        }

        Commands::History { delete, clear } => {
            if let Some(id) = delete {
                if orchestrator.delete_history(id)? {
                    println!("Deleted #{}", id);
                } else {
                    println!("No entry #{}", id);
                }
            } else if clear {
                let removed = orchestrator.clear_history()?;
                println!("Cleared {} entries", removed);
            } else {
                print_history(&orchestrator.history()?);
            }
            Ok(())
        }

        Commands::Engine { update } => {
            let info = orchestrator.initialize().await?;
            println!("{} {}", info.path, info.version);
            if update {
                let summary = orchestrator.update_engine().await?;
                println!("{}", summary);
            }
            Ok(())
        }
    }
}

/// How `download` picks the format for every target
enum DownloadRequest {
    Preset(FormatChoice),
    /// `--format` value, classified per target
    Typed(String),
}

/// Start every target as its own task and render progress until all finish.
async fn download_all(
    orchestrator: &Orchestrator,
    targets: Vec<String>,
    request: DownloadRequest,
) -> Result<()> {
    let (stop_tx, stop_rx) = oneshot::channel();
    let renderer = tokio::spawn(render_progress(orchestrator.state().subscribe(), stop_rx));

    let handles: Vec<_> = targets
        .into_iter()
        .map(|target| match &request {
            DownloadRequest::Preset(choice) => orchestrator.spawn_download(target, choice.clone()),
            DownloadRequest::Typed(format) => {
                orchestrator.spawn_download_format(target, format.clone())
            }
        })
        .collect();

    let mut saved = Vec::new();
    let mut failures = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(item)) => saved.push(item),
            Ok(Err(e)) => failures.push(e),
            Err(e) => failures.push(AppError::Task(e.to_string())),
        }
    }

    // Let the renderer draw the final phases before it stops.
    let final_state = orchestrator.state().flush().await;
    let _ = stop_tx.send(final_state);
    let _ = renderer.await;

    for item in &saved {
        println!("Saved {} -> {}", item.title, item.file_path.display());
    }
    report_failures(failures, saved.len())
}

/// Resolve each target, ask for a format, then download it.
async fn download_with_prompt(orchestrator: &Orchestrator, targets: &[String]) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut saved = 0;
    let mut failures = Vec::new();

    for target in targets {
        let prompt = match orchestrator.fetch_info(target).await {
            Ok(prompt) => prompt,
            Err(e) => {
                failures.push(e);
                continue;
            }
        };
        print_prompt(&prompt);

        let max_height = orchestrator.config().engine.max_video_height;
        let choice = loop {
            eprint!("Choose [1-{}] or a format id: ", prompt.options.len());
            let Some(line) = stdin.next_line().await? else {
                return Err(AppError::Task("No format chosen".to_string()));
            };
            match parse_pick(&line, &prompt.options, max_height) {
                Some(choice) => break choice,
                None => eprintln!("Not a valid choice: {}", line.trim()),
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let renderer = tokio::spawn(render_progress(orchestrator.state().subscribe(), stop_rx));
        let outcome = orchestrator.download_prompted(&prompt, choice).await;
        let _ = stop_tx.send(orchestrator.state().flush().await);
        let _ = renderer.await;

        match outcome {
            Ok(item) => {
                println!("Saved {} -> {}", item.title, item.file_path.display());
                saved += 1;
            }
            Err(e) => failures.push(e),
        }
    }

    report_failures(failures, saved)
}

fn report_failures(mut failures: Vec<AppError>, saved: usize) -> Result<()> {
    match failures.len() {
        0 => Ok(()),
        1 if saved == 0 => Err(failures.remove(0)),
        n => {
            for e in &failures {
                eprintln!("error: {}", e.user_message());
            }
            Err(AppError::Task(format!("{} of {} downloads failed", n, n + saved)))
        }
    }
}

/// A format id listed in the prompt, a 1-based index into it, or a curated
/// alias. Ids win over indices since yt-dlp ids are often numeric.
pub fn parse_pick(input: &str, options: &[FormatOption], max_height: u32) -> Option<FormatChoice> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let listed = options.iter().find(|o| {
        matches!(&o.choice, FormatChoice::Literal { format_id, .. } if format_id == input)
    });
    if let Some(option) = listed {
        return Some(option.choice.clone());
    }

    match input.parse::<usize>() {
        Ok(n) if (1..=options.len()).contains(&n) => Some(options[n - 1].choice.clone()),
        Ok(_) => None,
        Err(_) => FormatChoice::parse_alias(input, max_height),
    }
}

fn print_prompt(prompt: &FormatPrompt) {
    let detail = &prompt.detail;
    println!("{}", detail.title);
    println!("  {} | {} | {}", detail.uploader, detail.duration, detail.id);
    for (i, option) in prompt.options.iter().enumerate() {
        let mut line = format!("{:>3}. {}", i + 1, option.label);
        if let Some(size) = &option.size {
            line.push_str(&format!("  {}", size));
        }
        if let Some(note) = &option.note {
            line.push_str(&format!("  ({})", note));
        }
        println!("{}", line);
    }
}

fn print_history(items: &[DownloadItem]) {
    if items.is_empty() {
        println!("History is empty.");
        return;
    }
    for item in items {
        println!(
            "#{:<4} {}  {}  {}  {}",
            item.id,
            item.created_at_label(),
            item.format,
            item.title,
            item.file_path.display()
        );
    }
}

/// One bar per download task, driven purely by state snapshots.
struct ProgressView {
    multi: MultiProgress,
    bars: HashMap<TaskId, ProgressBar>,
    style: ProgressStyle,
}

impl ProgressView {
    fn new() -> Self {
        let style = ProgressStyle::with_template(
            "{spinner:.green} {prefix:.bold} [{bar:30.cyan/blue}] {percent:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            style,
        }
    }

    fn render(&mut self, state: &UiState) {
        for task in &state.downloads {
            if task.phase == DownloadPhase::Idle {
                continue;
            }
            let bar = self.bars.entry(task.id).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(1000));
                bar.set_style(self.style.clone());
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            });
            if bar.is_finished() {
                continue;
            }

            bar.set_prefix(truncate(task.display_name(), 32));
            bar.set_position((task.progress * 1000.0).round() as u64);
            let message = match (task.eta_seconds, &task.status) {
                (Some(eta), _) if task.phase == DownloadPhase::Downloading => {
                    format!("ETA {}:{:02}", eta / 60, eta % 60)
                }
                (_, Some(status)) => truncate(status, 60),
                _ => String::new(),
            };
            match task.phase {
                DownloadPhase::Recorded => bar.finish_with_message(message),
                DownloadPhase::Failed => bar.abandon_with_message(message),
                _ => bar.set_message(message),
            }
        }
    }
}

async fn render_progress(mut rx: watch::Receiver<UiState>, stop: oneshot::Receiver<UiState>) {
    let mut view = ProgressView::new();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                view.render(&snapshot);
            }
            last = &mut stop => {
                if let Ok(state) = last {
                    view.render(&state);
                }
                break;
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

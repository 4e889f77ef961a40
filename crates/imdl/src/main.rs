use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use imdl::config::AppConfig;
use imdl::download::{DownloadMode, DownloadSupervisor};
use imdl::logging::{self, LogSink};
use imdl::notify::NoticeQueue;
use imdl::{Error, Result};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Config file (defaults to ./imdl.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override a config value, e.g. --set download.output_dir=music
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive terminal UI (the default)
    Tui,
    /// Download one video without the UI and wait for it to finish
    Get {
        /// YouTube video URL
        url: String,
        #[arg(long, value_enum, default_value_t = DownloadMode::AudioVideo)]
        format: DownloadMode,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the fully resolved configuration (after extends and --set)
    Config,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut doc = imdl::config::load_or_default(args.config.as_deref())?;
    for o in &args.overrides {
        doc.apply_override(o)?;
    }
    let cfg = doc.app_config()?;

    match args.cmd.unwrap_or(Command::Tui) {
        Command::Tui => cmd_tui(&cfg),
        Command::Get { url, format, json } => cmd_get(&cfg, &url, format, json),
        Command::Config => cmd_config(&cfg),
    }
}

fn cmd_tui(cfg: &AppConfig) -> Result<()> {
    let queue = Arc::new(NoticeQueue::new(&cfg.notices));
    logging::init(LogSink::File(cfg.ui.log_file.clone()), Some(Arc::clone(&queue)))?;
    imdl::ui::run_tui(cfg, queue)
}

fn cmd_get(cfg: &AppConfig, url: &str, format: DownloadMode, json: bool) -> Result<()> {
    logging::init(LogSink::Stderr, None)?;

    let mut supervisor = DownloadSupervisor::system(cfg);
    supervisor.start(url, format)?;
    let outcome = supervisor
        .join()
        .ok_or_else(|| Error::msg("download worker exited without an outcome"))?;

    if json {
        let s = serde_json::to_string_pretty(&outcome)
            .map_err(|e| Error::msg(format!("failed to encode outcome: {e}")))?;
        println!("{s}");
    } else {
        match (&outcome.file_name, &outcome.error) {
            (Some(name), _) => println!("{name}"),
            (None, Some(err)) => eprintln!("download failed: {err}"),
            (None, None) => eprintln!("download failed"),
        }
    }

    if !outcome.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_config(cfg: &AppConfig) -> Result<()> {
    let s = toml::to_string_pretty(cfg)
        .map_err(|e| Error::Config(format!("failed to render config: {e}")))?;
    print!("{s}");
    Ok(())
}

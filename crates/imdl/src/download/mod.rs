use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::runner::Invocation;

pub mod supervisor;

pub use supervisor::{DownloadSupervisor, TaskOutcome};

static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.|music\.)?(youtube\.com/watch\?v=|youtu\.be/)[\w-]{11}(&.*)?$")
        .expect("target pattern is valid")
});

const AUDIO_FORMAT: &str = "mp3";
const MERGE_FORMAT: &str = "mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum DownloadMode {
    #[value(name = "mp3")]
    #[serde(rename = "mp3")]
    AudioOnly,
    #[value(name = "mp4")]
    #[serde(rename = "mp4")]
    AudioVideo,
}

impl DownloadMode {
    pub fn extension(self) -> &'static str {
        match self {
            DownloadMode::AudioOnly => AUDIO_FORMAT,
            DownloadMode::AudioVideo => MERGE_FORMAT,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DownloadMode::AudioOnly => "MP3",
            DownloadMode::AudioVideo => "MP4",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            DownloadMode::AudioOnly => DownloadMode::AudioVideo,
            DownloadMode::AudioVideo => DownloadMode::AudioOnly,
        }
    }

    fn format_args(self) -> &'static [&'static str] {
        match self {
            DownloadMode::AudioOnly => &["--extract-audio", "--audio-format", AUDIO_FORMAT],
            DownloadMode::AudioVideo => &["--format", "bestvideo+bestaudio/best"],
        }
    }
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TaskState {
    Idle = 0,
    Resolving = 1,
    Transferring = 2,
    Done = 3,
    Failed = 4,
}

impl TaskState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => TaskState::Resolving,
            2 => TaskState::Transferring,
            3 => TaskState::Done,
            4 => TaskState::Failed,
            _ => TaskState::Idle,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Resolving | TaskState::Transferring)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Idle => "idle",
            TaskState::Resolving => "resolving",
            TaskState::Transferring => "transferring",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub fn is_valid_target(target: &str) -> bool {
    TARGET_RE.is_match(target.trim())
}

pub fn validate_target(target: &str) -> Result<String> {
    let target = target.trim();
    if target.is_empty() {
        return Err(Error::Validation("no URL given".into()));
    }
    if !TARGET_RE.is_match(target) {
        return Err(Error::Validation(format!(
            "'{target}' is not a YouTube video URL"
        )));
    }
    Ok(target.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub target: String,
    pub mode: DownloadMode,
}

impl DownloadTask {
    pub fn new(target: &str, mode: DownloadMode) -> Result<Self> {
        Ok(Self {
            target: validate_target(target)?,
            mode,
        })
    }

    pub fn metadata_invocation(&self, program: &Path, cfg: &DownloadConfig) -> Invocation {
        with_output_dir(
            Invocation::new(program)
                .args(["--print", "filename"])
                .args(["--output", cfg.output_template.as_str()])
                .arg(self.target.as_str()),
            cfg,
        )
    }

    pub fn transfer_invocation(&self, program: &Path, cfg: &DownloadConfig) -> Invocation {
        with_output_dir(
            Invocation::new(program)
                .args(self.mode.format_args().iter().copied())
                .args(["--merge-output-format", MERGE_FORMAT])
                .args(["--output", cfg.output_template.as_str()])
                .arg(self.target.as_str()),
            cfg,
        )
    }

    pub fn final_file_name(&self, resolved: &str) -> String {
        Path::new(resolved.trim())
            .with_extension(self.mode.extension())
            .to_string_lossy()
            .into_owned()
    }
}

fn with_output_dir(inv: Invocation, cfg: &DownloadConfig) -> Invocation {
    if cfg.output_dir.as_os_str().is_empty() || cfg.output_dir == Path::new(".") {
        inv
    } else {
        inv.current_dir(&cfg.output_dir)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn accepts_watch_and_short_links() {
        for ok in [
            "https://www.youtube.com/watch?v=br3GIIQeefY",
            "http://music.youtube.com/watch?v=br3GIIQeefY&list=RD",
            "youtube.com/watch?v=AAAAAAAAAAA",
            "https://youtu.be/AAAAAAAAAAA",
            "  https://youtu.be/a-b_c-d_e-f  ",
        ] {
            assert!(is_valid_target(ok), "{ok}");
        }
        for bad in [
            "",
            "https://youtu.be/short",
            "https://vimeo.com/123456789",
            "https://youtu.be/AAAAAAAAAAAA",
            "--exec rm https://youtu.be/AAAAAAAAAAA",
        ] {
            assert!(!is_valid_target(bad), "{bad}");
            assert!(matches!(
                DownloadTask::new(bad, DownloadMode::AudioOnly),
                Err(Error::Validation(_))
            ));
        }
    }

    #[test]
    fn metadata_invocation_prints_filename_only() {
        let task = DownloadTask::new("https://youtu.be/AAAAAAAAAAA", DownloadMode::AudioOnly).unwrap();
        let inv = task.metadata_invocation(Path::new("/opt/yt-dlp"), &DownloadConfig::default());
        assert_eq!(inv.program, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(
            inv.args,
            vec![
                "--print",
                "filename",
                "--output",
                "%(title)s.%(ext)s",
                "https://youtu.be/AAAAAAAAAAA"
            ]
        );
        assert_eq!(inv.cwd, None);
    }

    #[test]
    fn transfer_invocation_depends_on_mode() {
        let cfg = DownloadConfig {
            output_dir: PathBuf::from("/music"),
            ..DownloadConfig::default()
        };
        let audio = DownloadTask::new("https://youtu.be/AAAAAAAAAAA", DownloadMode::AudioOnly).unwrap();
        let inv = audio.transfer_invocation(Path::new("yt-dlp"), &cfg);
        assert_eq!(
            inv.args[..5],
            ["--extract-audio", "--audio-format", "mp3", "--merge-output-format", "mp4"]
        );
        assert_eq!(inv.cwd, Some(PathBuf::from("/music")));

        let video = DownloadTask {
            mode: DownloadMode::AudioVideo,
            ..audio
        };
        let inv = video.transfer_invocation(Path::new("yt-dlp"), &cfg);
        assert_eq!(
            inv.args[..4],
            ["--format", "bestvideo+bestaudio/best", "--merge-output-format", "mp4"]
        );
        assert_eq!(inv.args.last().map(String::as_str), Some("https://youtu.be/AAAAAAAAAAA"));
    }

    #[test]
    fn final_name_replaces_extension() {
        let audio = DownloadTask::new("https://youtu.be/AAAAAAAAAAA", DownloadMode::AudioOnly).unwrap();
        assert_eq!(audio.final_file_name("clip.webm"), "clip.mp3");
        assert_eq!(audio.final_file_name("My Song (Live).v2.webm"), "My Song (Live).v2.mp3");

        let video = DownloadTask {
            mode: DownloadMode::AudioVideo,
            ..audio
        };
        assert_eq!(video.final_file_name("clip.webm"), "clip.mp4");
        assert_eq!(video.final_file_name("noext"), "noext.mp4");
    }

    #[test]
    fn task_state_round_trips_through_u8() {
        for s in [
            TaskState::Idle,
            TaskState::Resolving,
            TaskState::Transferring,
            TaskState::Done,
            TaskState::Failed,
        ] {
            assert_eq!(TaskState::from_u8(s as u8), s);
        }
        assert!(TaskState::Resolving.is_active());
        assert!(!TaskState::Done.is_active());
    }
}

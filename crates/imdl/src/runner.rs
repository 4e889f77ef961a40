use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote_arg(&self.program.to_string_lossy()))?;
        for a in &self.args {
            write!(f, " {}", quote_arg(a))?;
        }
        Ok(())
    }
}

fn quote_arg(a: &str) -> String {
    let plain = !a.is_empty()
        && a.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+%,@".contains(c));
    if plain {
        a.to_string()
    } else {
        format!("\"{}\"", a.replace('"', "\\\""))
    }
}

// Blocking: never call from the render thread.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<String> {
        let (mut reader, writer) =
            std::io::pipe().map_err(|e| Error::PipeCreation(e.to_string()))?;
        let writer_err = writer
            .try_clone()
            .map_err(|e| Error::PipeCreation(format!("duplicate write end: {e}")))?;

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err);
        if let Some(dir) = invocation.cwd.as_ref() {
            cmd.current_dir(dir);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let spawned = cmd.spawn();
        // `cmd` still owns our copies of the write end; EOF only arrives once they are closed.
        drop(cmd);
        let mut child = spawned.map_err(|e| {
            Error::ProcessSpawn(format!("{}: {e}", invocation.program.display()))
        })?;

        let mut raw = Vec::new();
        let read = reader.read_to_end(&mut raw);
        let status = child.wait().map_err(|e| {
            Error::Io(format!(
                "wait for {} failed: {e}",
                invocation.program.display()
            ))
        })?;
        read.map_err(|e| {
            Error::Io(format!(
                "read output of {} failed: {e}",
                invocation.program.display()
            ))
        })?;

        if !status.success() {
            tracing::warn!("{} exited with {status}", invocation.program.display());
        }
        tracing::debug!(bytes = raw.len(), "captured process output");

        Ok(strip_line_terminators(&String::from_utf8_lossy(&raw)))
    }
}

pub fn strip_line_terminators(s: &str) -> String {
    s.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_only_when_needed() {
        let inv = Invocation::new("yt-dlp")
            .args(["--print", "filename", "--output"])
            .arg("%(title)s.%(ext)s")
            .arg("a b")
            .arg("");
        assert_eq!(
            inv.to_string(),
            "yt-dlp --print filename --output \"%(title)s.%(ext)s\" \"a b\" \"\""
        );
        assert!(inv.has_flag("--print"));
        assert!(!inv.has_flag("filename.mp3"));
    }

    #[test]
    fn strips_all_line_terminators() {
        assert_eq!(strip_line_terminators("a\r\nb\nc\r"), "abc");
    }

    #[test]
    fn unspawnable_command_is_a_spawn_error() {
        let err = SystemRunner
            .run(&Invocation::new("./definitely-not-a-real-tool-7f3a"))
            .unwrap_err();
        assert!(matches!(err, Error::ProcessSpawn(_)), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn silent_command_returns_empty_output() {
        let out = SystemRunner.run(&Invocation::new("true")).unwrap();
        assert_eq!(out, "");
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_stderr_through_one_pipe() {
        let out = SystemRunner
            .run(
                &Invocation::new("/bin/sh")
                    .arg("-c")
                    .arg("printf 'clip.\\r\\nwebm\\n'; printf 'warn\\n' >&2"),
            )
            .unwrap();
        assert_eq!(out, "clip.webmwarn");
    }

    #[cfg(unix)]
    #[test]
    fn failing_exit_status_still_returns_output() {
        let out = SystemRunner
            .run(&Invocation::new("/bin/sh").args(["-c", "echo boom; exit 3"]))
            .unwrap();
        assert_eq!(out, "boom");
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_requested_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let out = SystemRunner
            .run(
                &Invocation::new("/bin/sh")
                    .args(["-c", "ls"])
                    .current_dir(tmp.path()),
            )
            .unwrap();
        assert_eq!(out, "");

        std::fs::write(tmp.path().join("marker.txt"), "x").unwrap();
        let out = SystemRunner
            .run(
                &Invocation::new("/bin/sh")
                    .args(["-c", "ls"])
                    .current_dir(tmp.path()),
            )
            .unwrap();
        assert_eq!(out, "marker.txt");
    }
}

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ToolConfig;
use crate::error::{Error, Result};

pub trait ToolFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(180))
    }
}

impl ToolFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("imdl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Fetch(format!("failed to build HTTP client: {e}")))?;
        let res = client
            .get(url)
            .send()
            .map_err(|e| Error::Fetch(format!("GET {url} failed: {e}")))?;
        if !res.status().is_success() {
            return Err(Error::Fetch(format!(
                "GET {url} failed with status {}",
                res.status()
            )));
        }
        let body = res
            .bytes()
            .map_err(|e| Error::Fetch(format!("failed to read body of {url}: {e}")))?;
        Ok(body.to_vec())
    }
}

// A bare file name means the working directory, never a PATH lookup.
pub fn resolve_program(cfg: &ToolConfig) -> Result<PathBuf> {
    if cfg.path.as_os_str().is_empty() {
        return Err(Error::Config("tool.path is empty".into()));
    }
    if cfg.path.is_absolute() {
        return Ok(cfg.path.clone());
    }
    let cwd = std::env::current_dir().map_err(|e| Error::Io(format!("cwd error: {e}")))?;
    Ok(cwd.join(&cfg.path))
}

pub fn ensure_tool(cfg: &ToolConfig, fetcher: &dyn ToolFetcher) -> Result<PathBuf> {
    let program = resolve_program(cfg)?;
    let name = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());

    if program.exists() {
        tracing::debug!("{name} already exists, skipping download.");
        return Ok(program);
    }
    tracing::info!("{name} not found, downloading...");

    let body = fetcher.fetch(&cfg.download_url)?;
    if body.is_empty() {
        return Err(Error::Fetch(format!(
            "{} returned an empty body",
            cfg.download_url
        )));
    }
    if let Some(expected) = cfg.sha256.as_deref() {
        verify_sha256(&body, expected)?;
    }
    install_executable(&program, &body)?;
    tracing::debug!(bytes = body.len(), "installed {}", program.display());
    Ok(program)
}

fn verify_sha256(body: &[u8], expected: &str) -> Result<()> {
    use sha2::{Digest, Sha256};

    let got = hex::encode(Sha256::digest(body));
    if got.eq_ignore_ascii_case(expected.trim()) {
        return Ok(());
    }
    Err(Error::Fetch(format!(
        "checksum mismatch: expected {}, got {got}",
        expected.trim()
    )))
}

// Written next to the target and renamed into place, so a crash mid-write
// never leaves a truncated binary that passes the existence check.
fn install_executable(target: &Path, body: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| Error::Io(format!("failed to create {}: {e}", dir.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::Io(format!("failed to create temp file in {}: {e}", dir.display())))?;
    tmp.write_all(body)
        .map_err(|e| Error::Io(format!("failed to write {}: {e}", target.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o755)).map_err(|e| {
            Error::Io(format!("failed to mark {} executable: {e}", target.display()))
        })?;
    }

    tmp.persist(target)
        .map_err(|e| Error::Io(format!("failed to install {}: {e}", target.display())))?;
    Ok(())
}

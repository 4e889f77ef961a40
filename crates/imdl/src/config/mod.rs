use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "imdl.toml";

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn empty() -> Self {
        Self {
            path: PathBuf::from("<defaults>"),
            value: Value::Table(Default::default()),
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            cur = cur.as_table()?.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v.clone().try_into().map_err(|e| {
            Error::Config(format!(
                "invalid [{path}] in {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(Some(parsed))
    }

    // The value is parsed as a TOML literal and falls back to a plain string.
    pub fn apply_override(&mut self, raw: &str) -> Result<()> {
        let Some((key, literal)) = raw.split_once('=') else {
            return Err(Error::Config(format!(
                "override '{raw}' must look like section.key=value"
            )));
        };
        let key = key.trim();
        if key.is_empty() || key.split('.').any(|s| s.trim().is_empty()) {
            return Err(Error::Config(format!("override '{raw}' has an empty key")));
        }
        let parsed = parse_literal(literal.trim());

        let mut overlay = parsed;
        for seg in key.rsplit('.') {
            let mut tbl = toml::Table::new();
            tbl.insert(seg.trim().to_string(), overlay);
            overlay = Value::Table(tbl);
        }
        merge(&mut self.value, overlay);
        Ok(())
    }

    pub fn app_config(&self) -> Result<AppConfig> {
        if let Some(tbl) = self.value.as_table() {
            for key in tbl.keys() {
                if !AppConfig::SECTIONS.contains(&key.as_str()) {
                    return Err(Error::Config(format!(
                        "unknown section [{key}] in {} (known: {})",
                        self.path.display(),
                        AppConfig::SECTIONS.join(", ")
                    )));
                }
            }
        }
        Ok(AppConfig {
            notices: self.deserialize_path("notices")?.unwrap_or_default(),
            tool: self.deserialize_path("tool")?.unwrap_or_default(),
            download: self.deserialize_path("download")?.unwrap_or_default(),
            ui: self.deserialize_path("ui")?.unwrap_or_default(),
        })
    }
}

fn parse_literal(raw: &str) -> Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(overlay_tbl)) => {
            for (k, v) in overlay_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn load_value_inner(path: &Path, seen: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(canonical.clone()) {
        return Err(Error::Config(format!(
            "config extends cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    if let Some(tbl) = value.as_table_mut()
        && let Some(parent) = tbl.remove("extends")
    {
        let Some(parent) = parent.as_str() else {
            return Err(Error::Config(format!(
                "'extends' in {} must be a string",
                path.display()
            )));
        };
        let parent_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(parent);
        out = load_value_inner(&parent_path, seen)?;
    }
    merge(&mut out, value);

    seen.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut seen = HashSet::new();
    let value = load_value_inner(path, &mut seen)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

pub fn load_or_default(path: Option<&Path>) -> Result<ConfigDoc> {
    match path {
        Some(p) => load(p),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() {
                load(p)
            } else {
                Ok(ConfigDoc::empty())
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppConfig {
    pub notices: NoticeConfig,
    pub tool: ToolConfig,
    pub download: DownloadConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    const SECTIONS: &'static [&'static str] = &["notices", "tool", "download", "ui"];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoticeConfig {
    pub display_secs: f32,
    // opacity lost per second once fading
    pub fade_rate: f32,
    // 0 disables the cap
    pub max_notices: usize,
    pub width: u16,
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            display_secs: 3.0,
            fade_rate: 0.75,
            max_notices: 64,
            width: 44,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub path: PathBuf,
    pub download_url: String,
    pub sha256: Option<String>,
    pub fetch_timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        let (file, asset) = if cfg!(target_os = "windows") {
            ("yt-dlp.exe", "yt-dlp.exe")
        } else if cfg!(target_os = "macos") {
            ("yt-dlp", "yt-dlp_macos")
        } else {
            ("yt-dlp", "yt-dlp_linux")
        };
        Self {
            path: PathBuf::from(file),
            download_url: format!(
                "https://github.com/yt-dlp/yt-dlp/releases/latest/download/{asset}"
            ),
            sha256: None,
            fetch_timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    pub output_template: String,
    pub output_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_template: "%(title)s.%(ext)s".into(),
            output_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UiConfig {
    pub tick_ms: u64,
    pub log_file: PathBuf,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            log_file: PathBuf::from("imdl.log"),
        }
    }
}

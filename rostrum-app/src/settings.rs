//! On-disk settings for the host binary.
//!
//! One JSON file in the per-user data directory. Every load passes through
//! [`AppSettings::normalize`], so the rest of the binary only ever sees
//! canonical model names, modes, and a well-formed endpoint.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub model: String,
    pub mode: String,
    pub endpoint: String,
    pub room_code: String,
    pub generation_model: String,
    pub question_count: u32,
    pub language: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            model: rostrum_core::DEFAULT_MODEL.into(),
            mode: "stream".into(),
            endpoint: "http://localhost:8080".into(),
            room_code: "demo".into(),
            generation_model: "gemma3".into(),
            question_count: 2,
            language: "en".into(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.model = normalize_model(&self.model);
        self.mode = normalize_mode(&self.mode);
        self.language = normalize_language(&self.language);
        self.endpoint = {
            let trimmed = self.endpoint.trim().trim_end_matches('/');
            if trimmed.is_empty() {
                "http://localhost:8080".into()
            } else {
                trimmed.into()
            }
        };
        self.room_code = {
            let trimmed = self.room_code.trim();
            if trimmed.is_empty() {
                "demo".into()
            } else {
                trimmed.into()
            }
        };
        self.generation_model = {
            let trimmed = self.generation_model.trim();
            if trimmed.is_empty() {
                "gemma3".into()
            } else {
                trimmed.into()
            }
        };
        self.question_count = self.question_count.clamp(1, 10);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }
}

pub fn normalize_model(raw: &str) -> String {
    let model = raw.trim().to_ascii_lowercase();
    match model.as_str() {
        "" => rostrum_core::DEFAULT_MODEL.into(),
        "tiny-en" => "tiny.en".into(),
        "base-en" => "base.en".into(),
        "small-en" => "small.en".into(),
        _ => model,
    }
}

pub fn normalize_mode(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "file" | "buffered" => "file".into(),
        _ => "stream".into(),
    }
}

pub fn normalize_language(raw: &str) -> String {
    let language = raw.trim().to_ascii_lowercase();
    match language.as_str() {
        "" | "en" | "eng" | "english" => "en".into(),
        _ => language,
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Rostrum")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("rostrum")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "settings file unreadable, using defaults: {e}");
            AppSettings::default()
        }),
        // A missing file is the first run; stay quiet and use defaults.
        Err(_) => AppSettings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    // Write-then-rename so a crash mid-save never leaves a torn file.
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, json)?;
    fs::rename(&staging, path)
}

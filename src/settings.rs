//! Application settings storage
//!
//! Stores the run configuration in a JSON file in the config directory.
//! Command-line flags override these values for a single run.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const APP_DIR: &str = "linkmine";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookbackUnit {
    Hours,
    Days,
    Weeks,
}

/// How far back from "now" to read messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookback {
    pub count: u32,
    pub unit: LookbackUnit,
}

impl Default for Lookback {
    fn default() -> Self {
        Self { count: 60, unit: LookbackUnit::Days }
    }
}

impl Lookback {
    pub fn duration(&self) -> Duration {
        let count = i64::from(self.count);
        match self.unit {
            LookbackUnit::Hours => Duration::hours(count),
            LookbackUnit::Days => Duration::days(count),
            LookbackUnit::Weeks => Duration::weeks(count),
        }
    }

    /// Oldest instant included in a run starting at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.duration()).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            LookbackUnit::Hours => "h",
            LookbackUnit::Days => "d",
            LookbackUnit::Weeks => "w",
        };
        write!(f, "{}{}", self.count, unit)
    }
}

/// Parses `60`, `60d`, `12h`, `2w`. A bare number means days.
impl FromStr for Lookback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, unit) = match s.char_indices().last() {
            Some((i, 'h')) | Some((i, 'H')) => (&s[..i], LookbackUnit::Hours),
            Some((i, 'd')) | Some((i, 'D')) => (&s[..i], LookbackUnit::Days),
            Some((i, 'w')) | Some((i, 'W')) => (&s[..i], LookbackUnit::Weeks),
            _ => (s, LookbackUnit::Days),
        };
        let count = digits
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid lookback '{}': expected e.g. 60d, 12h or 2w", s))?;
        Ok(Self { count, unit })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub lookback: Lookback,
    /// Exact handle, or "me"/"you" for messages written by the local user
    #[serde(default)]
    pub from_sender: Option<String>,
    /// Link service profile name (default: "tiktok")
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_output_path")]
    pub output_path: String,
    /// Override for the message database location
    #[serde(default)]
    pub db_path: Option<String>,
    /// Scan undecodable blobs as raw text
    #[serde(default)]
    pub scan_raw_blobs: bool,
    #[serde(default)]
    pub parallel: bool,
}

fn default_service() -> String {
    "tiktok".to_string()
}

fn default_output_path() -> String {
    "tiktok-links.json".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lookback: Lookback::default(),
            from_sender: None,
            service: default_service(),
            output_path: default_output_path(),
            db_path: None,
            scan_raw_blobs: false,
            parallel: false,
        }
    }
}

impl Settings {
    /// Load settings from disk or fall back to defaults
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable settings");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, content)
            .map_err(|e| format!("Failed to write settings: {}", e))
    }

    /// Update one field from its JSON name and a string value
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let non_empty = |v: &str| {
            let v = v.trim();
            if v.is_empty() { None } else { Some(v.to_string()) }
        };
        let flag = |v: &str| match v.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            other => Err(format!("Expected true/false for {}, got '{}'", key, other)),
        };

        match key {
            "lookback" => self.lookback = value.parse()?,
            "from_sender" => self.from_sender = non_empty(value),
            "service" => {
                if crate::links::service::by_name(value).is_none() {
                    return Err(format!("Unknown service '{}'", value));
                }
                self.service = value.trim().to_ascii_lowercase();
            }
            "output_path" => {
                self.output_path = non_empty(value).ok_or("output_path cannot be empty")?;
            }
            "db_path" => self.db_path = non_empty(value),
            "scan_raw_blobs" => self.scan_raw_blobs = flag(value)?,
            "parallel" => self.parallel = flag(value)?,
            other => return Err(format!("Unknown setting '{}'", other)),
        }
        Ok(())
    }
}

/// `<config_dir>/linkmine/settings.json`
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(SETTINGS_FILE)
}

//! Typed views over decoded package and application records.

use crate::vdf::{Record, lookup};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A licensing unit; its `appids` block maps slots to application ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageRecord(pub Record);

impl PackageRecord {
    /// Application ids referenced by this package, in slot order.
    pub fn app_ids(&self) -> Vec<u32> {
        self.0
            .get("appids")
            .and_then(Value::as_object)
            .map(|slots| slots.values().filter_map(parse_id).collect())
            .unwrap_or_default()
    }
}

/// Application category as reported by `common/type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum AppKind {
    Tool,
    Config,
    Dlc,
    Application,
    Game,
    Demo,
}

impl AppKind {
    pub const ALL: [AppKind; 6] = [
        AppKind::Tool,
        AppKind::Config,
        AppKind::Dlc,
        AppKind::Application,
        AppKind::Game,
        AppKind::Demo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppKind::Tool => "tool",
            AppKind::Config => "config",
            AppKind::Dlc => "dlc",
            AppKind::Application => "application",
            AppKind::Game => "game",
            AppKind::Demo => "demo",
        }
    }

    /// Case-insensitive lookup of a `common/type` value.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `config/launch` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchEntry {
    pub key: String,
    /// Executable path relative to the install directory.
    pub executable: String,
    pub arguments: Option<String>,
    pub os_list: Vec<String>,
    pub raw: Record,
}

impl LaunchEntry {
    pub fn supports(&self, os: &str) -> bool {
        self.os_list.iter().any(|o| o.eq_ignore_ascii_case(os))
    }
}

/// An installable unit with `common` and `config` sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppRecord(pub Record);

impl AppRecord {
    pub fn common(&self) -> Option<&Record> {
        self.0.get("common").and_then(Value::as_object)
    }

    pub fn common_str(&self, key: &str) -> Option<&str> {
        self.common()?.get(key)?.as_str()
    }

    pub fn name(&self) -> Option<&str> {
        self.common_str("name")
    }

    pub fn kind(&self) -> Option<AppKind> {
        AppKind::parse(self.common_str("type")?)
    }

    /// Whether the record may appear in typed views: it has a `common`
    /// section with a name and type and is not a driver package.
    pub fn is_listable(&self) -> bool {
        match self.common() {
            Some(common) => {
                self.name().is_some()
                    && self.common_str("type").is_some()
                    && !common.contains_key("driverversion")
            }
            None => false,
        }
    }

    pub fn install_dir(&self) -> Option<&str> {
        lookup(&self.0, &["config", "installdir"])?.as_str()
    }

    /// Launch entries in the order steamcmd listed them.
    pub fn launch_entries(&self) -> Vec<LaunchEntry> {
        let Some(launch) = lookup(&self.0, &["config", "launch"]).and_then(Value::as_object) else {
            return Vec::new();
        };

        launch
            .iter()
            .filter_map(|(key, entry)| {
                let entry = entry.as_object()?;
                let executable = entry.get("executable")?.as_str()?.to_owned();
                let os_list = lookup(entry, &["config", "oslist"])
                    .and_then(Value::as_str)
                    .map(|list| {
                        list.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                Some(LaunchEntry {
                    key: key.clone(),
                    executable,
                    arguments: entry
                        .get("arguments")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    os_list,
                    raw: entry.clone(),
                })
            })
            .collect()
    }
}

fn parse_id(value: &Value) -> Option<u32> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    }
}

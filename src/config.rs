//! Typed configuration, built once from command-line arguments.

use crate::error::{Error, Result};
use crate::progress::ProgressMode;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application selected by `--id` or `--name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Id(u32),
    /// Exact, case-sensitive application name.
    Name(String),
}

impl Target {
    /// `id` takes precedence when both are given.
    pub fn from_options(id: Option<u32>, name: Option<String>) -> Option<Self> {
        match (id, name) {
            (Some(id), _) => Some(Target::Id(id)),
            (None, Some(name)) => Some(Target::Name(name)),
            (None, None) => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Id(id) => write!(f, "{id}"),
            Target::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Platform {
    Windows,
    Macos,
    Linux,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Macos => "macos",
            Platform::Linux => "linux",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Bitness {
    #[value(name = "32")]
    Bits32,
    #[value(name = "64")]
    Bits64,
}

impl Bitness {
    pub fn as_str(self) -> &'static str {
        match self {
            Bitness::Bits32 => "32",
            Bitness::Bits64 => "64",
        }
    }
}

/// Directives added to the install script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub platform: Option<Platform>,
    pub bitness: Option<Bitness>,
    pub language: Option<String>,
}

/// How to start steamcmd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteamCmd {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for SteamCmd {
    fn default() -> Self {
        Self {
            program: "steamcmd".to_owned(),
            // Keep the session alive after a failed command so errors can be matched.
            args: vec!["+@ShutdownOnFailedCommand".to_owned(), "0".to_owned()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub steam_dir: PathBuf,
    pub games_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Overrides the record's own install directory name.
    pub install_dir: Option<PathBuf>,
    pub install: InstallOptions,
    pub username: Option<String>,
    pub steamcmd: SteamCmd,
    pub read_timeout: Option<Duration>,
    pub target: Option<Target>,
    pub progress: ProgressMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            steam_dir: expand_home(Path::new("~/.steam")),
            games_dir: expand_home(Path::new("~")),
            cache_dir: default_cache_dir(),
            install_dir: None,
            install: InstallOptions::default(),
            username: None,
            steamcmd: SteamCmd::default(),
            read_timeout: None,
            target: None,
            progress: ProgressMode::default(),
        }
    }
}

impl Config {
    /// The selected application, for commands that need one.
    pub fn require_target(&self) -> Result<&Target> {
        self.target
            .as_ref()
            .ok_or(Error::MissingArgument("--id or --name"))
    }
}

/// `$XDG_CACHE_HOME/steam-cli`, or `./.steam-cli-cache` without a home.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("steam-cli"))
        .unwrap_or_else(|| PathBuf::from(".steam-cli-cache"))
}

/// Replace a leading `~` with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_precedence() {
        assert_eq!(
            Target::from_options(Some(42), Some("Foo".into())),
            Some(Target::Id(42))
        );
        assert_eq!(
            Target::from_options(None, Some("Foo".into())),
            Some(Target::Name("Foo".into()))
        );
        assert_eq!(Target::from_options(None, None), None);
    }

    #[test]
    fn test_require_target() {
        let config = Config::default();
        assert!(matches!(
            config.require_target(),
            Err(Error::MissingArgument(_))
        ));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home(Path::new("/opt/games")), PathBuf::from("/opt/games"));
        assert_eq!(expand_home(Path::new("relative")), PathBuf::from("relative"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/.steam")), home.join(".steam"));
            assert_eq!(expand_home(Path::new("~")), home);
        }
    }

    #[test]
    fn test_default_steamcmd() {
        let cmd = SteamCmd::default();
        assert_eq!(cmd.program, "steamcmd");
        assert_eq!(cmd.args, vec!["+@ShutdownOnFailedCommand", "0"]);
    }
}

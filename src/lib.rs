//! # steam-cli
//!
//! Drive `steamcmd` programmatically: log in, enumerate owned packages, keep
//! a local cache of package and application metadata, install apps and find
//! the command that launches them.
//!
//! `steamcmd` is an interactive program. It runs inside a pseudo-terminal and
//! every conversation with it is expressed as a [`DispatchTable`]: a list of
//! output patterns, each with a reaction, run until the `Steam>` prompt comes
//! back.
//!
//! ## Quick start
//!
//! ```no_run
//! use steam_cli::{Client, Config, ProgressMode, Target, TerminalCredentials, TerminalProgress};
//!
//! fn main() -> steam_cli::Result<()> {
//!     let config = Config::default();
//!     let mut client = Client::from_config(
//!         &config,
//!         Box::new(TerminalCredentials::new(None, &config.steam_dir)),
//!         Box::new(TerminalProgress::new(ProgressMode::Plain)),
//!     )?;
//!
//!     let id = client.resolve_id(&Target::Name("Portal".into()))?;
//!     let dir = client.install_dir(id, &config.games_dir, None)?;
//!     client.install(id, &dir, &config.install)?;
//!     client.shutdown()
//! }
//! ```
//!
//! ## Metadata cache
//!
//! [`MetadataCache`] keeps `pkgs.json`, `apps.json` and `licenses.json` in
//! its root directory. Every record freshly printed by steamcmd is also saved
//! as a `pkg-<id>.vdf` or `app-<id>.vdf` side file, so an interrupted fetch
//! resumes where it stopped instead of asking steamcmd again.
//!
//! ## Writing a conversation
//!
//! ```no_run
//! use steam_cli::expect::{DispatchTable, Flow};
//! use steam_cli::ProcessSession;
//!
//! # fn main() -> steam_cli::Result<()> {
//! let mut session = ProcessSession::spawn("steamcmd", &[])?;
//! let mut lines = 0;
//! session.send_line("licenses_print")?;
//! DispatchTable::new()?
//!     .on(r"License packageID \d+:\r\n", |lines: &mut usize, _, _| {
//!         *lines += 1;
//!         Ok(Flow::Continue)
//!     })?
//!     .run(&mut session, &mut lines)?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod collections;
pub mod config;
pub mod covers;
pub mod credentials;
pub mod error;
pub mod expect;
pub mod progress;
pub(crate) mod pty;
pub mod record;
pub mod session;
pub mod vdf;

pub use cache::{FetchReport, MetadataCache, RecordKind};
pub use client::{Client, LoginState, SessionState};
pub use config::{Config, InstallOptions, SteamCmd, Target};
pub use credentials::{Credentials, FixedCredentials, TerminalCredentials};
pub use error::{Error, Result};
pub use expect::{DispatchTable, Flow, Outcome};
pub use progress::{Progress, ProgressMode, TerminalProgress};
pub use record::{AppKind, AppRecord, LaunchEntry, PackageRecord};
pub use session::{Captures, ProcessSession};

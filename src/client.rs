//! [`Client`]: the steamcmd flows (login, licenses, metadata, install) on top
//! of one lazily started session and the metadata cache.
//!
//! Every public operation first calls [`Client::ensure_session`] and, when it
//! needs the network, [`Client::ensure_logged_in`], so the session walks
//! through [`SessionState::NotStarted`] → [`SessionState::Spawned`] →
//! [`SessionState::Authenticated`] explicitly.

use crate::cache::{FetchReport, MetadataCache, RecordKind, RecordSink};
use crate::config::{Config, InstallOptions, SteamCmd, Target};
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::expect::{DispatchTable, Flow};
use crate::progress::Progress;
use crate::record::{AppKind, AppRecord, LaunchEntry};
use crate::session::{Captures, ProcessSession};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SELF_UPDATE: &str = r"\[\s*([^\]]*)\] (?:Checking for available update|Downloading [Uu]pdate|Download complete)[^\r\n]*\r\n";
const LICENSE: &str = r"License packageID (\d+):\r\n";
const PACKAGE_BLOCK: &str = r#"(?s)"(\d+)"\r\n\{(.*?)\r\n\}\r\n"#;
const APP_BLOCK: &str = r#"(?s)AppID : \d+[^\r\n]*\r\n"(\d+)"\r\n\{(.*?)\r\n\}\r\n"#;
const INSTALL_PROGRESS: &str =
    r"Update state \(?0x[0-9a-fA-F]+\)? ([A-Za-z ]+?), progress: (\d+(?:\.\d+)?)[^\r\n]*\r\n";
const INSTALL_ERROR: &str = r"(?i)error! ([^\r\n]+)\r\n";

/// Lifecycle of the steamcmd child as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Spawned,
    Authenticated,
    /// The child exited; the client does not respawn it.
    Terminated,
}

/// Position in the login conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    AwaitingUsername,
    AwaitingPassword,
    AwaitingGuardCode,
    AwaitingTwoFactor,
    LoggedIn,
    Failed,
}

struct LoginFlow<'c> {
    state: LoginState,
    credentials: &'c mut dyn Credentials,
    progress: &'c mut dyn Progress,
}

struct InstallFlow<'p> {
    progress: &'p mut dyn Progress,
    succeeded: bool,
}

pub struct Client {
    steamcmd: SteamCmd,
    read_timeout: Option<Duration>,
    session: Option<ProcessSession>,
    login_state: LoginState,
    cache: MetadataCache,
    credentials: Box<dyn Credentials>,
    progress: Box<dyn Progress>,
}

impl Client {
    pub fn new(
        steamcmd: SteamCmd,
        cache: MetadataCache,
        credentials: Box<dyn Credentials>,
        progress: Box<dyn Progress>,
    ) -> Self {
        Self {
            steamcmd,
            read_timeout: None,
            session: None,
            login_state: LoginState::AwaitingUsername,
            cache,
            credentials,
            progress,
        }
    }

    /// Open the cache named by `config` and prepare (but do not start) steamcmd.
    pub fn from_config(
        config: &Config,
        credentials: Box<dyn Credentials>,
        progress: Box<dyn Progress>,
    ) -> Result<Self> {
        let cache = MetadataCache::open(&config.cache_dir)?;
        let mut client = Self::new(config.steamcmd.clone(), cache, credentials, progress);
        client.read_timeout = config.read_timeout;
        Ok(client)
    }

    /// Use an already running session instead of spawning steamcmd.
    pub fn with_session(mut self, session: ProcessSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn progress(&mut self) -> &mut dyn Progress {
        self.progress.as_mut()
    }

    pub fn login_state(&self) -> LoginState {
        self.login_state
    }

    pub fn session_state(&self) -> SessionState {
        match &self.session {
            None => SessionState::NotStarted,
            Some(session) if !session.is_alive() => SessionState::Terminated,
            Some(session) if session.is_logged_in() => SessionState::Authenticated,
            Some(_) => SessionState::Spawned,
        }
    }

    /// Start steamcmd if it is not running yet and wait for its first prompt.
    pub fn ensure_session(&mut self) -> Result<&mut ProcessSession> {
        if self.session.is_none() {
            let mut session = ProcessSession::spawn(&self.steamcmd.program, &self.steamcmd.args)?
                .with_read_timeout(self.read_timeout);
            let progress = self.progress.as_mut();
            progress.report(Some(0.0), Some("Starting steamcmd"));
            DispatchTable::new()?
                .on(SELF_UPDATE, |_: &mut (), _, caps| {
                    let percent = caps
                        .text(0)
                        .and_then(|p| parse_percent(&p))
                        .unwrap_or(0.0);
                    progress.report(Some(percent), Some("Updating"));
                    Ok(Flow::Continue)
                })?
                .run(&mut session, &mut ())?;
            self.session = Some(session);
        }

        match self.session.as_mut() {
            Some(session) if session.is_alive() => Ok(session),
            _ => Err(Error::SessionTerminated),
        }
    }

    pub fn ensure_logged_in(&mut self) -> Result<()> {
        if self.ensure_session()?.is_logged_in() {
            return Ok(());
        }
        self.login()
    }

    /// Run the login conversation until steamcmd reports success.
    ///
    /// An explicit failure line aborts with [`Error::LoginFailed`]; returning
    /// to the prompt without either outcome starts another attempt.
    pub fn login(&mut self) -> Result<()> {
        self.ensure_session()?;
        let Self {
            session,
            credentials,
            progress,
            login_state,
            ..
        } = self;
        let session = session.as_mut().ok_or(Error::SessionTerminated)?;

        while !session.is_logged_in() {
            *login_state = LoginState::AwaitingUsername;
            let username = credentials.username()?;
            session.send_line(&format!("login {username}"))?;
            progress.report(Some(0.0), Some("Login"));

            let mut flow = LoginFlow {
                state: LoginState::AwaitingUsername,
                credentials: credentials.as_mut(),
                progress: progress.as_mut(),
            };
            let result = login_table().and_then(|mut table| table.run(session, &mut flow));
            *login_state = flow.state;
            result?;

            if flow.state == LoginState::LoggedIn {
                session.set_logged_in(true);
                tracing::info!(user = %username, "logged in");
            }
        }
        Ok(())
    }

    /// Ask steamcmd for the packages this account owns and persist them.
    pub fn enumerate_licenses(&mut self) -> Result<Vec<u32>> {
        self.ensure_logged_in()?;
        let session = self.session.as_mut().ok_or(Error::SessionTerminated)?;
        session.send_line("licenses_print")?;

        let mut ids = BTreeSet::new();
        DispatchTable::new()?
            .on(LICENSE, |ids: &mut BTreeSet<u32>, _, caps| {
                ids.extend(parse_id(caps, 0));
                Ok(Flow::Continue)
            })?
            .run(session, &mut ids)?;

        tracing::info!(count = ids.len(), "enumerated licenses");
        self.cache.set_licenses(ids);
        self.cache.save()?;
        Ok(self.cache.licenses().unwrap_or_default().to_vec())
    }

    /// Owned package ids, enumerating them only when none are cached.
    pub fn package_ids(&mut self) -> Result<Vec<u32>> {
        match self.cache.licenses() {
            Some(ids) => Ok(ids.to_vec()),
            None => self.enumerate_licenses(),
        }
    }

    pub fn fetch_packages(&mut self, ids: &[u32]) -> Result<FetchReport> {
        self.fetch(RecordKind::Package, ids)
    }

    pub fn fetch_applications(&mut self, ids: &[u32]) -> Result<FetchReport> {
        self.fetch(RecordKind::Application, ids)
    }

    fn fetch(&mut self, kind: RecordKind, ids: &[u32]) -> Result<FetchReport> {
        if !self.cache.unresolved(kind, ids).is_empty() {
            self.ensure_logged_in()?;
            self.progress.report(Some(0.0), Some(kind.progress_label()));
        }

        let Self {
            session,
            cache,
            progress,
            ..
        } = self;
        let report = cache.fetch_missing(kind, ids, progress.as_mut(), |missing, sink| {
            let session = session.as_mut().ok_or(Error::SessionTerminated)?;
            run_info_script(session, kind, missing, sink)
        })?;

        if let Err(e) = report.check() {
            tracing::warn!(?kind, "{e}");
        }
        Ok(report)
    }

    /// Make sure every owned package record is cached.
    ///
    /// Only ids missing from memory and from the side files reach steamcmd,
    /// so a fetch cut short on an earlier run is completed here.
    pub fn load_packages(&mut self) -> Result<()> {
        let ids = self.package_ids()?;
        let report = self.fetch_packages(&ids)?;
        if report.from_side_files + report.fetched > 0 {
            self.cache.save()?;
        }
        Ok(())
    }

    /// Make sure every application of every owned package is cached.
    pub fn load_apps(&mut self) -> Result<&MetadataCache> {
        self.load_packages()?;
        let ids = self.cache.app_ids_from_packages();
        let report = self.fetch_applications(&ids)?;
        if report.from_side_files + report.fetched > 0 {
            let dropped = self.cache.retain_apps(|record| record.common().is_some());
            tracing::debug!(dropped, "dropped apps without a common section");
            self.cache.save()?;
        }
        Ok(&self.cache)
    }

    /// Throw the cache away and rebuild it from steamcmd.
    pub fn update_cache(&mut self) -> Result<()> {
        self.cache.invalidate_all()?;
        self.load_packages()?;
        self.load_apps()?;
        Ok(())
    }

    /// Canonical application id for `target`.
    ///
    /// Ids must be cached; names must match a cached record's name exactly.
    pub fn resolve_id(&mut self, target: &Target) -> Result<u32> {
        let cache = self.load_apps()?;
        match target {
            Target::Id(id) if cache.app(*id).is_some() => Ok(*id),
            Target::Id(id) => Err(Error::NotFound(id.to_string())),
            Target::Name(name) => cache
                .apps()
                .iter()
                .find(|(_, record)| record.name() == Some(name.as_str()))
                .map(|(id, _)| *id)
                .ok_or_else(|| Error::NotFound(name.clone())),
        }
    }

    pub fn app(&mut self, target: &Target) -> Result<(u32, &AppRecord)> {
        let id = self.resolve_id(target)?;
        let record = self
            .cache
            .app(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok((id, record))
    }

    /// `(id, name)` of every listable app of `kind`, ordered case-insensitively by name.
    pub fn list(&mut self, kind: AppKind) -> Result<Vec<(u32, String)>> {
        let mut names: Vec<(u32, String)> = self
            .load_apps()?
            .apps_of_kind(kind)
            .filter_map(|(id, record)| Some((id, record.name()?.to_owned())))
            .collect();
        names.sort_by_key(|(_, name)| name.to_lowercase());
        Ok(names)
    }

    /// Where `id` is (or will be) installed: `install_dir` when given, else the
    /// record's `config/installdir`, joined under `games_dir`.
    pub fn install_dir(
        &mut self,
        id: u32,
        games_dir: &Path,
        install_dir: Option<&Path>,
    ) -> Result<PathBuf> {
        if let Some(dir) = install_dir {
            return Ok(games_dir.join(dir));
        }
        let record = self
            .load_apps()?
            .app(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let dir = record
            .install_dir()
            .ok_or(Error::MissingArgument("--install-dir"))?;
        Ok(games_dir.join(dir))
    }

    /// Install or update `id` into `install_dir`, reporting download progress.
    pub fn install(&mut self, id: u32, install_dir: &Path, options: &InstallOptions) -> Result<()> {
        self.ensure_logged_in()?;
        let Self {
            session, progress, ..
        } = self;
        let session = session.as_mut().ok_or(Error::SessionTerminated)?;

        let script = write_script(&install_script(id, install_dir, options))?;
        progress.report(Some(0.0), Some("Installing"));
        session.send_line(&format!("runscript \"{}\"", script.path().display()))?;

        let mut flow = InstallFlow {
            progress: progress.as_mut(),
            succeeded: false,
        };
        let success = format!(r"Success! App '{id}' fully installed\.[^\r\n]*\r\n");
        DispatchTable::new()?
            .on(INSTALL_PROGRESS, |flow: &mut InstallFlow<'_>, _, caps| {
                let label = caps.text(0).map(|l| titlecase(&l));
                let percent = caps.text(1).and_then(|p| p.parse().ok());
                flow.progress.report(percent, label.as_deref());
                Ok(Flow::Continue)
            })?
            .on(&success, |flow: &mut InstallFlow<'_>, _, _| {
                flow.succeeded = true;
                flow.progress.report(Some(100.0), None);
                Ok(Flow::Continue)
            })?
            .on(INSTALL_ERROR, move |_: &mut InstallFlow<'_>, _, caps| {
                Err(Error::InstallFailed {
                    app_id: id,
                    reason: caps.text(0).unwrap_or_default(),
                })
            })?
            .run(session, &mut flow)?;

        if !flow.succeeded {
            return Err(Error::InstallFailed {
                app_id: id,
                reason: "steamcmd returned to its prompt without reporting success".to_owned(),
            });
        }
        tracing::info!(app_id = id, dir = %install_dir.display(), "installed");
        Ok(())
    }

    /// First launch entry whose executable exists under `install_dir`.
    ///
    /// `None` means the app still needs to be installed.
    pub fn resolve_command(
        &mut self,
        id: u32,
        install_dir: &Path,
    ) -> Result<Option<(PathBuf, LaunchEntry)>> {
        let record = self
            .load_apps()?
            .app(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(record.launch_entries().into_iter().find_map(|entry| {
            let exe = install_dir.join(entry.executable.replace('\\', "/"));
            exe.is_file().then_some((exe, entry))
        }))
    }

    /// Send `quit` and wait for steamcmd to exit.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }
}

fn login_table<'a, 'c>() -> Result<DispatchTable<'a, LoginFlow<'c>>> {
    DispatchTable::new()?
        .on("password:", |flow: &mut LoginFlow<'_>, session, _| {
            flow.state = LoginState::AwaitingPassword;
            session.send_secret(&flow.credentials.password()?)?;
            Ok(Flow::Continue)
        })?
        .on("Steam Guard code:", |flow: &mut LoginFlow<'_>, session, _| {
            flow.state = LoginState::AwaitingGuardCode;
            session.send_secret(&flow.credentials.guard_code()?)?;
            Ok(Flow::Continue)
        })?
        .on("Two-factor code:", |flow: &mut LoginFlow<'_>, session, _| {
            flow.state = LoginState::AwaitingTwoFactor;
            session.send_secret(&flow.credentials.two_factor_code()?)?;
            Ok(Flow::Continue)
        })?
        .on(r"Logged in OK\r\n", |flow: &mut LoginFlow<'_>, _, _| {
            flow.state = LoginState::LoggedIn;
            flow.progress.report(Some(100.0), None);
            Ok(Flow::Continue)
        })?
        .on(
            r"FAILED login with result code ([^\r\n]+)\r\n",
            |flow: &mut LoginFlow<'_>, _, caps| {
                flow.state = LoginState::Failed;
                Err(Error::LoginFailed(caps.text(0).unwrap_or_default()))
            },
        )?
        .on(
            r"Logging in user '[^']*' to Steam Public \.\.\.\r\n",
            |flow: &mut LoginFlow<'_>, _, _| {
                flow.progress.report(Some(50.0), None);
                Ok(Flow::Continue)
            },
        )?
        .on(r"Waiting for user info\.\.\.OK\r\n", |flow: &mut LoginFlow<'_>, _, _| {
            flow.progress.report(Some(90.0), None);
            Ok(Flow::Continue)
        })
}

/// Submit one `runscript` asking for every id and feed each printed block to `sink`.
fn run_info_script(
    session: &mut ProcessSession,
    kind: RecordKind,
    ids: &[u32],
    sink: &mut RecordSink<'_>,
) -> Result<()> {
    let lines: String = ids
        .iter()
        .map(|id| format!("{} {}\n", kind.info_command(), id))
        .collect();
    let script = write_script(&lines)?;
    session.send_line(&format!("runscript \"{}\"", script.path().display()))?;

    let pattern = match kind {
        RecordKind::Package => PACKAGE_BLOCK,
        RecordKind::Application => APP_BLOCK,
    };
    // A malformed block fails the fetch, but only after the prompt is
    // consumed so the session stays usable.
    let mut malformed: Option<Error> = None;
    DispatchTable::new()?
        .on(pattern, |malformed: &mut Option<Error>, _, caps| {
            let Some(id) = parse_id(caps, 0) else {
                return Ok(Flow::Continue);
            };
            match sink(id, caps.bytes(1).unwrap_or_default()) {
                Err(e @ Error::Decode { .. }) => {
                    tracing::warn!(id, "malformed record: {e}");
                    malformed.get_or_insert(e);
                }
                other => other?,
            }
            Ok(Flow::Continue)
        })?
        .run(session, &mut malformed)?;
    malformed.map_or(Ok(()), Err)
}

/// The steamcmd script installing `id`.
pub fn install_script(id: u32, install_dir: &Path, options: &InstallOptions) -> String {
    let mut script = format!("force_install_dir \"{}\"\n", install_dir.display());
    if let Some(platform) = options.platform {
        script.push_str(&format!(
            "@sSteamCmdForcePlatformType \"{}\"\n",
            platform.as_str()
        ));
    }
    if let Some(bitness) = options.bitness {
        script.push_str(&format!(
            "@sSteamCmdForcePlatformBitness \"{}\"\n",
            bitness.as_str()
        ));
    }
    match &options.language {
        Some(language) => script.push_str(&format!(
            "app_update \"{id}\" -validate -language \"{language}\"\n"
        )),
        None => script.push_str(&format!("app_update \"{id}\" -validate\n")),
    }
    script
}

/// Script files live until the returned handle is dropped.
fn write_script(contents: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("steam-cli-")
        .suffix(".txt")
        .tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn parse_id(caps: &Captures, index: usize) -> Option<u32> {
    caps.text(index)?.trim().parse().ok()
}

/// `" 12 %"`, `"100%"`, `"----"` and the like.
fn parse_percent(text: &str) -> Option<f64> {
    text.trim_matches(|c: char| c == ' ' || c == '%' || c == '-')
        .parse()
        .ok()
}

fn titlecase(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

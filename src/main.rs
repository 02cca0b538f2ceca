use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::{Command as Process, ExitCode};
use std::sync::Arc;
use std::time::Duration;
use steam_cli::config::{Bitness, Platform, default_cache_dir, expand_home};
use steam_cli::covers::{self, HttpCoverSource};
use steam_cli::{
    AppKind, Client, Config, InstallOptions, ProgressMode, SteamCmd, Target, TerminalCredentials,
    TerminalProgress, collections,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "steam-cli",
    about = "Install, inspect and launch Steam apps through steamcmd",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and record the packages this account owns
    Login,
    /// Install or update the selected app
    Install,
    /// Launch the selected app, installing it first if needed
    Execute {
        /// Extra arguments passed to the game
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the cached metadata of the selected app as JSON
    Show,
    /// List owned apps of one kind
    List {
        #[arg(long, value_enum, default_value = "game")]
        kind: AppKind,
    },
    /// Download library artwork for every owned game
    DownloadCovers,
    /// Discard cached metadata and fetch it again
    UpdateCache,
    /// Print the library collections each app belongs to
    Categories,
}

#[derive(Args, Debug)]
struct Options {
    /// Application id
    #[arg(long, global = true)]
    id: Option<u32>,

    /// Exact application name (ignored when --id is given)
    #[arg(long, global = true)]
    name: Option<String>,

    /// Force the platform of the installed depots
    #[arg(long, global = true, value_enum)]
    platform: Option<Platform>,

    #[arg(long, global = true, value_enum)]
    bitness: Option<Bitness>,

    #[arg(long, global = true)]
    language: Option<String>,

    /// Directory apps are installed under
    #[arg(long, global = true, default_value = "~")]
    games_dir: PathBuf,

    /// Local Steam client directory
    #[arg(long, global = true, env = "STEAM_CLI_STEAM_DIR", default_value = "~/.steam")]
    steam_dir: PathBuf,

    /// Install directory, relative to --games-dir unless absolute
    #[arg(long, global = true)]
    install_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "STEAM_CLI_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "STEAM_CLI_USERNAME")]
    username: Option<String>,

    /// steamcmd executable
    #[arg(long, global = true, default_value = "steamcmd")]
    steamcmd: String,

    /// Give up when steamcmd prints nothing for this many seconds
    #[arg(long, global = true)]
    read_timeout: Option<u64>,

    /// Progress display
    #[arg(long, global = true, value_enum, default_value = "plain")]
    gui: ProgressMode,

    /// Log debug output to stderr
    #[arg(long, global = true)]
    debug: bool,
}

impl Options {
    fn into_config(self) -> Config {
        Config {
            steam_dir: expand_home(&self.steam_dir),
            games_dir: expand_home(&self.games_dir),
            cache_dir: self
                .cache_dir
                .as_deref()
                .map(expand_home)
                .unwrap_or_else(default_cache_dir),
            install_dir: self.install_dir,
            install: InstallOptions {
                platform: self.platform,
                bitness: self.bitness,
                language: self.language,
            },
            username: self.username,
            steamcmd: SteamCmd {
                program: self.steamcmd,
                ..SteamCmd::default()
            },
            read_timeout: self.read_timeout.map(Duration::from_secs),
            target: Target::from_options(self.id, self.name),
            progress: self.gui,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.options.debug);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<steam_cli::Error>() {
                Some(err) if err.is_user_error() => eprintln!("{err}"),
                _ => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.options.into_config();
    let credentials = TerminalCredentials::new(config.username.clone(), &config.steam_dir);
    let progress = TerminalProgress::new(config.progress);
    let mut client = Client::from_config(&config, Box::new(credentials), Box::new(progress))
        .with_context(|| format!("Failed to open cache in {}", config.cache_dir.display()))?;

    match cli.command {
        Command::Login => {
            let packages = client.enumerate_licenses()?;
            client.progress().finish();
            println!("Logged in, {} packages owned", packages.len());
        }
        Command::Install => {
            let id = client.resolve_id(config.require_target()?)?;
            let dir = client.install_dir(id, &config.games_dir, config.install_dir.as_deref())?;
            client.install(id, &dir, &config.install)?;
            client.progress().finish();
            println!("{}", dir.display());
        }
        Command::Execute { args } => return execute(&mut client, &config, &args),
        Command::Show => {
            let (_, record) = client.app(config.require_target()?)?;
            println!("{}", serde_json::to_string_pretty(&record.0)?);
        }
        Command::List { kind } => {
            for (id, name) in client.list(kind)? {
                println!("{id}\t{name}");
            }
        }
        Command::DownloadCovers => download_covers(&mut client, &config)?,
        Command::UpdateCache => {
            client.update_cache()?;
            client.progress().finish();
        }
        Command::Categories => categories(&mut client, &config)?,
    }

    client.shutdown()?;
    Ok(ExitCode::SUCCESS)
}

fn execute(client: &mut Client, config: &Config, args: &[String]) -> Result<ExitCode> {
    let id = client.resolve_id(config.require_target()?)?;
    let dir = client.install_dir(id, &config.games_dir, config.install_dir.as_deref())?;

    let resolved = match client.resolve_command(id, &dir)? {
        Some(found) => Some(found),
        None => {
            client.install(id, &dir, &config.install)?;
            client.progress().finish();
            client.resolve_command(id, &dir)?
        }
    };
    let Some((exe, entry)) = resolved else {
        bail!("No launch entry of app {id} has an executable under {}", dir.display());
    };
    client.shutdown()?;

    let windows = config.install.platform == Some(Platform::Windows)
        || (entry.supports("windows") && !entry.supports("linux"))
        || exe.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));
    let mut command = if windows {
        let mut wine = Process::new("wine");
        wine.arg(&exe);
        wine
    } else {
        Process::new(&exe)
    };
    command
        .args(entry.arguments.iter().flat_map(|a| a.split_whitespace()))
        .args(args)
        .current_dir(exe.parent().unwrap_or(dir.as_path()));

    tracing::info!(exe = %exe.display(), wine = windows, "launching");
    let status = command
        .status()
        .with_context(|| format!("Failed to launch {}", exe.display()))?;
    Ok(match status.code() {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(code as u8),
        None => ExitCode::FAILURE,
    })
}

fn download_covers(client: &mut Client, config: &Config) -> Result<()> {
    let games: Vec<_> = client
        .load_apps()?
        .games()
        .into_iter()
        .map(|(id, record)| (id, covers::jobs_for(&config.cache_dir, id, record)))
        .collect();

    let source = Arc::new(HttpCoverSource::new()?);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let report = runtime.block_on(covers::download(source, games, client.progress()));
    client.progress().finish();

    println!(
        "{} downloaded, {} already present, {} unavailable, {} failed",
        report.downloaded, report.skipped, report.missing, report.failed
    );
    Ok(())
}

fn categories(client: &mut Client, config: &Config) -> Result<()> {
    let memberships = collections::load(&config.steam_dir)?;
    if memberships.is_empty() {
        return Ok(());
    }
    let cache = client.load_apps()?;
    for (id, names) in memberships {
        let name = cache.app(id).and_then(|app| app.name()).unwrap_or_default();
        println!("{id}\t{name}\t{}", names.join(", "));
    }
    Ok(())
}

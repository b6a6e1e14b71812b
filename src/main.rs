use anyhow::Result;
use clap::{ArgAction, Parser};
use log::info;
use modforge::commands::{self, ChangeOptions, Session, SessionOptions};
use modforge::error::find_mod_error;
use modforge::package::PackageRequest;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// modforge - mod manager for game installations
///
/// Installs, upgrades and removes packages from a local catalog into a game
/// instance, resolving their dependencies and rolling back failed changes.
///
/// Instances, the cache location and install filters are read from
/// config.json in the data root.
///
/// Examples:
///   modforge install MechJeb2          # Install the newest compatible release
///   modforge install Kopernicus=1.12.1 # Install a specific release
///   modforge upgrade --all             # Upgrade everything that has a newer release
#[derive(Parser, Debug)]
#[command(author, version = env!("MODFORGE_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data root holding config.json, catalog.json and the cache (also via MODFORGE_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "MODFORGE_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub root: Option<PathBuf>,

    /// Game instance to operate on (defaults to the configured default)
    #[arg(long, value_name = "NAME", global = true)]
    pub instance: Option<String>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Answer yes to every confirmation
    #[arg(short = 'y', long = "yes", global = true)]
    pub yes: bool,

    /// Never prompt; conflicts that would need an answer fail instead
    #[arg(long, global = true)]
    pub headless: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install packages and their dependencies
    Install(InstallArgs),

    /// Remove packages and everything that depends on them
    Remove(RemoveArgs),

    /// Move packages to a newer (or given) release
    Upgrade(UpgradeArgs),

    /// Swap an installed package for another
    Replace(ReplaceArgs),

    /// Hard-link identical files across all configured instances
    Dedup,

    /// Show recommendations and suggestions for packages
    Recommend(RecommendArgs),

    /// List installed packages
    List,

    /// Roll back an interrupted operation
    Recover,
}

#[derive(clap::Args, Debug)]
pub struct ResolveArgs {
    /// Do not install recommended packages
    #[arg(long)]
    pub no_recommends: bool,

    /// Also install suggested packages
    #[arg(long)]
    pub with_suggests: bool,
}

impl ResolveArgs {
    fn options(&self) -> ChangeOptions {
        ChangeOptions {
            no_recommends: self.no_recommends,
            with_suggests: self.with_suggests,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// Packages in the form "identifier" or "identifier=version"
    #[arg(value_name = "ID[=VERSION]", required = true)]
    pub packages: Vec<PackageRequest>,

    #[command(flatten)]
    pub resolve: ResolveArgs,
}

#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    #[arg(value_name = "ID", required = true)]
    pub identifiers: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct UpgradeArgs {
    #[arg(value_name = "ID[=VERSION]")]
    pub packages: Vec<PackageRequest>,

    /// Upgrade every installed package with a newer compatible release
    #[arg(long, conflicts_with = "packages")]
    pub all: bool,

    #[command(flatten)]
    pub resolve: ResolveArgs,
}

#[derive(clap::Args, Debug)]
pub struct ReplaceArgs {
    /// The installed package to replace
    #[arg(value_name = "OLD")]
    pub replaced: String,

    /// The package taking its place
    #[arg(value_name = "NEW[=VERSION]")]
    pub replacement: PackageRequest,
}

#[derive(clap::Args, Debug)]
pub struct RecommendArgs {
    #[arg(value_name = "ID[=VERSION]", required = true)]
    pub packages: Vec<PackageRequest>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping...");
            on_interrupt.cancel();
        }
    });

    // The installer blocks on download events, so it runs off the async workers
    let handle = Handle::current();
    let result = tokio::task::spawn_blocking(move || run(cli, cancel, handle)).await?;

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => match find_mod_error(&err) {
            Some(stop) if stop.is_cancellation() => {
                info!("{:#}", err);
                eprintln!("{}", stop);
                Ok(ExitCode::FAILURE)
            }
            _ => Err(err),
        },
    }
}

fn run(cli: Cli, cancel: CancellationToken, handle: Handle) -> Result<()> {
    let options = SessionOptions {
        root: cli.root,
        instance: cli.instance,
        assume_yes: cli.yes,
        headless: cli.headless,
    };
    let session = Session::open(&options, cancel, handle)?;

    match cli.command {
        Commands::Install(args) => {
            commands::install(&session, &args.packages, args.resolve.options())?;
        }
        Commands::Remove(args) => {
            commands::remove(&session, &args.identifiers)?;
        }
        Commands::Upgrade(args) => {
            commands::upgrade(&session, &args.packages, args.all, args.resolve.options())?;
        }
        Commands::Replace(args) => {
            commands::replace(&session, &args.replaced, &args.replacement)?;
        }
        Commands::Dedup => {
            commands::dedup(&session)?;
        }
        Commands::Recommend(args) => {
            commands::recommend(&session, &args.packages)?;
        }
        Commands::List => commands::list(&session)?,
        Commands::Recover => {
            commands::recover(&session)?;
        }
    }
    Ok(())
}

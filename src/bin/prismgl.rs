//! PrismGL command-line tool.
//!
//! ```bash
//! prismgl info
//! prismgl set resolution_scale 0.75
//! prismgl install --install-dir /sdcard/PrismGL
//! prismgl serve
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prismgl_core::discovery::{DiscoveryProvider, INFO_COLUMNS};
use prismgl_core::installer::{self, Installer};
use prismgl_core::manifest::{self, MANIFEST_FILE_NAME};
use prismgl_core::preferences::{PrefKey, PreferenceStore};
use prismgl_core::runtime::{HeadlessRuntime, RuntimeBridge};
use prismgl_core::settings::{self, Settings};
use prismgl_core::sync::{SyncReport, Synchronizer};
use prismgl_core::logging;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// PrismGL - renderer plugin discovery and configuration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (defaults to the standard locations)
    #[arg(short, long, env = "PRISMGL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the install directory
    #[arg(long)]
    install_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the renderer info row
    Info,
    /// Show one preference, or all of them
    Get { key: Option<String> },
    /// Set a preference and synchronize the manifest
    Set { key: String, value: String },
    /// Restore default preferences and synchronize
    Reset,
    /// Stage the library and manifest into the install directory
    Install,
    /// Report the install directory state
    Status,
    /// Print the decoded manifest
    Manifest,
    /// Serve the discovery endpoint
    Serve {
        /// Socket path (defaults to the configured one)
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => settings::load_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => settings::load().context("Failed to load settings")?,
    };
    if let Some(dir) = args.install_dir {
        settings.install_dir = dir;
    }

    let level = if args.verbose { "debug" } else { settings.log_level.as_str() };
    logging::init(level);

    match args.command {
        Command::Info => {
            let provider = DiscoveryProvider::new(&settings.install_dir, build_installer(&settings).identity());
            let info = provider.query_info();
            for (column, value) in INFO_COLUMNS.iter().zip(info.row()) {
                println!("{column:<12} {value}");
            }
        }
        Command::Get { key } => {
            let store = open_store(&settings)?;
            match key {
                Some(key) => {
                    let key: PrefKey = key.parse()?;
                    println!("{}", store.get(key));
                }
                None => {
                    for (key, value) in store.entries() {
                        println!("{:<20} {value}", key.as_str());
                    }
                }
            }
        }
        Command::Set { key, value } => {
            let key: PrefKey = key.parse()?;
            let value = key.parse_value(&value)?;
            let report = synchronizer(&settings)?
                .update(key, value)
                .with_context(|| format!("Failed to set {key}"))?;
            print_report(&report);
        }
        Command::Reset => {
            let report = synchronizer(&settings)?
                .reset()
                .context("Failed to reset preferences")?;
            print_report(&report);
        }
        Command::Install => {
            let store = open_store(&settings)?;
            let set = build_installer(&settings)
                .install(&settings.install_dir, &store.record())
                .with_context(|| format!("Failed to install into {}", settings.install_dir.display()))?;
            println!("{}", set.state());
            if let Some(library) = &set.library {
                println!("library  {} ({} bytes, md5 {})", library.path.display(), library.size, library.digest);
            }
            if let Some(e) = &set.library_error {
                println!("warning  {e}");
            }
            println!("manifest {}", set.manifest.display());
        }
        Command::Status => {
            let library = build_installer(&settings).identity().library.clone();
            let state = installer::inspect(&settings.install_dir, &library);
            println!("{}: {state}", settings.install_dir.display());
        }
        Command::Manifest => {
            let manifest = manifest::load_or_default(&settings.install_dir.join(MANIFEST_FILE_NAME));
            print!("{}", manifest.to_json().context("Failed to encode manifest")?);
        }
        Command::Serve { socket } => serve(&settings, socket)?,
    }

    Ok(())
}

fn open_store(settings: &Settings) -> Result<PreferenceStore> {
    PreferenceStore::open(&settings.prefs_dir)
        .with_context(|| format!("Failed to open preferences in {}", settings.prefs_dir.display()))
}

fn build_installer(settings: &Settings) -> Installer {
    Installer::new(&settings.native_lib_dir).with_abis(settings.abis.iter().cloned())
}

fn synchronizer(settings: &Settings) -> Result<Synchronizer<HeadlessRuntime>> {
    let store = Arc::new(open_store(settings)?);
    let mut bridge = RuntimeBridge::new(HeadlessRuntime::new());
    bridge
        .initialize(&settings.cache_dir)
        .context("Failed to start runtime")?;
    Ok(Synchronizer::new(store, build_installer(settings), &settings.install_dir, bridge))
}

fn print_report(report: &SyncReport) {
    println!("{}", report.artifacts.state());
    println!("target_fps       {}", report.config.target_frame_rate);
    println!("resolution_scale {}", report.config.resolution_scale);
    println!("backend          {}", report.config.backend);
}

#[cfg(unix)]
fn serve(settings: &Settings, socket: Option<PathBuf>) -> Result<()> {
    use prismgl_core::endpoint::DiscoveryServer;

    let socket = socket.unwrap_or_else(|| settings.socket_path.clone());
    let provider = DiscoveryProvider::new(&settings.install_dir, build_installer(settings).identity());
    let server = DiscoveryServer::bind(&socket, provider)
        .with_context(|| format!("Failed to bind {}", socket.display()))?;
    info!(socket = %server.socket_path().display(), "serving discovery requests");
    server.serve().context("Discovery endpoint stopped")
}

#[cfg(not(unix))]
fn serve(_settings: &Settings, _socket: Option<PathBuf>) -> Result<()> {
    anyhow::bail!("the discovery endpoint requires Unix domain sockets")
}

//! Sparkplug - live plugin host.
//!
//! Thin trigger surface over the runner core: run plugins, list them,
//! unload them, or keep watching the plugins root and reload plugins as
//! their files change.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use notify::{RecursiveMode, Watcher};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sparkplug::{
    Config, HostPaths, PluginDescriptor, RunRequest, RunnerHost, TriggerContext,
};

/// Live plugin host
#[derive(Parser)]
#[command(name = "sparkplug")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base directory for the host layout (plugins, libraries, caches)
    #[arg(long, global = true, env = "SPARKPLUG_HOME")]
    home: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run plugins by id
    Run {
        /// Plugin ids to run, in order
        ids: Vec<String>,

        /// Run every discovered plugin
        #[arg(short, long)]
        all: bool,
    },

    /// List discovered plugins
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Unload a loaded plugin
    Unload {
        /// Plugin id to unload
        id: String,
    },

    /// Watch the plugins root and reload plugins as their files change
    Watch,

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("info") };
    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    let config = Config::load()?;
    // --home overrides any configured layout wholesale.
    let paths = match &cli.home {
        Some(home) => HostPaths::with_base(home),
        None => config.host_paths(),
    };

    let host = match &config.general.registry_url {
        Some(url) => RunnerHost::with_registry_url(paths, url)?,
        None => RunnerHost::new(paths)?,
    };

    match cli.command {
        Commands::Run { ids, all } => cmd_run(&host, ids, all),
        Commands::List { format } => cmd_list(&host, &format),
        Commands::Unload { id } => cmd_unload(&host, &id),
        Commands::Watch => cmd_watch(&host, &config),
        Commands::Config { path } => cmd_config(path),
    }
}

/// Run a batch of plugins and render the aggregated error view.
fn cmd_run(host: &RunnerHost, ids: Vec<String>, all: bool) -> Result<()> {
    let request = if all || ids.is_empty() { RunRequest::All } else { RunRequest::Ids(ids) };

    let report = host.request_run(&request, &TriggerContext::manual());
    if finish(host, report) {
        std::process::exit(1);
    }
    Ok(())
}

/// One row of `list` output.
#[derive(Serialize)]
struct PluginRow {
    id: String,
    language: Option<String>,
    path: PathBuf,
}

/// List discovered plugins with their selected language.
fn cmd_list(host: &RunnerHost, format: &str) -> Result<()> {
    let rows: Vec<PluginRow> = host
        .plugins()
        .into_iter()
        .map(|(id, root)| {
            let language = PluginDescriptor::resolve(&id, &root)
                .map(|descriptor| descriptor.language.to_string());
            PluginRow { id, language, path: root }
        })
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            if rows.is_empty() {
                println!("no plugins under {}", host.paths().plugins_root().display());
            }
            for row in rows {
                let language = row.language.as_deref().unwrap_or("no entry point");
                println!("{:<24} {:<12} {}", row.id, language, row.path.display());
            }
        }
    }
    Ok(())
}

fn cmd_unload(host: &RunnerHost, id: &str) -> Result<()> {
    let report = host.request_unload(id);
    finish(host, report);
    Ok(())
}

/// Long-running mode: run plugins on change until interrupted.
fn cmd_watch(host: &RunnerHost, config: &Config) -> Result<()> {
    if config.general.run_all_on_startup {
        let report = host.request_run(&RunRequest::All, &TriggerContext::startup());
        print_report(&report);
    }

    let (tx, rx) = mpsc::channel();
    let mut watcher =
        notify::recommended_watcher(move |event: Result<notify::Event, notify::Error>| {
            let _ = tx.send(event);
        })?;
    watcher.watch(host.paths().plugins_root(), RecursiveMode::Recursive)?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })?;

    println!("watching {} (ctrl-c to stop)", host.paths().plugins_root().display());

    while running.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(event)) => event,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "watch error");
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut ids = changed_plugin_ids(host, &event.paths);

        // Editors fire bursts of events per save; give the burst a moment
        // to settle and fold it into one batch.
        std::thread::sleep(Duration::from_millis(100));
        while let Ok(Ok(event)) = rx.try_recv() {
            ids.extend(changed_plugin_ids(host, &event.paths));
        }

        if ids.is_empty() {
            continue;
        }

        let request = RunRequest::Ids(ids.into_iter().collect());
        tracing::info!(?request, "reloading changed plugins");
        let report = host.request_run(&request, &TriggerContext::file_change());
        print_report(&report);
    }

    // Host shutdown tears every unit down.
    let report = host.unload_all();
    print_report(&report);
    Ok(())
}

/// Map changed paths back to the plugin ids that own them.
fn changed_plugin_ids(host: &RunnerHost, paths: &[PathBuf]) -> BTreeSet<String> {
    let known = host.plugins();
    paths
        .iter()
        .filter_map(|path| {
            let relative = path.strip_prefix(host.paths().plugins_root()).ok()?;
            let first = relative.components().next()?;
            let id = first.as_os_str().to_str()?.to_string();
            known.contains_key(&id).then_some(id)
        })
        .collect()
}

fn cmd_config(path_only: bool) -> Result<()> {
    if path_only {
        match Config::config_dir() {
            Some(dir) => println!("{}", dir.join("config.toml").display()),
            None => println!("no config directory available"),
        }
        return Ok(());
    }

    let config = Config::load()?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Print a batch report and return whether it carried errors.
fn finish(host: &RunnerHost, report: sparkplug::ErrorReport) -> bool {
    print_report(&report);
    let loaded = host.loaded_ids();
    if !loaded.is_empty() {
        tracing::debug!(?loaded, "execution units currently loaded");
    }
    !report.is_empty()
}

fn print_report(report: &sparkplug::ErrorReport) {
    if !report.is_empty() {
        eprintln!("{report}");
    }
}

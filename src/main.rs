// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use depotlink::{
    acquire, changes, current_configuration, default_config_file, is_tracked, server_info,
    Changelist, ConnectionOverrides, Direction, PathCache,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, process::exit};
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  depotlink [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Connection configuration file to load.
    #[arg(short, long, value_name = "path", global = true)]
    config: Option<String>,

    /// Override the user to authenticate as.
    #[arg(short, long, value_name = "name", global = true)]
    user: Option<String>,

    /// Override the server address.
    #[arg(short, long, value_name = "address", global = true)]
    port: Option<String>,

    /// Override the workspace to bind to.
    #[arg(short, long, value_name = "name", global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let overrides = self.load_overrides()?;
        let overrides = (!overrides.is_empty()).then_some(overrides);

        match self.command {
            Command::Info => run_info(overrides.as_ref()),
            Command::Root => run_root(overrides.as_ref()),
            Command::Where(opts) => run_where(overrides.as_ref(), opts),
            Command::Tracked(opts) => run_tracked(overrides.as_ref(), opts),
            Command::Pending(opts) => run_pending(overrides.as_ref(), opts),
            Command::Config => run_config(overrides.as_ref()),
        }
    }

    /// Layer CLI flag overrides over the configuration file, flags winning.
    fn load_overrides(&self) -> Result<ConnectionOverrides> {
        let mut overrides = match &self.config {
            Some(path) => {
                let path = shellexpand::full(path.as_str())
                    .context("failed to expand configuration file path")?
                    .into_owned();
                load_config_file(PathBuf::from(path).as_path(), true)?
            }
            None => load_config_file(default_config_file()?.as_path(), false)?,
        };

        let flags = ConnectionOverrides {
            user: self.user.clone(),
            port: self.port.clone(),
            workspace: self.workspace.clone(),
            ..Default::default()
        };
        overrides.merge(&flags);

        Ok(overrides)
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show what the server reports about itself.
    Info,

    /// Show the workspace root directory.
    Root,

    /// Map a path between its depot and local forms.
    #[command(override_usage = "depotlink where [options] <path>")]
    Where(WhereOptions),

    /// Check whether a file is tracked by the server.
    #[command(override_usage = "depotlink tracked [options] <path>")]
    Tracked(TrackedOptions),

    /// List the current user's pending changelists.
    Pending(PendingOptions),

    /// Show the settings the session is operating under.
    Config,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct WhereOptions {
    #[arg(value_name = "path")]
    pub path: String,

    /// Map depot to local instead of local to depot.
    #[arg(short, long)]
    pub local: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TrackedOptions {
    #[arg(value_name = "path")]
    pub path: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PendingOptions {
    /// Print the full records as TOML instead of a summary.
    #[arg(short, long)]
    pub toml: bool,
}

/// Configuration file layout.
#[derive(Default, Debug, Clone, Deserialize)]
struct ConfigLayout {
    #[serde(default)]
    connection: ConnectionOverrides,
}

/// TOML cannot serialize a bare list at the top level.
#[derive(Debug, Serialize)]
struct PendingList {
    changelist: Vec<Changelist>,
}

fn main() {
    let layer = fmt::layer().compact();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry().with(layer).with(filter).init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn load_config_file(path: &std::path::Path, required: bool) -> Result<ConnectionOverrides> {
    if !path.exists() {
        if required {
            anyhow::bail!("configuration file {} does not exist", path.display());
        }

        debug!("no configuration file at {:?}", path.display());
        return Ok(ConnectionOverrides::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {:?}", path.display()))?;
    let layout: ConfigLayout = toml::de::from_str(content.as_str())
        .with_context(|| format!("failed to parse {:?}", path.display()))?;

    Ok(layout.connection)
}

fn run_info(overrides: Option<&ConnectionOverrides>) -> Result<()> {
    let scope = acquire(None, overrides)?;
    let info = server_info(scope.handle())?;

    for field in ["userName", "clientName", "clientRoot", "serverAddress", "serverVersion"] {
        if let Some(value) = info.get(field) {
            println!("{field}: {value}");
        }
    }

    Ok(())
}

fn run_root(overrides: Option<&ConnectionOverrides>) -> Result<()> {
    let scope = acquire(None, overrides)?;
    let cache = PathCache::new();
    let root = cache.workspace_root(scope.handle())?;
    println!("{}", root.display());

    Ok(())
}

fn run_where(overrides: Option<&ConnectionOverrides>, opts: WhereOptions) -> Result<()> {
    let scope = acquire(None, overrides)?;
    let cache = PathCache::new();
    let direction = if opts.local {
        Direction::DepotToLocal
    } else {
        Direction::LocalToDepot
    };

    match cache.resolve(scope.handle(), opts.path.as_str(), direction)? {
        Some(mapped) => println!("{mapped}"),
        None => anyhow::bail!("no mapping found for {:?}", opts.path),
    }

    Ok(())
}

fn run_tracked(overrides: Option<&ConnectionOverrides>, opts: TrackedOptions) -> Result<()> {
    let scope = acquire(None, overrides)?;
    if is_tracked(scope.handle(), opts.path.as_str())? {
        println!("{} is tracked", opts.path);
        Ok(())
    } else {
        anyhow::bail!("{} is not tracked", opts.path)
    }
}

fn run_pending(overrides: Option<&ConnectionOverrides>, opts: PendingOptions) -> Result<()> {
    let scope = acquire(None, overrides)?;
    let pending = changes::pending_for_current_user(scope.handle())?;

    if opts.toml {
        let listing = PendingList { changelist: pending };
        print!("{}", toml::ser::to_string_pretty(&listing)?);
        return Ok(());
    }

    for changelist in &pending {
        let summary = changelist.description.lines().next().unwrap_or_default();
        println!("{}  {}  {}", changelist.change, changelist.user, summary);
    }

    Ok(())
}

fn run_config(overrides: Option<&ConnectionOverrides>) -> Result<()> {
    let scope = acquire(None, overrides)?;
    let config = current_configuration(scope.handle());
    print!("{}", toml::ser::to_string_pretty(&config)?);

    Ok(())
}

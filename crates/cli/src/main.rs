//! stowage CLI
//!
//! Command-line access to the stores declared in stores.toml.
//!
//! Usage:
//!   stowage [--config FILE] [--store NAME] <command> [args]
//!   stowage --help         Show help

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use stowage_vfs::{
    Filesystem, LocalAdapter, Options, Probe, StorageConfig, StoreManager, Visibility,
    VisibilityOutcome,
};
use tokio::io::AsyncWriteExt;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parsed command line
#[derive(Debug, Default, PartialEq, Eq)]
struct Invocation {
    config: Option<PathBuf>,
    store: Option<String>,
    command: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Parsed {
    Run(Invocation),
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Parsed> {
    let mut invocation = Invocation::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if !invocation.command.is_empty() {
            invocation.command.push(arg.clone());
            continue;
        }
        match arg.as_str() {
            "--config" | "-c" => {
                let value = iter.next().context("--config requires a file")?;
                invocation.config = Some(PathBuf::from(value));
            }
            "--store" | "-s" => {
                let value = iter.next().context("--store requires a name")?;
                invocation.store = Some(value.clone());
            }
            "--help" | "-h" | "help" => return Ok(Parsed::Help),
            "--version" | "-v" => return Ok(Parsed::Version),
            _ => invocation.command.push(arg.clone()),
        }
    }

    if invocation.command.is_empty() {
        return Ok(Parsed::Help);
    }
    Ok(Parsed::Run(invocation))
}

fn print_usage() {
    eprintln!();
    eprintln!("  \x1b[1;96mstowage\x1b[0m - Browse and edit storage stores");
    eprintln!();
    eprintln!("  \x1b[1mUSAGE:\x1b[0m");
    eprintln!("    stowage [--config FILE] [--store NAME] <command> [args]");
    eprintln!();
    eprintln!("  \x1b[1mCOMMANDS:\x1b[0m");
    eprintln!("    ls [dir] [-r]                List a directory as JSON");
    eprintln!("    cat <path>                   Write a file to stdout");
    eprintln!("    put <path>                   Store stdin at path");
    eprintln!("    stat <path>                  Show metadata as JSON");
    eprintln!("    rm <path>                    Delete a file");
    eprintln!("    mkdir <dir> [--private]      Create a directory");
    eprintln!("    rmdir <dir>                  Delete a directory tree");
    eprintln!("    mv <from> <to>               Rename a file or directory");
    eprintln!("    cp <from> <to>               Copy a file");
    eprintln!("    chmod <path> <public|private>");
    eprintln!();
    eprintln!("  \x1b[1mEXAMPLES:\x1b[0m");
    eprintln!("    stowage ls -r                # Current directory, recursively");
    eprintln!("    stowage -s uploads cat a.txt # File from a configured store");
    eprintln!();
}

/// Resolve the store to operate on
///
/// Without a configured or requested store, the current directory is used.
async fn open_store(invocation: &Invocation) -> Result<Arc<Filesystem>> {
    let config = match &invocation.config {
        Some(path) => StorageConfig::load_from_path(path)?,
        None => StorageConfig::load()?,
    };

    let manager = StoreManager::global();
    config.register_all(manager).await?;

    match invocation.store.as_ref().or(config.default.as_ref()) {
        Some(name) => Ok(manager.get_store(name).await?),
        None => {
            let cwd = std::env::current_dir().context("Could not determine current directory")?;
            Ok(manager
                .register_adapter("cwd", LocalAdapter::new(cwd))
                .await)
        }
    }
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("missing {what}"))
}

async fn run(fs: &Filesystem, command: &[String]) -> Result<()> {
    let (name, args) = command
        .split_first()
        .context("missing command")?;

    match name.as_str() {
        "ls" => {
            let recursive = args.iter().any(|a| a == "-r" || a == "--recursive");
            let dir = args
                .iter()
                .find(|a| !a.starts_with('-'))
                .map_or("", String::as_str);
            let entries = fs.list_dir(dir, recursive).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        "cat" => {
            let path = arg(args, 0, "path")?;
            let Probe::Found(mut stream) = fs.read_stream(path).await? else {
                bail!("not found: {path}");
            };
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut stream, &mut stdout).await?;
            stdout.flush().await?;
        }
        "put" => {
            let path = arg(args, 0, "path")?;
            let written = fs
                .write_stream(path, Box::new(tokio::io::stdin()), &Options::default())
                .await?;
            tracing::info!(path, bytes = written, "Stored");
        }
        "stat" => {
            let path = arg(args, 0, "path")?;
            let meta = fs.metadata(path).await?.require(path)?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        "rm" => fs.delete(arg(args, 0, "path")?).await?,
        "mkdir" => {
            let dir = arg(args, 0, "directory")?;
            let options = if args.iter().any(|a| a == "--private") {
                Options::with_visibility(Visibility::Private)
            } else {
                Options::default()
            };
            let outcome = fs.create_dir(dir, &options).await?;
            if !outcome.succeeded() {
                bail!("could not create {dir}: {outcome:?}");
            }
        }
        "rmdir" => fs.delete_dir(arg(args, 0, "directory")?).await?,
        "mv" => {
            fs.rename(arg(args, 0, "source")?, arg(args, 1, "destination")?)
                .await?;
        }
        "cp" => {
            fs.copy(arg(args, 0, "source")?, arg(args, 1, "destination")?)
                .await?;
        }
        "chmod" => {
            let path = arg(args, 0, "path")?;
            let visibility = match arg(args, 1, "visibility")? {
                "public" => Visibility::Public,
                "private" => Visibility::Private,
                other => bail!("unknown visibility: {other}"),
            };
            match fs.set_visibility(path, visibility).await? {
                VisibilityOutcome::Applied(_) => {}
                VisibilityOutcome::NotFound => bail!("not found: {path}"),
                VisibilityOutcome::PermissionDenied(kind) => {
                    bail!("could not change visibility of {path}: {kind}")
                }
            }
        }
        other => bail!("Unknown command: {other}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_args(&args)? {
        Parsed::Run(invocation) => invocation,
        Parsed::Help => {
            print_usage();
            return Ok(());
        }
        Parsed::Version => {
            println!("stowage {VERSION}");
            return Ok(());
        }
    };

    let fs = open_store(&invocation).await?;
    run(&fs, &invocation.command).await
}

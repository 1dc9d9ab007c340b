//! A small CLI for the Store-only, single-cabinet core: create, list,
//! extract, delete, and rename entries. Mirrors the shape of the tool a
//! maintainer reaches for when testing the library by hand, not a
//! general-purpose cabinet manager.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use cabstore::progress::CancelToken;
use cabstore::{Cabinet, CompressionType};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cabtool", about = "Inspects and builds Store-mode cabinets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lists the files in a cabinet.
    Ls {
        cab: PathBuf,
        #[arg(short, long)]
        long: bool,
    },
    /// Creates a new cabinet from a list of host files.
    Create {
        #[arg(short, long)]
        output: PathBuf,
        files: Vec<PathBuf>,
    },
    /// Extracts one file to a destination path.
    Extract { cab: PathBuf, rel_path: String, dest: PathBuf },
    /// Removes a file from a cabinet (rewrites it in place).
    Rm { cab: PathBuf, rel_path: String },
    /// Renames a file within a cabinet (rewrites it in place).
    Mv { cab: PathBuf, old_rel_path: String, new_rel_path: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Ls { cab, long } => ls(&cab, long),
        Command::Create { output, files } => create(&output, &files),
        Command::Extract { cab, rel_path, dest } => extract(&cab, &rel_path, &dest),
        Command::Rm { cab, rel_path } => rm(&cab, &rel_path),
        Command::Mv { cab, old_rel_path, new_rel_path } => mv(&cab, &old_rel_path, &new_rel_path),
    }
}

fn ls(path: &PathBuf, long: bool) -> Result<()> {
    let cabinet = Cabinet::open(path).with_context(|| format!("opening {}", path.display()))?;
    for (folder_index, folder) in cabinet.folders().enumerate() {
        for file in folder.files() {
            if !long {
                println!("{}", file.name());
                continue;
            }
            println!(
                "{}{}{}{}{}{} folder={:<3} {:>10} {} {}",
                if file.is_read_only() { 'R' } else { '-' },
                if file.is_hidden() { 'H' } else { '-' },
                if file.is_system() { 'S' } else { '-' },
                if file.is_archive() { 'A' } else { '-' },
                if file.is_exec() { 'E' } else { '-' },
                if file.is_name_utf() { 'U' } else { '-' },
                folder_index,
                file.uncompressed_size(),
                file.datetime().map(|dt| dt.to_string()).unwrap_or_else(|| "invalid datetime".to_string()),
                file.name(),
            );
        }
    }
    Ok(())
}

fn create(output: &PathBuf, files: &[PathBuf]) -> Result<()> {
    let mut cabinet = Cabinet::create(output);
    for path in files {
        let rel_path = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{}: not a usable file name", path.display()))?;
        cabinet.add_external_file(path, rel_path)?;
    }
    cabinet.save(CompressionType::None, |_, _| {}, &CancelToken::new())?;
    Ok(())
}

fn extract(cab: &PathBuf, rel_path: &str, dest: &PathBuf) -> Result<()> {
    let mut cabinet = Cabinet::open(cab).with_context(|| format!("opening {}", cab.display()))?;
    if !cabinet.extract_to_file(rel_path, dest, |_, _| {}, &CancelToken::new())? {
        bail!("{rel_path}: not found in {}", cab.display());
    }
    Ok(())
}

fn rm(cab: &PathBuf, rel_path: &str) -> Result<()> {
    let mut cabinet = Cabinet::open(cab).with_context(|| format!("opening {}", cab.display()))?;
    if !cabinet.delete_file(rel_path)? {
        bail!("{rel_path}: not found in {}", cab.display());
    }
    cabinet.save(CompressionType::None, |_, _| {}, &CancelToken::new())?;
    Ok(())
}

fn mv(cab: &PathBuf, old_rel_path: &str, new_rel_path: &str) -> Result<()> {
    let mut cabinet = Cabinet::open(cab).with_context(|| format!("opening {}", cab.display()))?;
    if !cabinet.move_file(old_rel_path, new_rel_path)? {
        bail!("{old_rel_path}: not found in {}", cab.display());
    }
    cabinet.save(CompressionType::None, |_, _| {}, &CancelToken::new())?;
    Ok(())
}

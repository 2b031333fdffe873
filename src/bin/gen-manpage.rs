//! Man page generator for spiscript
//!
//! Writes `spiscript.1` plus one `spiscript-<command>.1` per subcommand.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
#[allow(dead_code)]
mod cli;

fn render(cmd: clap::Command, name: &str, output_dir: &Path) -> std::io::Result<PathBuf> {
    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd).render(&mut buffer)?;

    let path = output_dir.join(format!("{}.1", name));
    fs::write(&path, buffer)?;
    Ok(path)
}

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));

    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    for sub in cmd.get_subcommands() {
        let name = format!("spiscript-{}", sub.get_name());
        let path = render(sub.clone(), &name, &output_dir)?;
        println!("Generated {}", path.display());
    }

    let main_page = render(cmd, "spiscript", &output_dir)?;
    println!("Man page generated at: {}", main_page.display());
    println!("\nTo view the man page:");
    println!("  man -l {}", main_page.display());

    Ok(())
}

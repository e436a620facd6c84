use clap::{Parser, Subcommand};
use std::io::{self, Read};
use std::path::PathBuf;

use crate::config;
use crate::decorator::{decorate_detached, DecoratedTree};

#[derive(Debug, Parser)]
#[command(name = "ide-tree")]
#[command(author, version, about = "Build file trees from path lists", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build the entry tree for a list of paths (one per line)
    Decorate {
        /// File to read paths from (defaults to stdin)
        input: Option<PathBuf>,

        /// Project identifier used in entry URLs
        #[arg(long)]
        project: String,

        /// Branch identifier used in entry URLs
        #[arg(long, default_value = "master")]
        branch: String,
    },

    /// Show the resolved configuration
    Config,
}

pub fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Decorate {
            input,
            project,
            branch,
        } => run_decorate(input, project, branch, cli.format),
        Commands::Config => {
            let config = config::load().map_err(|e| e.to_string())?;
            print_json(&config)
        }
    }
}

fn run_decorate(
    input: Option<PathBuf>,
    project: String,
    branch: String,
    format: OutputFormat,
) -> Result<(), String> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("Failed to read stdin: {e}"))?;
            buf
        }
    };
    let paths = parse_paths(&raw);
    log::debug!("[decorate] read {} paths", paths.len());

    let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
    let decorated = runtime
        .block_on(decorate_detached(paths, project, branch))
        .map_err(|e| e.to_string())?;

    match format {
        OutputFormat::Json => print_json(&decorated),
        OutputFormat::Text => {
            print!("{}", render_text(&decorated));
            Ok(())
        }
    }
}

fn parse_paths(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Indented listing in discovery order; directories end with `/`.
fn render_text(tree: &DecoratedTree) -> String {
    let mut out = String::new();
    let mut stack: Vec<&str> = tree.roots.iter().rev().map(String::as_str).collect();

    while let Some(path) = stack.pop() {
        let Some(entry) = tree.entries.get(path) else {
            continue;
        };
        out.push_str(&"  ".repeat(entry.level));
        out.push_str(&entry.name);
        if entry.kind.is_tree() {
            out.push('/');
        }
        out.push('\n');
        stack.extend(entry.children().iter().rev().map(String::as_str));
    }
    out
}

fn print_json(value: &impl serde::Serialize) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

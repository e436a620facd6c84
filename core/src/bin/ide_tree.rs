//! ide-tree binary - decorate path lists from the command line

use clap::Parser;
use ide_tree::cli::{run, Cli};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

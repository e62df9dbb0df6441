use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
pub struct Cli {
    /// Image file holding the filesystem
    pub image: PathBuf,

    /// Replay commands from this file instead of reading stdin
    #[arg(long, short)]
    pub script: Option<PathBuf>,
}

mod cli;
mod command;
mod error;
mod shell;

use std::io;

use clap::Parser;

pub use self::{cli::Cli, shell::Shell};

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut shell = Shell::open(cli.image, stdout.lock())?;
    if !shell.is_mounted() {
        println!("No image mounted, create one with `format <n>KB|MB`");
    }

    match cli.script {
        Some(script) => {
            shell.run_script(&script)?;
        }
        None => shell.run(io::stdin().lock())?,
    }
    Ok(())
}

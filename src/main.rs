mod launch;
mod pods;
mod trace;

use launch::RootCommand;

fn main() {
    let root: RootCommand = argh::from_env();

    if let Err(code) = root.run() {
        std::process::exit(code);
    }
}

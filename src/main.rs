//! Command-line entry point: run a folder of videos through an external transcoder.

mod cli;

fn main() {
    if let Err(err) = cli::run(std::env::args().skip(1).collect()) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

use std::process;

fn main() {
    if let Err(e) = runbook::cli::run() {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

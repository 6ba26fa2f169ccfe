use std::process;

mod logging;
mod runner;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let parsed = match runner::parse_args(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("argument error: {err}");
            process::exit(1);
        }
    };
    logging::setup_tracing(parsed.log_level);

    tracing::info!("pointbench starting");

    if let Err(err) = runner::run(&parsed) {
        tracing::error!("run failed: {err}");
        eprintln!("error: {err}");
        process::exit(1);
    }
}

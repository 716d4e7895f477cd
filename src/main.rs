use litf_relay::cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // System locale first; `--lang` can still override it in cli::run.
    litf_relay::init();

    match cli::run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

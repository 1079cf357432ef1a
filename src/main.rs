use resume_importer::{init_tracing, ProcessorConfig, Runner};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match ProcessorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "invalid configuration; refusing to start");
            return ExitCode::FAILURE;
        }
    };

    let mut runner = match Runner::new(config) {
        Ok(runner) => runner,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "failed to initialise processor");
            return ExitCode::FAILURE;
        }
    };

    match runner.run_until_signal().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "processor stopped with a fatal error");
            ExitCode::FAILURE
        }
    }
}

//! Kodegen Bundler Model - package trained ML models into container images.
//!
//! This binary packages a model artifact into a Docker image, falling back to
//! a portable archive when the image cannot be built.

use kodegen_bundler_model::cli;
use std::process;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init();

    // Run CLI and get exit code
    let exit_code = match cli::run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            for suggestion in e.recovery_suggestions() {
                eprintln!("  → {}", suggestion);
            }
            if e.is_cancelled() {
                cli::EXIT_CANCELLED
            } else {
                cli::EXIT_FAILURE
            }
        }
    };

    process::exit(exit_code);
}

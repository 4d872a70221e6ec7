use std::sync::Arc;

use clap::Parser;
use console::style;
use s3pull_core::format::{format_bytes, format_duration, format_speed};
use s3pull_core::supervisor::{self, RunOutcome};
use s3pull_core::transport::{S3Transport, Transport};
use s3pull_core::logging;
use tokio_util::sync::CancellationToken;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.into_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("s3pull error: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(e) = logging::init_logging(&config.download_dir, config.log_file_name.as_deref()) {
        eprintln!("s3pull: log file unavailable ({e}), using stderr");
        logging::init_logging_stderr();
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            signal_cancel.cancel();
        }
    });

    let transport: Arc<dyn Transport> = match S3Transport::connect(&config).await {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("s3pull error: {e:#}");
            std::process::exit(1);
        }
    };

    match supervisor::run(transport, &config, cancel).await {
        Ok(RunOutcome::Completed(summary)) => {
            println!();
            println!("{}", style("Download completed successfully!").green().bold());
            println!("File: {}", summary.final_path.display());
            println!("Size: {}", format_bytes(summary.size));
            println!("Time: {}", format_duration(summary.elapsed.as_secs()));
            println!("Average speed: {}", format_speed(summary.avg_speed));
            println!(
                "Attempts: {} total, max {} on one segment",
                summary.total_retries, summary.max_segment_retries
            );
        }
        Ok(RunOutcome::AlreadyComplete { final_path, size }) => {
            println!("File already downloaded.");
            println!("File: {}", final_path.display());
            println!("Size: {}", format_bytes(size));
        }
        Ok(RunOutcome::Cancelled) => {
            println!();
            println!("{}", style("Download cancelled; progress preserved.").yellow());
        }
        Err(e) => {
            eprintln!("s3pull error: {e:#}");
            std::process::exit(1);
        }
    }
}

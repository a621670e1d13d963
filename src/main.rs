use anyhow::Result;
use ulatency::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse cli and handle clap errors
    let options = cli::parse_from_args();

    ulatency::init_logger(Some(options.log_level()));

    match ulatency::daemon::ulatency_daemon_run(&options).await {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            cli::report_error(&e);
            std::process::exit(1);
        }
    }
}

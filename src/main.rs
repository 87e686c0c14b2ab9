mod backup;
mod cli;
mod error;
mod gateway;
mod notify;

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, EXIT_BACKUP, EXIT_FLAG_PARSE};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { EXIT_FLAG_PARSE } else { 0 };
            let _ = err.print();
            process::exit(code);
        }
    };

    let notify_url = args.notify_url.clone();
    let instance_id = args.instance_id.clone();
    let service = args.service_tag.clone();

    if let Err(err) = cli::run(args).await {
        eprintln!("{err:#}");
        if let Some(url) = notify_url {
            if let Err(notify_err) =
                notify::send_failure(&url, &format!("{err:#}"), instance_id.as_deref(), &service)
                    .await
            {
                eprintln!("failed to send notification: {notify_err:#}");
            }
        }
        process::exit(EXIT_BACKUP);
    }
}

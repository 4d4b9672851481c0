mod bootstrap;

use std::path::PathBuf;

use clap::builder::PossibleValuesParser;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "meshrelayd", about = "Store-and-forward repeater daemon")]
pub struct Args {
    /// Path to the YAML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level override.
    #[arg(long, value_parser = PossibleValuesParser::new(["DEBUG", "INFO", "WARNING", "ERROR"]))]
    pub log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("[meshrelayd] fatal: {err:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let ctx = bootstrap::bootstrap(args).await?;

    let (http_host, http_port) = {
        let config = ctx.config.lock().expect("config lock");
        (config.http.host.clone(), config.http.port)
    };
    let http_ctx = ctx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(err) = meshrelay_daemon::http::serve(http_ctx, &http_host, http_port).await {
            log::error!("HTTP server failed: {err:#}");
        }
    });

    log::info!("Repeater daemon started");
    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down...");

    ctx.cancel.cancel();
    // let the upstream publisher flush its offline status before teardown
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    ctx.collector.flush_series();
    let _ = http_task.await;
    log::info!("Repeater stopped");
    Ok(())
}

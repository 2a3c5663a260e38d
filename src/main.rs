use chrono::Local;
use clap::Parser;
use cmp_scrap::cli::{Cli, Command};
use cmp_scrap::process::prune_deceased;
use cmp_scrap::session::watch_interrupts;
use cmp_scrap::{info_time, Crawler, Result};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let start_time = Local::now();
    match cli.command {
        Command::Crawl(args) => {
            let crawler = Crawler::from_config(args.crawl_config()?)?;

            let stop = crawler.stop_signal();
            tokio::spawn(async move {
                if watch_interrupts(&stop, tokio::signal::ctrl_c).await {
                    error!("Interrupted twice, exiting without the final save");
                    std::process::exit(130);
                }
            });

            let summary = crawler.run().await?;
            if summary.interrupted {
                warn!(
                    "Run was interrupted. To resume, rerun with --start <index> of the last unfinished specialty."
                );
            }
            println!("{summary:#?}");
        }
        Command::Specialties(args) => {
            let crawler = Crawler::from_config(args.crawl_config()?)?;
            let specialties = crawler.specialties().await?;
            println!("Found {} specialties:", specialties.len());
            for (idx, spec) in specialties.iter().enumerate() {
                println!("{idx:3}. {} (ID: {})", spec.name, spec.id);
            }
        }
        Command::Prune(args) => {
            let report = prune_deceased(&args.store_config(1)).await?;
            println!("Kept {} doctors, removed {} deceased.", report.kept, report.removed);
        }
    }
    info_time!(start_time, "Full program time:");

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = if verbose > 0 { "cmp_scrap=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

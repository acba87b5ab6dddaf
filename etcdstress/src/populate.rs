//! The `populate` command: purge the prefix, then fill it with records.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use etcdstress_filler::FillerBuilder;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Populate;
use crate::etcd::EtcdClient;
use crate::purge::purge;
use crate::report::Summary;

const TICK: Duration = Duration::from_millis(100);

/// Writes `config.count` records to etcd and returns the number of usable records.
///
/// Existing data under the prefix is purged first unless disabled. The run fails if more writes
/// failed than the error tolerance allows.
pub async fn populate(client: EtcdClient, config: &Populate) -> Result<usize> {
    let mut filler = FillerBuilder::new()
        .workers(config.workers)
        .queue_depth(config.queue_depth)
        .prefix(&config.prefix)
        .build(client.clone())
        .context("invalid populate configuration")?;

    if config.purge {
        purge(&client, filler.prefix()).await?;
    }

    let bar = ProgressBar::new(config.count as u64)
        .with_message("Populating etcd...")
        .with_style(ProgressStyle::with_template(
            "{msg}\n{wide_bar} {pos}/{len} ({per_sec}, {eta})",
        )?);

    let ticker = tokio::spawn({
        let bar = bar.clone();
        let progress = filler.progress();
        async move {
            loop {
                bar.set_position(progress.completed() as u64);
                tokio::time::sleep(TICK).await;
            }
        }
    });

    let start = Instant::now();
    let result = filler.generate(config.count).await;
    let elapsed = start.elapsed();

    ticker.abort();
    bar.finish_and_clear();

    let progress = filler.progress();
    let summary = Summary {
        requested: config.count,
        written: *result.as_ref().unwrap_or(&0),
        failed: progress.failed(),
        workers: filler.workers(),
        elapsed,
    };
    println!();
    println!("{summary}");

    filler.shutdown().await;

    let written = result.context("population run failed")?;
    tracing::info!("requested {} entries, received {written}", config.count);

    Ok(written)
}

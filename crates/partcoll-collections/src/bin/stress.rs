use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Parser;
use partcoll_collections::{
    new_cancel_pair, CancelHandle, CancelReason, CancelToken, CollectionConfig, CollectionError,
    Collections,
};
use partcoll_kv::MemoryCluster;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Hammers one distributed queue from several in-process members and checks
/// that every item comes out exactly once.
#[derive(Parser, Debug)]
#[command(name = "partcoll-stress", version)]
struct Args {
    /// Cluster members to spread producers and consumers over
    #[arg(long, default_value_t = 3)]
    members: usize,

    /// Concurrent producers
    #[arg(long, default_value_t = 4)]
    producers: u32,

    /// Concurrent consumers
    #[arg(long, default_value_t = 4)]
    consumers: usize,

    /// Items each producer enqueues
    #[arg(long, default_value_t = 1000)]
    items: u32,

    /// Logical queue name
    #[arg(long, default_value = "stress")]
    queue: String,

    /// Optional .toml or .json collection config
    #[arg(long, env = "PARTCOLL_CONFIG")]
    config: Option<PathBuf>,
}

type Item = (u32, u32);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.members == 0 || args.consumers == 0 {
        bail!("need at least one member and one consumer");
    }
    let config = match &args.config {
        Some(path) => CollectionConfig::from_file(path)?,
        None => CollectionConfig::default(),
    };

    let cluster = MemoryCluster::new();
    let members: Vec<Collections> = (0..args.members)
        .map(|_| Collections::with_config(Arc::new(cluster.join()), config.clone()))
        .collect();
    let total = args.producers as usize * args.items as usize;

    tracing::info!(
        members = args.members,
        producers = args.producers,
        consumers = args.consumers,
        total,
        "starting stress run"
    );
    let started = Instant::now();

    // a consumer failure cancels the whole run; draining everything only stops consumers
    let (token, abort) = new_cancel_pair();
    let (drained, done) = token.child();
    let consumed = Arc::new(AtomicUsize::new(0));

    let mut consumer_tasks = Vec::new();
    for c in 0..args.consumers {
        let queue = members[c % members.len()].queue::<Item>(&args.queue);
        let token = drained.clone();
        let done = done.clone();
        let abort = abort.clone();
        let consumed = consumed.clone();
        consumer_tasks.push(tokio::spawn(async move {
            consume(queue, token, done, abort, consumed, total).await
        }));
    }
    if total == 0 {
        done.cancel(CancelReason::Shutdown);
    }

    let mut producer_tasks = Vec::new();
    for p in 0..args.producers {
        let queue = members[p as usize % members.len()].queue::<Item>(&args.queue);
        let token = token.clone();
        let items = args.items;
        producer_tasks.push(tokio::spawn(async move {
            for seq in 0..items {
                queue.put((p, seq), &token).await?;
            }
            Ok::<_, CollectionError>(())
        }));
    }

    for task in producer_tasks {
        task.await??;
    }
    let mut seen = Vec::with_capacity(total);
    for task in consumer_tasks {
        seen.extend(task.await??);
    }
    let elapsed = started.elapsed();

    let mut unique = HashSet::new();
    let duplicates = seen.iter().filter(|item| !unique.insert(**item)).count();
    let queue = members[0].queue::<Item>(&args.queue);
    let report = queue.check_integrity().await?;
    for finding in &report.findings {
        tracing::warn!("{}", finding);
    }

    println!(
        "consumed {} of {} items in {:.2?} ({} duplicates, {} nodes left, integrity {})",
        seen.len(),
        total,
        elapsed,
        duplicates,
        report.stored,
        if report.findings.is_empty() { "clean" } else { "DIRTY" }
    );

    if seen.len() != total || unique.len() != total {
        bail!("lost or duplicated items");
    }
    if !report.findings.is_empty() || report.stored != 0 {
        bail!("queue left inconsistent");
    }
    Ok(())
}

/// Takes items until all `total` have been consumed cluster-wide.
///
/// Per-producer sequence numbers must arrive in increasing order at any single
/// consumer.
async fn consume(
    queue: partcoll_collections::LinkedQueue<Item>,
    token: CancelToken,
    done: CancelHandle,
    abort: CancelHandle,
    consumed: Arc<AtomicUsize>,
    total: usize,
) -> Result<Vec<Item>> {
    let mut got = Vec::new();
    let mut last_seq = std::collections::HashMap::new();
    loop {
        match queue.take(&token).await {
            Ok((producer, seq)) => {
                if let Some(prev) = last_seq.insert(producer, seq) {
                    if prev >= seq {
                        abort.cancel(CancelReason::Shutdown);
                        bail!("producer {} out of order: {} after {}", producer, seq, prev);
                    }
                }
                got.push((producer, seq));
                if consumed.fetch_add(1, Ordering::SeqCst) + 1 >= total {
                    done.cancel(CancelReason::Shutdown);
                }
            }
            Err(CollectionError::Cancelled(_)) => return Ok(got),
            Err(e) => {
                abort.cancel(CancelReason::Shutdown);
                return Err(e.into());
            }
        }
    }
}

use std::sync::Arc;

use anyhow::anyhow;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::{
    connection::Connector, context::RunContext, monitor::Monitor, record::Record, request::RequestTemplate,
    stats::Stats, worker::Worker,
};

/// The worker pool plus the dispatcher feeding it.
pub struct Benchmark {
    ctx: Arc<RunContext>,
    connector: Connector,
    template: RequestTemplate,
    collector: flume::Sender<Record>,
}

impl Benchmark {
    /// Returns the benchmark and the receiving end of its collector. The collector holds
    /// one slot per configured request so workers never wait on a slow monitor.
    pub fn new(
        ctx: Arc<RunContext>,
        connector: Connector,
        template: RequestTemplate,
    ) -> (Self, flume::Receiver<Record>) {
        let (collector, records) = flume::bounded(ctx.config().requests);
        (
            Benchmark {
                ctx,
                connector,
                template,
                collector,
            },
            records,
        )
    }

    pub async fn run(self) {
        let Benchmark {
            ctx,
            connector,
            template,
            collector,
        } = self;
        let config = ctx.config();

        let (jobs, queue) = flume::bounded(config.concurrency * config.threads);

        let workers: Vec<_> = (0..config.concurrency)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    ctx.clone(),
                    connector.clone(),
                    queue.clone(),
                    collector.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();
        // the workers hold the only remaining handles
        drop(queue);
        drop(collector);

        let mut dispatched = 0usize;
        while dispatched < config.requests {
            tokio::select! {
                biased;
                _ = ctx.stop().stopped() => break,
                sent = jobs.send_async(template.job()) => {
                    if sent.is_err() {
                        break;
                    }
                    dispatched += 1;
                }
            }
        }
        drop(jobs);
        debug!(dispatched, "dispatcher finished");

        ctx.stop().stopped().await;

        for joined in join_all(workers).await {
            if let Err(e) = joined {
                warn!(error = %e, "worker task failed");
            }
        }
    }
}

/// Runs one benchmark to completion and returns its final statistics.
pub async fn start(
    ctx: Arc<RunContext>,
    connector: Connector,
    template: RequestTemplate,
    interrupt: flume::Receiver<()>,
) -> Result<Stats, anyhow::Error> {
    let (benchmark, records) = Benchmark::new(ctx.clone(), connector, template);
    let (monitor, output) = Monitor::new(ctx, records, interrupt);

    tokio::spawn(monitor.run());
    let pool = tokio::spawn(benchmark.run());

    let stats = output
        .await
        .map_err(|_| anyhow!("monitor exited without reporting"))?;

    if let Err(e) = pool.await {
        warn!(error = %e, "benchmark task failed");
    }
    Ok(stats)
}

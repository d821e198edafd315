use std::sync::Arc;

use tokio::{
    sync::oneshot,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    context::RunContext,
    record::Record,
    stats::{Stats, StopReason},
};

/// Single consumer of the collector. Decides when the run is over and owns the stop broadcast.
pub struct Monitor {
    ctx: Arc<RunContext>,
    collector: flume::Receiver<Record>,
    interrupt: flume::Receiver<()>,
    output: oneshot::Sender<Stats>,
}

impl Monitor {
    pub fn new(
        ctx: Arc<RunContext>,
        collector: flume::Receiver<Record>,
        interrupt: flume::Receiver<()>,
    ) -> (Self, oneshot::Receiver<Stats>) {
        let (output, stats) = oneshot::channel();
        (
            Monitor {
                ctx,
                collector,
                interrupt,
                output,
            },
            stats,
        )
    }

    pub async fn run(self) {
        let Monitor {
            ctx,
            collector,
            interrupt,
            output,
        } = self;
        let config = ctx.config();
        let mut stats = Stats::with_capacity(config.requests);

        // waiting for every worker to ramp up
        let ramped = tokio::select! {
            _ = ctx.start().wait() => true,
            Ok(()) = interrupt.recv_async() => false,
        };

        println!("Benchmarking {} (be patient)", config.host);
        let started = Instant::now();
        let deadline = config.time_limit.map(|limit| started + limit);
        let progress_step = config.requests / 10;

        let reason = if !ramped {
            StopReason::Interrupted
        } else {
            loop {
                tokio::select! {
                    received = collector.recv_async() => {
                        let record = match received {
                            Ok(record) => record,
                            Err(_) => break StopReason::Exhausted,
                        };
                        stats.update(&record);

                        if record.is_failure() && !config.continue_on_error {
                            break StopReason::Failure;
                        }

                        if stats.total_requests >= 10
                            && progress_step > 0
                            && stats.total_requests % progress_step == 0
                        {
                            println!("Completed {} requests", stats.total_requests);
                        }

                        if stats.total_requests >= config.requests {
                            println!("Finished {} requests", stats.total_requests);
                            break StopReason::Completed;
                        }
                    }
                    _ = expire(deadline) => break StopReason::TimeLimit,
                    Ok(()) = interrupt.recv_async() => break StopReason::Interrupted,
                }
            }
        };

        stats.total_execution_time = started.elapsed();
        stats.stop_reason = Some(reason);

        // shut down the dispatcher and every worker
        if ctx.stop().stop() {
            debug!(%reason, "stop broadcast");
        }
        info!(
            requests = stats.total_requests,
            failed = stats.total_failed,
            elapsed_ms = stats.total_execution_time.as_millis() as u64,
            "benchmark finished: {}",
            reason
        );

        if output.send(stats).is_err() {
            warn!("final stats were dropped, nobody is waiting for them");
        }
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::{StatusCode, Uri};

    use super::*;
    use crate::{
        config::Config,
        record::{Failure, Record},
    };

    fn context(requests: usize, configure: impl FnOnce(&mut Config)) -> Arc<RunContext> {
        let mut config = Config::new(Uri::from_static("http://localhost/")).unwrap();
        config.requests = requests;
        config.concurrency = 1;
        configure(&mut config);
        let ctx = Arc::new(RunContext::new(config));
        ctx.start().arrive();
        ctx
    }

    fn ok(ms: u64, bytes: u64) -> Record {
        Record::success(Duration::from_millis(ms), bytes)
    }

    async fn finish(
        ctx: &Arc<RunContext>,
        collector: flume::Receiver<Record>,
        interrupt: flume::Receiver<()>,
    ) -> Stats {
        let (monitor, output) = Monitor::new(ctx.clone(), collector, interrupt);
        tokio::spawn(monitor.run());
        tokio::time::timeout(Duration::from_secs(5), output)
            .await
            .expect("monitor should finish")
            .expect("monitor should deliver stats")
    }

    #[tokio::test]
    async fn aggregates_successful_records() {
        let ctx = context(2, |_| {});
        let (tx, rx) = flume::bounded(2);
        let (_interrupt_tx, interrupt) = flume::bounded(1);
        tx.send(ok(10, 10)).unwrap();
        tx.send(ok(20, 20)).unwrap();

        let stats = finish(&ctx, rx, interrupt).await;

        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(
            stats.latencies,
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
        assert_eq!(stats.total_received, 30);
        assert_eq!(stats.stop_reason, Some(StopReason::Completed));
        assert!(ctx.stop().is_stopped());
    }

    #[tokio::test]
    async fn first_failure_stops_the_run() {
        let ctx = context(5, |_| {});
        let (tx, rx) = flume::bounded(5);
        let (_interrupt_tx, interrupt) = flume::bounded(1);
        tx.send(ok(1, 1)).unwrap();
        tx.send(Record::failed(Failure::Response(StatusCode::INTERNAL_SERVER_ERROR)))
            .unwrap();
        tx.send(ok(1, 1)).unwrap();

        let stats = finish(&ctx, rx, interrupt).await;

        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.failures.response, 1);
        assert_eq!(stats.stop_reason, Some(StopReason::Failure));
        assert!(ctx.stop().is_stopped());
    }

    #[tokio::test]
    async fn continue_on_error_counts_every_failure() {
        let ctx = context(4, |c| c.continue_on_error = true);
        let (tx, rx) = flume::bounded(4);
        let (_interrupt_tx, interrupt) = flume::bounded(1);
        tx.send(Record::failed(Failure::Connect("refused".into()))).unwrap();
        tx.send(Record::failed(Failure::Timeout(Duration::from_millis(1))))
            .unwrap();
        tx.send(Record::failed(Failure::Length {
            expected: 5,
            received: 3,
        }))
        .unwrap();
        tx.send(ok(3, 5)).unwrap();

        let stats = finish(&ctx, rx, interrupt).await;

        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.total_failed, 3);
        assert_eq!(stats.failures.connect, 1);
        assert_eq!(stats.failures.timeout, 1);
        assert_eq!(stats.failures.length, 1);
        assert_eq!(stats.latencies.len(), 1);
        assert_eq!(stats.stop_reason, Some(StopReason::Completed));
    }

    #[tokio::test]
    async fn time_limit_stops_an_idle_run() {
        let ctx = context(10, |c| c.time_limit = Some(Duration::from_millis(50)));
        let (_tx, rx) = flume::bounded::<Record>(10);
        let (_interrupt_tx, interrupt) = flume::bounded(1);

        let stats = finish(&ctx, rx, interrupt).await;

        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.stop_reason, Some(StopReason::TimeLimit));
        assert!(stats.total_execution_time >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn interrupt_stops_the_run() {
        let ctx = context(10, |_| {});
        let (tx, rx) = flume::bounded(10);
        let (interrupt_tx, interrupt) = flume::bounded(1);
        tx.send(ok(1, 1)).unwrap();

        let (monitor, output) = Monitor::new(ctx.clone(), rx, interrupt);
        tokio::spawn(monitor.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        interrupt_tx.send(()).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(5), output)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.stop_reason, Some(StopReason::Interrupted));
    }

    #[tokio::test]
    async fn closed_collector_ends_the_run() {
        let ctx = context(10, |_| {});
        let (tx, rx) = flume::bounded(10);
        let (_interrupt_tx, interrupt) = flume::bounded(1);
        tx.send(ok(1, 1)).unwrap();
        drop(tx);

        let stats = finish(&ctx, rx, interrupt).await;
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.stop_reason, Some(StopReason::Exhausted));
    }

    #[tokio::test]
    async fn stop_already_fired_elsewhere_still_yields_one_result() {
        let ctx = context(1, |_| {});
        assert!(ctx.stop().stop());
        let (tx, rx) = flume::bounded(1);
        let (_interrupt_tx, interrupt) = flume::bounded(1);
        tx.send(ok(1, 1)).unwrap();

        let stats = finish(&ctx, rx, interrupt).await;
        assert_eq!(stats.total_requests, 1);
        assert!(!ctx.stop().stop());
    }
}

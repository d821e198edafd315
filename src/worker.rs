//! Workers pull jobs off the queue and turn each one into exactly one [`Record`].
//!
//! A job runs on its own detached task. The worker races that task against the
//! per-request timer and the stop broadcast, and never joins a task it gave up on:
//! it aborts it and moves on. Abort takes effect at the task's next yield point, so
//! a worker has at most one such orphan winding down at any time. The orphan owns
//! the connection it was using, which is why the worker opens a fresh one next.

use std::{error::Error as _, io, sync::Arc, time::Duration};

use http::{header::CONTENT_LENGTH, Method};
use hyper::body::HttpBody;
use tokio::{task::JoinError, time::Instant};
use tracing::{debug, trace};

use crate::{
    body::BodyCounter,
    connection::{Connection, Connector},
    context::RunContext,
    record::{Failure, Record},
    request::Job,
};

/// What an execution task needs to know about the run.
#[derive(Clone)]
struct Target {
    connector: Connector,
    budget: Duration,
    expected_size: Option<u64>,
    check_length: bool,
    keep_alive: bool,
    decode_gzip: bool,
}

/// Result of one execution task: its record and, if still reusable, its connection.
struct Outcome {
    record: Record,
    conn: Option<Connection>,
}

impl Outcome {
    fn failed(failure: Failure) -> Self {
        Outcome {
            record: Record::failed(failure),
            conn: None,
        }
    }
}

pub struct Worker {
    id: usize,
    ctx: Arc<RunContext>,
    connector: Connector,
    jobs: flume::Receiver<Job>,
    collector: flume::Sender<Record>,
}

impl Worker {
    pub fn new(
        id: usize,
        ctx: Arc<RunContext>,
        connector: Connector,
        jobs: flume::Receiver<Job>,
        collector: flume::Sender<Record>,
    ) -> Self {
        Worker {
            id,
            ctx,
            connector,
            jobs,
            collector,
        }
    }

    pub async fn run(self) {
        self.ctx.start().arrive_and_wait().await;

        let config = self.ctx.config();
        let target = Target {
            connector: self.connector.clone(),
            budget: config.execution_timeout,
            expected_size: self.ctx.content_size(),
            check_length: config.method != Method::HEAD,
            keep_alive: config.keep_alive,
            decode_gzip: config.gzip,
        };

        let timer = tokio::time::sleep(target.budget);
        tokio::pin!(timer);
        let mut conn: Option<Connection> = None;
        let mut executed = 0usize;

        loop {
            let job = tokio::select! {
                biased;
                _ = self.ctx.stop().stopped() => break,
                job = self.jobs.recv_async() => match job {
                    Ok(job) => job,
                    Err(_) => break,
                },
            };

            timer.as_mut().reset(Instant::now() + target.budget);
            let mut task = tokio::spawn(execute(job, conn.take(), target.clone()));

            let record = tokio::select! {
                biased;
                joined = &mut task => {
                    let outcome = settle(joined);
                    conn = outcome.conn;
                    outcome.record
                }
                _ = &mut timer => {
                    task.abort();
                    Record::failed(Failure::Timeout(target.budget))
                }
                _ = self.ctx.stop().stopped() => {
                    task.abort();
                    trace!(worker = self.id, "abandoning in-flight request");
                    break;
                }
            };

            executed += 1;
            if let Some(failure) = &record.error {
                debug!(worker = self.id, error = %failure, "request failed");
            }
            if self.collector.send_async(record).await.is_err() {
                break;
            }
        }

        trace!(worker = self.id, executed, "worker exiting");
    }
}

async fn execute(job: Job, conn: Option<Connection>, target: Target) -> Outcome {
    let start = Instant::now();

    let mut conn = match reuse(conn).await {
        Some(conn) => conn,
        None => match target.connector.open(target.budget).await {
            Ok(conn) => conn,
            Err(e) => return Outcome::failed(Failure::Connect(e.to_string())),
        },
    };

    let response = match conn.send(job).await {
        Ok(response) => response,
        Err(e) => return Outcome::failed(Failure::Connect(e.to_string())),
    };

    let status = response.status();
    if !status.is_success() {
        return Outcome::failed(Failure::Response(status));
    }

    let declared = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut counter = BodyCounter::new(response.headers(), target.decode_gzip);
    let mut body = response.into_body();
    let mut wire = 0u64;
    while let Some(chunk) = body.data().await {
        match chunk {
            // dropped right away, nothing of the body is kept
            Ok(chunk) => {
                wire += chunk.len() as u64;
                if let Err(e) = counter.feed(&chunk) {
                    return Outcome::failed(Failure::Receive(e.to_string()));
                }
            }
            Err(e) if is_truncated(&e) => {
                return Outcome::failed(Failure::Length {
                    expected: declared.or(target.expected_size).unwrap_or(wire),
                    received: wire,
                })
            }
            Err(e) => return Outcome::failed(Failure::Receive(e.to_string())),
        }
    }
    let received = match counter.finish() {
        Ok(received) => received,
        Err(e) => return Outcome::failed(Failure::Receive(e.to_string())),
    };
    let latency = start.elapsed();

    if target.check_length {
        if let Some(expected) = target.expected_size {
            if received != expected {
                return Outcome::failed(Failure::Length { expected, received });
            }
        }
    }

    Outcome {
        record: Record::success(latency, received),
        conn: target.keep_alive.then_some(conn),
    }
}

/// A task that died instead of returning, i.e. panicked, still accounts for its job.
fn settle(joined: Result<Outcome, JoinError>) -> Outcome {
    joined.unwrap_or_else(|e| Outcome::failed(Failure::Exception(e.to_string())))
}

/// Hands back a kept-alive connection if the server has not closed it meanwhile.
async fn reuse(conn: Option<Connection>) -> Option<Connection> {
    let mut conn = conn?;
    match conn.ready().await {
        Ok(()) => Some(conn),
        Err(e) => {
            trace!(error = %e, "kept-alive connection is gone, reconnecting");
            None
        }
    }
}

/// The body ended before the length the server declared.
fn is_truncated(e: &hyper::Error) -> bool {
    if e.is_incomplete_message() {
        return true;
    }
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            return io.kind() == io::ErrorKind::UnexpectedEof;
        }
        source = err.source();
    }
    false
}

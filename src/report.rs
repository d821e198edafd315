use std::fmt;

use crate::{
    context::RunContext,
    stats::{Stats, StopReason},
};

pub fn banner() -> String {
    format!(
        "This is {}, Version {}\nLicensed under the MIT license\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

/// The plaintext summary printed after a run.
pub struct Report<'a> {
    ctx: &'a RunContext,
    stats: &'a Stats,
}

impl<'a> Report<'a> {
    pub fn new(ctx: &'a RunContext, stats: &'a Stats) -> Self {
        Report { ctx, stats }
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.ctx.config();
        let stats = self.stats;
        let host = self.ctx.host_info();

        writeln!(f)?;
        writeln!(f, "Server Software:        {}", host.server.unwrap_or_default())?;
        writeln!(f, "Server Hostname:        {}", config.host)?;
        writeln!(f, "Server Port:            {}", config.port)?;
        writeln!(f)?;
        writeln!(f, "Document Path:          {}", config.request_target())?;
        writeln!(
            f,
            "Document Length:        {} bytes",
            host.content_size.unwrap_or(0)
        )?;
        writeln!(f)?;
        writeln!(f, "Concurrency Level:      {}", config.concurrency)?;
        writeln!(
            f,
            "Time taken for tests:   {:.2} seconds",
            stats.total_execution_time.as_secs_f64()
        )?;
        writeln!(f, "Complete requests:      {}", stats.total_requests)?;
        writeln!(f, "Failed requests:        {}", stats.total_failed)?;
        if stats.total_failed > 0 {
            let failures = &stats.failures;
            writeln!(
                f,
                "   (Connect: {}, Receive: {}, Length: {}, Timeout: {}, Exceptions: {})",
                failures.connect,
                failures.receive,
                failures.length,
                failures.timeout,
                failures.exception
            )?;
        }
        if stats.failures.response > 0 {
            writeln!(f, "Non-2xx responses:      {}", stats.failures.response)?;
        }
        writeln!(f, "HTML transferred:       {} bytes", stats.total_received)?;

        if let Some(summary) = stats.summary(config.concurrency) {
            writeln!(
                f,
                "Requests per second:    {:.2} [#/sec] (mean)",
                summary.requests_per_second
            )?;
            writeln!(
                f,
                "Time per request:       {:.3} [ms] (mean)",
                summary.time_per_request_ms
            )?;
            writeln!(
                f,
                "Time per request:       {:.3} [ms] (mean, across all concurrent requests)",
                summary.time_per_request_across_ms
            )?;
            writeln!(
                f,
                "HTML Transfer rate:     {:.2} [Kbytes/sec] received",
                summary.transfer_rate_kbps
            )?;
            writeln!(f)?;

            writeln!(f, "Connection Times (ms)")?;
            writeln!(f, "              min\tmean[+/-sd]\tmedian\tmax")?;
            writeln!(
                f,
                "Total:        {}     \t{}   {:.2} \t{} \t{}",
                summary.min.as_millis(),
                summary.mean.as_millis(),
                summary.std_dev_ms,
                summary.median.as_millis(),
                summary.max.as_millis()
            )?;
            writeln!(f)?;

            writeln!(
                f,
                "Percentage of the requests served within a certain time (ms)"
            )?;
            for (percentage, latency) in &summary.percentiles {
                writeln!(f, " {}%\t {}", percentage, latency.as_millis())?;
            }
            writeln!(f, " 100%\t {} (longest request)", summary.max.as_millis())?;
        }

        match stats.stop_reason {
            Some(StopReason::Completed) | None => Ok(()),
            Some(reason) => {
                writeln!(f)?;
                writeln!(f, "Stopped early: {}", reason)
            }
        }
    }
}

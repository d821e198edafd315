use std::{process::exit, sync::Arc, thread};

use anyhow::Context;
use clap::Parser;
use signal_hook::{consts::SIGINT, iterator::Signals, low_level};
use tracing_subscriber::EnvFilter;

use hbench::{
    benchmark,
    cli::Args,
    config::Config,
    connection::raise_nofile_limit,
    context::RunContext,
    probe::detect_host,
    report::{banner, Report},
    request::RequestTemplate,
};

fn main() {
    let config = match Config::from_args(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            exit(2)
        }
    };

    init_tracing(config.verbosity);

    if let Err(e) = run(config) {
        eprintln!("{:#}", e);
        exit(1)
    }
}

fn run(config: Config) -> Result<(), anyhow::Error> {
    raise_nofile_limit(config.concurrency);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(config.threads)
        .thread_name("hbench")
        .build()
        .context("failed to build the runtime")?;

    let ctx = Arc::new(RunContext::new(config));
    let template = RequestTemplate::new(ctx.config())?;

    // SIGINT keeps its default action until the probe is done
    let connector = runtime
        .block_on(detect_host(&ctx, &template))
        .context("host probe failed")?;
    let interrupt = watch_interrupts()?;

    println!("{}", banner());
    let stats = runtime.block_on(benchmark::start(ctx.clone(), connector, template, interrupt))?;
    println!("{}", Report::new(&ctx, &stats));

    Ok(())
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,hbench={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// The first SIGINT ends the run and still prints the report, the second exits right away.
fn watch_interrupts() -> Result<flume::Receiver<()>, anyhow::Error> {
    let (interrupted, interrupt) = flume::bounded(1);
    let mut signals = Signals::new(&[SIGINT])?;

    thread::Builder::new()
        .name("hbench-signals".to_string())
        .spawn(move || {
            for (seen, _) in signals.forever().enumerate() {
                if seen == 0 {
                    let _ = interrupted.try_send(());
                } else {
                    low_level::exit(1)
                }
            }
        })?;

    Ok(interrupt)
}

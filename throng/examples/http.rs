//! Drive a live `/compute` endpoint and stream events as JSON lines.
//!
//! ```text
//! cargo run --example http -- --base-url http://localhost:8080 --metrics-url http://localhost:8080/metrics
//! ```
//!
//! While running, type commands on stdin:
//! `users <n>`, `work <ms>`, `quit`.
use std::time::Duration;

use clap::Parser;
use throng::{
    Engine, SignalSource, Workload,
    issuer::HttpIssuer,
    report::{StdoutReporter, forward},
    signal::{HttpSignalSource, MetricsFormat, NoSignal},
    user::ThinkTime,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Virtual-user load against a compute endpoint")]
struct Args {
    /// Base URL of the service under test
    #[arg(long, default_value = "http://localhost:8080")]
    base_url: String,
    /// Metrics endpoint polled for the external signal
    #[arg(long)]
    metrics_url: Option<String>,
    /// Treat the metrics endpoint as a kubelet summary and count pods matching this name
    #[arg(long)]
    pod_filter: Option<String>,
    /// Initial number of virtual users
    #[arg(long, default_value_t = 0)]
    users: usize,
    /// Initial simulated work per request, in milliseconds
    #[arg(long, default_value_t = 10)]
    work_ms: u64,
    /// Shortest think time, in milliseconds
    #[arg(long, default_value_t = 200)]
    think_min_ms: u64,
    /// Longest think time, in milliseconds
    #[arg(long, default_value_t = 500)]
    think_max_ms: u64,
    /// Keep only samples from the last N seconds
    #[arg(long, default_value_t = 900)]
    window_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    match args.metrics_url.clone() {
        Some(url) => {
            let format = match args.pod_filter.clone() {
                Some(pod_filter) => MetricsFormat::KubeletSummary { pod_filter },
                None => MetricsFormat::CpuPct,
            };
            let signal = HttpSignalSource::builder().url(url).format(format).build();
            run(args, signal).await
        }
        None => run(args, NoSignal).await,
    }
}

async fn run<S: SignalSource>(args: Args, signal: S) -> Result<(), Box<dyn std::error::Error>> {
    // NEVER instantiate heavy things like clients inside the issuer call
    let issuer = HttpIssuer::builder().base_url(args.base_url).build();

    let (engine, events) = Engine::builder()
        .think_time(ThinkTime::new(
            Duration::from_millis(args.think_min_ms),
            Duration::from_millis(args.think_max_ms),
        ))
        .buffer_window(Duration::from_secs(args.window_secs))
        .initial_target(args.users)
        .initial_workload(Workload::from_millis(args.work_ms)?)
        .build()
        .start(issuer, signal);
    let reporter = tokio::spawn(forward(events, StdoutReporter));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        let result = match (parts.next(), parts.next().map(str::parse::<u64>)) {
            (Some("users"), Some(Ok(n))) => engine.control().set_target(n as usize),
            (Some("work"), Some(Ok(ms))) => {
                Workload::from_millis(ms).and_then(|w| engine.control().set_workload(w))
            }
            (Some("quit"), _) => break,
            _ => {
                eprintln!("commands: users <n> | work <ms> | quit");
                Ok(())
            }
        };
        if let Err(e) = result {
            eprintln!("rejected: {e}");
        }
    }

    let summary = engine.shutdown().await?;
    reporter.await?;
    eprintln!("{summary:#?}");
    Ok(())
}

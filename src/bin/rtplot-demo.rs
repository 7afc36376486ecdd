//! Producer demo: spawns a consumer, streams a waveform and issues RPCs

use anyhow::Context;
use clap::Parser;
use rtplot_rs::{
    config::AppConfig,
    event_loop::EventLoop,
    manager::{CommandSpawner, ConnectionManager},
    protocol::Dtype,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "rtplot-demo", about = "Stream a sine wave to a spawned rtplot-rs consumer")]
struct DemoArgs {
    /// Total samples to send
    #[arg(long, default_value_t = 5000)]
    points: usize,

    /// Samples per message
    #[arg(long, default_value_t = 250)]
    batch: usize,

    /// Consumer window size
    #[arg(long)]
    capacity: Option<usize>,

    #[arg(long)]
    dtype: Option<Dtype>,

    /// Consumer executable
    #[arg(long)]
    consumer: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rtplot_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = DemoArgs::parse();
    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(capacity) = args.capacity {
        config.stream.capacity = capacity;
    }
    if let Some(dtype) = args.dtype {
        config.stream.dtype = dtype;
    }
    if let Some(program) = args.consumer {
        config.manager.consumer_program = Some(program);
    }
    config.validate()?;

    let spawner = CommandSpawner::from_config(&config.manager)?;
    let mut manager = ConnectionManager::bind(config.clone())?;
    let connection = manager
        .spawn_consumer(&spawner)
        .with_context(|| format!("Failed to start {}", spawner.program().display()))?;
    let (producer, worker) = manager.open_stream(connection)?;

    let event_loop = EventLoop::spawn("rtplot-producer", &config.event_loop)?;
    event_loop.add(worker)?;

    producer.put_xy(0.0, 0.0)?;
    let batch = args.batch.max(1);
    let mut sent = 1;
    while sent < args.points {
        let n = batch.min(args.points - sent);
        let xs: Vec<f64> = (sent..sent + n).map(|i| i as f64 * 0.01).collect();
        let ys: Vec<f64> = xs.iter().map(|x| x.sin()).collect();
        producer.put_numeric_x_list_y_list(&xs, &ys)?;
        sent += n;
        std::thread::sleep(Duration::from_millis(10));
    }
    tracing::info!("Queued {} samples", sent);

    let len: usize = producer
        .call("echo_len", vec!["hello".into()])?
        .wait_as(RPC_TIMEOUT)?;
    tracing::info!("echo_len(\"hello\") = {}", len);

    let count: usize = producer.call("point_count", vec![])?.wait_as(RPC_TIMEOUT)?;
    tracing::info!("Consumer holds {} points", count);

    match producer.call("no_such_method", vec![])?.wait_timeout(RPC_TIMEOUT) {
        Ok(value) => tracing::warn!("Unexpected success: {}", value),
        Err(e) => tracing::info!("Unknown method rejected: {}", e),
    }

    producer.close()?;
    if !event_loop.wait_until_empty(Duration::from_secs(10)) {
        tracing::warn!("Producer worker still running after close");
    }
    event_loop.shutdown();

    for (name, code) in manager.wait_all()? {
        tracing::info!("Consumer {} exited with {:?}", name, code);
    }
    Ok(())
}

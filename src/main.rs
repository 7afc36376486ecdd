//! rtplot-rs consumer process
//!
//! Started by a connection manager with the manager's host and port. Connects
//! back, identifies itself, accepts the stream handshake and pumps samples into
//! a rolling buffer until the producer sends EXIT.

use anyhow::Context;
use clap::Parser;
use rtplot_rs::{
    buffer::{lock_buffers, SharedXyBuffers},
    config::AppConfig,
    event_loop::{EventLoop, WorkerId},
    manager::{ConsumerArgs, StartupClient},
    workers::{accept_consumer, builtin_commands},
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Interval between headless refreshes
const REFRESH_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rtplot_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = ConsumerArgs::parse();
    tracing::info!(
        "Starting consumer {} ({} plot, {} style)",
        args.name,
        args.plot,
        args.style
    );

    let mut config =
        AppConfig::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    config.stream.capacity = args.max_pts;
    config.stream.style = args.style.clone();
    config.stream.dtype = args.dtype;
    config.validate().context("Invalid configuration")?;

    let transport = StartupClient::connect(&args.host, args.port, &args.name, &config)
        .context("Manager rendezvous failed")?;
    let (pump, buffers) = accept_consumer(transport, &config, &args.name, builtin_commands)
        .context("Stream handshake failed")?;

    let capacity = lock_buffers(&buffers)?.capacity();
    if capacity != args.max_pts {
        tracing::warn!(
            "Producer negotiated capacity {} (command line asked for {})",
            capacity,
            args.max_pts
        );
    }

    let event_loop = EventLoop::spawn("rtplot-pump", &config.event_loop)?;
    let pump_id = event_loop.add(pump)?;
    render_headless(&event_loop, pump_id, &buffers)?;
    event_loop.shutdown();

    tracing::info!("Consumer {} finished", args.name);
    Ok(())
}

/// Stand-in for a plot window: refresh while the pump is alive
fn render_headless(
    event_loop: &EventLoop,
    pump_id: WorkerId,
    buffers: &SharedXyBuffers,
) -> rtplot_rs::Result<()> {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut refreshes = 0u64;

    loop {
        let pump_alive = event_loop.contains(pump_id);
        let updates = {
            let mut bufs = lock_buffers(buffers)?;
            let updates = bufs.take_updates();
            if updates > 0 {
                bufs.snapshot_into(&mut xs, &mut ys);
            }
            updates
        };

        if updates > 0 {
            refreshes += 1;
            if let (Some(x), Some(y)) = (xs.last(), ys.last()) {
                tracing::debug!(
                    "Refresh {}: {} new samples, {} in window, latest ({:.4}, {:.4})",
                    refreshes,
                    updates,
                    xs.len(),
                    x,
                    y
                );
            }
        }

        if !pump_alive {
            break;
        }
        std::thread::sleep(REFRESH_INTERVAL);
    }

    tracing::info!(
        "Stream ended after {} refreshes with {} samples in window",
        refreshes,
        xs.len()
    );
    Ok(())
}

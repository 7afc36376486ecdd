//! Test data builders for creating test objects

use rtplot_rs::config::AppConfig;
use rtplot_rs::protocol::Dtype;

/// Builder for loopback-friendly configs with short timeouts
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.stream.capacity = 1000;
        config.stream.queue_capacity = 256;
        config.event_loop.idle_interval_ms = 5;
        config.event_loop.poll_interval_ms = 1;
        config.transport.connect_timeout_ms = 1000;
        config.transport.handshake_timeout_ms = 2000;
        config.reconnect.initial_backoff_ms = 5;
        config.reconnect.max_backoff_ms = 20;
        config.manager.host = "127.0.0.1".to_string();
        config.manager.spawn_timeout_ms = 5000;
        config.manager.accept_poll_ms = 2;
        Self { config }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.stream.capacity = capacity;
        self
    }

    pub fn dtype(mut self, dtype: Dtype) -> Self {
        self.config.stream.dtype = dtype;
        self
    }

    pub fn style(mut self, style: &str) -> Self {
        self.config.stream.style = style.to_string();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.event_loop.batch_size = batch_size;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `n` samples starting at `start`: x counts up, y = 2x
pub fn ramp(start: usize, n: usize) -> (Vec<f64>, Vec<f64>) {
    let xs: Vec<f64> = (start..start + n).map(|i| i as f64).collect();
    let ys = xs.iter().map(|x| x * 2.0).collect();
    (xs, ys)
}

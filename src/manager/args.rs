//! Command line of the consumer process

use crate::config::{DEFAULT_CAPACITY, DEFAULT_STYLE};
use crate::protocol::Dtype;
use clap::Parser;
use std::path::PathBuf;

/// Plot kinds the consumer can host
pub const SUPPORTED_PLOTS: &[&str] = &["xyplotter"];

/// Manager protocols the consumer can speak
pub const SUPPORTED_MPROTOS: &[&str] = &["tcp"];

/// Arguments the manager passes to a spawned consumer
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "rtplot-rs", version, about = "Real-time x/y stream consumer")]
pub struct ConsumerArgs {
    /// Manager host to connect back to
    #[arg(value_parser = parse_host)]
    pub host: String,

    /// Manager port to connect back to
    pub port: u16,

    /// Name announced in the startup line
    #[arg(long, default_value = "Serv001")]
    pub name: String,

    /// Rolling window size
    #[arg(long = "max-pts", default_value_t = DEFAULT_CAPACITY)]
    pub max_pts: usize,

    /// Plot style label
    #[arg(long, default_value = DEFAULT_STYLE)]
    pub style: String,

    /// Float width of numeric payloads
    #[arg(long, default_value = "float64")]
    pub dtype: Dtype,

    /// Plot kind
    #[arg(long, default_value = "xyplotter", value_parser = parse_plot)]
    pub plot: String,

    /// Manager protocol
    #[arg(long, default_value = "tcp", value_parser = parse_mproto)]
    pub mproto: String,

    /// Config file overriding the defaults
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ConsumerArgs {
    pub fn new(host: &str, port: u16, name: &str) -> Self {
        Self {
            host: host.to_lowercase(),
            port,
            name: name.to_string(),
            max_pts: DEFAULT_CAPACITY,
            style: DEFAULT_STYLE.to_string(),
            dtype: Dtype::Float64,
            plot: SUPPORTED_PLOTS[0].to_string(),
            mproto: SUPPORTED_MPROTOS[0].to_string(),
            config: None,
        }
    }

    /// Render back into argv form (without the program name)
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            self.host.clone(),
            self.port.to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--max-pts".to_string(),
            self.max_pts.to_string(),
            "--style".to_string(),
            self.style.clone(),
            "--dtype".to_string(),
            self.dtype.to_string(),
            "--plot".to_string(),
            self.plot.clone(),
            "--mproto".to_string(),
            self.mproto.clone(),
        ];
        if let Some(path) = &self.config {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        args
    }
}

fn parse_host(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        return Err("host must not be empty".to_string());
    }
    Ok(s.to_lowercase())
}

fn parse_choice(s: &str, allowed: &[&str], what: &str) -> Result<String, String> {
    let value = s.to_lowercase();
    if allowed.contains(&value.as_str()) {
        Ok(value)
    } else {
        Err(format!("unsupported {} '{}' (expected one of: {})", what, s, allowed.join(", ")))
    }
}

fn parse_plot(s: &str) -> Result<String, String> {
    parse_choice(s, SUPPORTED_PLOTS, "plot")
}

fn parse_mproto(s: &str) -> Result<String, String> {
    parse_choice(s, SUPPORTED_MPROTOS, "manager protocol")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = ConsumerArgs::try_parse_from(["rtplot-rs", "LocalHost", "4000"]).unwrap();
        assert_eq!(args.host, "localhost");
        assert_eq!(args.port, 4000);
        assert_eq!(args.max_pts, 300_000);
        assert_eq!(args.style, "ggplot");
        assert_eq!(args.plot, "xyplotter");
        assert_eq!(args.mproto, "tcp");
        assert_eq!(args.dtype, Dtype::Float64);
    }

    #[test]
    fn test_labels_are_case_insensitive() {
        let args = ConsumerArgs::try_parse_from([
            "rtplot-rs", "h", "1", "--plot", "XYPlotter", "--mproto", "TCP", "--dtype", "Float32",
        ])
        .unwrap();
        assert_eq!(args.plot, "xyplotter");
        assert_eq!(args.mproto, "tcp");
        assert_eq!(args.dtype, Dtype::Float32);
    }

    #[test]
    fn test_rejects_unknown_choices() {
        assert!(ConsumerArgs::try_parse_from(["rtplot-rs", "h", "1", "--plot", "bars"]).is_err());
        assert!(ConsumerArgs::try_parse_from(["rtplot-rs", "h", "1", "--mproto", "udp"]).is_err());
        assert!(ConsumerArgs::try_parse_from(["rtplot-rs", "h", "notaport"]).is_err());
    }

    #[test]
    fn test_to_args_parses_back() {
        let mut args = ConsumerArgs::new("localhost", 5555, "Serv007");
        args.max_pts = 1000;
        args.config = Some(PathBuf::from("/tmp/rt.toml"));

        let mut argv = vec!["rtplot-rs".to_string()];
        argv.extend(args.to_args());
        assert_eq!(ConsumerArgs::try_parse_from(argv).unwrap(), args);
    }
}

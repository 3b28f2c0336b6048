use clap::Parser;
use serde::Deserialize;
use crate::capture::capture::CaptureConfig;
use crate::report::report::ReportFormat;

/// One day; longer windows would overflow timer deadlines.
const MAX_WINDOW_SECS: u64 = 86_400;

#[derive(Parser, Debug, Default)]
#[clap(name = "flowstat", about = "Windowed per-flow TCP byte and packet counts from live traffic")]
pub struct Args{
    /// YAML file with any of the settings below; flags take precedence.
    #[clap(short, long, env = "FLOWSTAT_CONFIG")]
    pub config_file: Option<String>,
    #[clap(short, long, env = "FLOWSTAT_INTERFACE")]
    pub interface: Option<String>,
    /// Maximum bytes captured per frame.
    #[clap(long, env = "FLOWSTAT_SNAPLEN")]
    pub snaplen: Option<i32>,
    #[clap(long, env = "FLOWSTAT_PROMISC")]
    pub promisc: Option<bool>,
    #[clap(short, long, env = "FLOWSTAT_WORKERS")]
    pub workers: Option<usize>,
    #[clap(long, env = "FLOWSTAT_WINDOW_SECS")]
    pub window_secs: Option<u64>,
    /// How often workers hand their local tables to the coordinator.
    #[clap(long, env = "FLOWSTAT_FLUSH_MILLIS")]
    pub flush_millis: Option<u64>,
    #[clap(long, env = "FLOWSTAT_QUEUE_DEPTH")]
    pub queue_depth: Option<usize>,
    #[clap(long, env = "FLOWSTAT_READ_TIMEOUT_MS")]
    pub read_timeout_ms: Option<i32>,
    /// BPF expression applied by the capture source.
    #[clap(long, env = "FLOWSTAT_FILTER")]
    pub filter: Option<String>,
    /// Replay a pcap savefile instead of capturing live.
    #[clap(short, long, env = "FLOWSTAT_READ_FILE")]
    pub read_file: Option<String>,
    #[clap(long, value_enum, env = "FLOWSTAT_FORMAT")]
    pub format: Option<ReportFormat>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config{
    pub interface: String,
    pub snaplen: i32,
    pub promisc: bool,
    pub workers: usize,
    pub window_secs: u64,
    pub flush_millis: u64,
    pub queue_depth: usize,
    pub read_timeout_ms: i32,
    pub filter: Option<String>,
    pub read_file: Option<String>,
    pub format: ReportFormat,
}

impl Default for Config{
    fn default() -> Config{
        Config{
            interface: "eth0".to_string(),
            snaplen: 1500,
            promisc: true,
            workers: 4,
            window_secs: 10,
            flush_millis: 250,
            queue_depth: 1000,
            read_timeout_ms: 100,
            filter: None,
            read_file: None,
            format: ReportFormat::Text,
        }
    }
}

impl Config{
    pub fn new() -> anyhow::Result<Config>{
        Config::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> anyhow::Result<Config>{
        let mut config = match &args.config_file{
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("cannot read config file {}: {}", path, e))?;
                Config::from_yaml(&contents)?
            },
            None => Config::default(),
        };
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> anyhow::Result<Config>{
        // an empty document deserializes to unit, not to the defaults
        if contents.trim().is_empty(){
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    fn apply(&mut self, args: Args){
        if let Some(v) = args.interface{ self.interface = v; }
        if let Some(v) = args.snaplen{ self.snaplen = v; }
        if let Some(v) = args.promisc{ self.promisc = v; }
        if let Some(v) = args.workers{ self.workers = v; }
        if let Some(v) = args.window_secs{ self.window_secs = v; }
        if let Some(v) = args.flush_millis{ self.flush_millis = v; }
        if let Some(v) = args.queue_depth{ self.queue_depth = v; }
        if let Some(v) = args.read_timeout_ms{ self.read_timeout_ms = v; }
        if args.filter.is_some(){ self.filter = args.filter; }
        if args.read_file.is_some(){ self.read_file = args.read_file; }
        if let Some(v) = args.format{ self.format = v; }
    }

    pub fn validate(&self) -> anyhow::Result<()>{
        if self.workers == 0{
            return Err(anyhow::anyhow!("Invalid workers: must be at least 1"));
        }
        if self.window_secs == 0 || self.window_secs > MAX_WINDOW_SECS{
            return Err(anyhow::anyhow!("Invalid window_secs: {} must be between 1 and {}", self.window_secs, MAX_WINDOW_SECS));
        }
        if self.snaplen <= 0{
            return Err(anyhow::anyhow!("Invalid snaplen: {}", self.snaplen));
        }
        if self.queue_depth == 0{
            return Err(anyhow::anyhow!("Invalid queue_depth: must be at least 1"));
        }
        if self.flush_millis == 0 || self.flush_interval() >= self.window(){
            return Err(anyhow::anyhow!("Invalid flush_millis: {} must be between 1 and the window length", self.flush_millis));
        }
        if self.read_timeout_ms < 0{
            return Err(anyhow::anyhow!("Invalid read_timeout_ms: {}", self.read_timeout_ms));
        }
        Ok(())
    }

    pub fn window(&self) -> tokio::time::Duration{
        tokio::time::Duration::from_secs(self.window_secs)
    }

    pub fn flush_interval(&self) -> tokio::time::Duration{
        tokio::time::Duration::from_millis(self.flush_millis)
    }

    pub fn capture(&self) -> CaptureConfig{
        CaptureConfig{
            interface: self.interface.clone(),
            snaplen: self.snaplen,
            promisc: self.promisc,
            read_timeout_ms: self.read_timeout_ms,
            filter: self.filter.clone(),
            read_file: self.read_file.clone(),
        }
    }
}

//! Provides a means to read, parse and hold configuration options for scans.
use crate::address::{Address, ScanRange};
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

pub const DEFAULT_MAX_CONCURRENCY: usize = 255;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Represents the strategy in which the address range will be walked.
///   - Serial will run from start to end, for example 10.0.0.1 to 10.0.0.254.
///   - Random will spread consecutive probes across the whole range.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

pub type Ports = Vec<u16>;

/// Parses a single port given on the command line.
///
/// Ports keep the order they were given in, since that order decides which
/// port of a host is tried first.
pub fn parse_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

/// Everything that can be wrong with the input before a single probe is sent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("must specify --from <from_ip>")]
    MissingFrom,
    #[error("must specify --to <to_ip>")]
    MissingTo,
    #[error("must specify at least one --ports <port>")]
    NoPorts,
    #[error("Port {0} must be between 1 and 65535")]
    InvalidPort(u16),
    #[error("{0}")]
    InvalidRange(String),
    #[error("max concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("connect timeout must be at least 1 second")]
    ZeroTimeout,
    #[error("resume position {position} is past the end of the range ({len} addresses)")]
    ResumePastEnd { position: u64, len: u64 },
    #[error("Found {0} in configuration file")]
    Toml(String),
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "hipscan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Searches for Hipcams in a given IPv4 range. Prints results to STDOUT.
///
/// Ctrl-C stops the scan and prints a position to continue from with --resume.
/// Ctrl-Z waits for running probes, then suspends; `fg` resumes.
pub struct Opts {
    /// Begin of the IP range.
    #[arg(short, long)]
    pub from: Option<Address>,

    /// End of the IP range (inclusive).
    #[arg(short, long)]
    pub to: Option<Address>,

    /// Ports to check. Repeat the flag or separate with commas: -p 80 -p 81 or -p 80,81.
    /// The last port given is tried first.
    #[arg(short, long, value_delimiter = ',', value_parser = parse_port)]
    pub ports: Vec<u16>,

    /// Continue a stopped scan at the given position.
    #[arg(short = 'c', long, default_value = "0")]
    pub resume: u64,

    /// Pseudo-randomize the IP range. Same as --scan-order random.
    #[arg(short, long)]
    pub random: bool,

    /// The order in which addresses are visited.
    #[arg(long, value_enum, ignore_case = true, default_value = "serial")]
    pub scan_order: ScanOrder,

    /// Connection timeout in seconds, applied to connect, send and receive.
    #[arg(short = 'T', long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Maximum number of hosts probed at the same time.
    #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Greppable mode. Only output matches, no header or progress.
    #[arg(short, long)]
    pub greppable: bool,

    /// Print matches as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Accessible mode. Turns off colours and the progress bar.
    #[arg(long)]
    pub accessible: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(long, value_parser)]
    pub config_path: Option<PathBuf>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// Merges values found within the user configuration file into the
    /// command line options.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            greppable,
            accessible,
            json,
            timeout,
            max_concurrency,
            scan_order
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if self.$field.is_none() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        if self.ports.is_empty() {
            if let Some(ports) = &config.ports {
                self.ports.clone_from(ports);
            }
        }

        merge_optional!(from, to, ulimit);
    }

    pub const fn order(&self) -> ScanOrder {
        if self.random {
            ScanOrder::Random
        } else {
            self.scan_order
        }
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            ports: vec![],
            resume: 0,
            random: false,
            scan_order: ScanOrder::Serial,
            timeout: DEFAULT_TIMEOUT_SECS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            ulimit: None,
            greppable: false,
            json: false,
            accessible: false,
            no_config: true,
            config_path: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    from: Option<Address>,
    to: Option<Address>,
    ports: Option<Vec<u16>>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    json: Option<bool>,
    timeout: Option<u64>,
    max_concurrency: Option<usize>,
    ulimit: Option<u64>,
    scan_order: Option<ScanOrder>,
}

#[allow(clippy::doc_link_with_quotes)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct.
    ///
    /// # Format
    ///
    /// from = "10.0.0.1"
    /// to = "10.0.255.254"
    /// ports = [80, 81]
    /// max_concurrency = 512
    /// timeout = 3
    /// scan_order = "Random"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let content = custom_config_path
            .or_else(default_config_path)
            .filter(|path| path.exists())
            .and_then(|path| fs::read_to_string(path).ok())
            .unwrap_or_default();

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Toml(e.to_string()))
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".hipscan.toml");
    Some(config_path)
}

/// The validated, immutable input of one scan run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub range: ScanRange,
    /// Ports in the order the user gave them.
    pub ports: Ports,
    pub max_concurrency: usize,
    pub connect_timeout: Duration,
    pub start_position: u64,
    pub order: ScanOrder,
}

impl ScanConfig {
    pub fn new(range: ScanRange, ports: Ports) -> Self {
        Self {
            range,
            ports,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            connect_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            start_position: 0,
            order: ScanOrder::Serial,
        }
    }
}

impl TryFrom<&Opts> for ScanConfig {
    type Error = ConfigError;

    fn try_from(opts: &Opts) -> Result<Self, Self::Error> {
        let start = opts.from.ok_or(ConfigError::MissingFrom)?;
        let end = opts.to.ok_or(ConfigError::MissingTo)?;
        let range = ScanRange::new(start, end).map_err(ConfigError::InvalidRange)?;

        if opts.ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        // ports from the config file skip the clap value parser
        if let Some(&port) = opts.ports.iter().find(|&&p| p < LOWEST_PORT_NUMBER) {
            return Err(ConfigError::InvalidPort(port));
        }
        if opts.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if opts.timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if opts.resume > range.len() {
            return Err(ConfigError::ResumePastEnd {
                position: opts.resume,
                len: range.len(),
            });
        }

        Ok(Self {
            range,
            ports: opts.ports.clone(),
            max_concurrency: opts.max_concurrency,
            connect_timeout: Duration::from_secs(opts.timeout),
            start_position: opts.resume,
            order: opts.order(),
        })
    }
}

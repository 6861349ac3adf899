use {
    std::{env, fs, io, net::{IpAddr, Ipv4Addr, SocketAddr}, path::{Path, PathBuf}, time::Duration},
    clap::Parser,
    serde::Deserialize,
    thiserror::Error,
    tracing::Level,
};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
const DEFAULT_DATABASE_FILE: &str = "data/counter.db";

#[derive(Parser, Debug)]
#[command(version, about = "Persisted visitor counter with an http api and dashboard")]
pub struct Args {
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Location of the sqlite database, defaults to data/counter.db next to the executable.
    #[arg(long)]
    pub database_path: Option<PathBuf>,

    /// Serve prometheus metrics on this port. Disabled when not set.
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Size of the request worker pool.
    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long)]
    pub busy_timeout_ms: Option<u64>,

    /// Optional yaml config file. Command line and environment take precedence over it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,
}

#[derive(Deserialize, Debug, Default, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub host: Option<IpAddr>,
    pub database_path: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub workers: Option<usize>,
    pub busy_timeout_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(file_path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read(file_path)
            .map_err(|err| ConfigError::FailedToRead { path: file_path.to_owned(), source: err })?;
        Self::parse(&content)
    }

    pub fn parse(content: &[u8]) -> Result<Self, ConfigError> {
        serde_yml::from_slice(content).map_err(|err| ConfigError::FailedToParse { reason: err.to_string() })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub database_path: PathBuf,
    pub metrics_port: Option<u16>,
    pub workers: Option<usize>,
    pub busy_timeout: Duration,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source:?}")]
    FailedToRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to parse config file: {reason}")]
    FailedToParse {
        reason: String,
    },

    #[error("failed to locate executable directory: {reason}")]
    ExecutableDirectory {
        reason: String,
    },

    #[error("worker pool size must be at least 1")]
    NoWorkers,
}

impl ServerConfig {
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file, default_database_path)
    }

    /// Merges command line, file and defaults, in that order of precedence.
    pub fn resolve(
        args: &Args,
        file: FileConfig,
        default_database_path: impl FnOnce() -> Result<PathBuf, ConfigError>,
    ) -> Result<Self, ConfigError> {
        let port = args.port.or(file.port).unwrap_or(DEFAULT_PORT);
        let host = args.host.or(file.host).unwrap_or(DEFAULT_HOST);

        let database_path = match args.database_path.clone().or(file.database_path) {
            Some(v) => v,
            None => default_database_path()?,
        };

        let workers = args.workers.or(file.workers);
        if workers == Some(0) {
            return Err(ConfigError::NoWorkers);
        }

        Ok(Self {
            addr: SocketAddr::new(host, port),
            database_path,
            metrics_port: args.metrics_port.or(file.metrics_port),
            workers,
            busy_timeout: Duration::from_millis(args.busy_timeout_ms.or(file.busy_timeout_ms).unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)),
        })
    }
}

fn default_database_path() -> Result<PathBuf, ConfigError> {
    let executable = env::current_exe()
        .map_err(|err| ConfigError::ExecutableDirectory { reason: err.to_string() })?;
    let dir = executable.parent()
        .ok_or_else(|| ConfigError::ExecutableDirectory { reason: format!("{executable:?} has no parent directory") })?;
    Ok(dir.join(DEFAULT_DATABASE_FILE))
}

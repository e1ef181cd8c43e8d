use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::{net::SocketAddr, ops::Range, path::PathBuf};

/// Runtime configuration for the `orcano-server` binary.
///
/// Every value can be given on the command line or through the environment
/// (a `.env` file in the working directory is loaded first). Defaults match a
/// single-match deployment with one emulator per worker.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "orcano-server",
    version,
    about = "Line-oriented TCP frontend for a pool of emulator backends"
)]
pub struct CliArgs {
    /// Address the client-facing listener binds to.
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:53273")]
    pub listen_addr: SocketAddr,

    /// Path of the emulator executable.
    ///
    /// Environment variable: `BACKEND_PATH`
    #[arg(long, env = "BACKEND_PATH")]
    pub backend_path: PathBuf,

    /// VM image passed to the emulator.
    ///
    /// Environment variable: `IMAGE_PATH`
    #[arg(long, env = "IMAGE_PATH", default_value = "./image.dol")]
    pub image_path: PathBuf,

    /// Emulator argument template. `{image}` and `{port}` are substituted.
    ///
    /// Environment variable: `BACKEND_ARGS` (space separated)
    #[arg(
        long,
        env = "BACKEND_ARGS",
        value_delimiter = ' ',
        num_args = 0..,
        allow_hyphen_values = true,
        default_values = ["-e", "{image}", "-p", "headless", "-v", "Null"]
    )]
    pub backend_args: Vec<String>,

    /// Directory holding user keys, slot values and lock markers.
    ///
    /// Environment variable: `STORAGE_DIR`
    #[arg(long, env = "STORAGE_DIR", default_value = "./data")]
    pub storage_dir: PathBuf,

    /// Maximum number of queued client requests before submitters wait.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    /// Number of concurrently running backend instances.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 2)]
    pub num_workers: usize,

    /// First control port handed to backends (inclusive).
    ///
    /// Environment variable: `PORT_RANGE_START`
    #[arg(long, env = "PORT_RANGE_START", default_value_t = 55020)]
    pub port_range_start: u16,

    /// End of the control port range (exclusive).
    ///
    /// Keep a few more ports than workers so a restarting instance never has
    /// to wait for a lingering socket.
    ///
    /// Environment variable: `PORT_RANGE_END`
    #[arg(long, env = "PORT_RANGE_END", default_value_t = 55036)]
    pub port_range_end: u16,

    /// Hard bound on one request exchange with a backend, in milliseconds.
    ///
    /// Environment variable: `EXCHANGE_TIMEOUT_MS`
    #[arg(long, env = "EXCHANGE_TIMEOUT_MS", default_value_t = 5_000)]
    pub exchange_timeout_ms: u64,

    /// How long a freshly spawned backend may take to accept its control
    /// connection, in milliseconds.
    ///
    /// Environment variable: `STARTUP_TIMEOUT_MS`
    #[arg(long, env = "STARTUP_TIMEOUT_MS", default_value_t = 60_000)]
    pub startup_timeout_ms: u64,

    /// Delay between control connection attempts during startup, in
    /// milliseconds.
    ///
    /// Environment variable: `STARTUP_INTERVAL_MS`
    #[arg(long, env = "STARTUP_INTERVAL_MS", default_value_t = 2_000)]
    pub startup_interval_ms: u64,

    /// Delay before a failed worker is replaced, in milliseconds.
    ///
    /// Environment variable: `RESTART_BACKOFF_MS`
    #[arg(long, env = "RESTART_BACKOFF_MS", default_value_t = 0)]
    pub restart_backoff_ms: u64,

    /// Longest accepted request line in bytes.
    ///
    /// Environment variable: `MAX_REQUEST_SIZE`
    #[arg(long, env = "MAX_REQUEST_SIZE", default_value_t = 1024)]
    pub max_request_size: usize,

    /// Disconnect clients idle for this many seconds.
    ///
    /// Environment variable: `CLIENT_IDLE_TIMEOUT_SECS`
    #[arg(long, env = "CLIENT_IDLE_TIMEOUT_SECS", default_value_t = 300)]
    pub client_idle_timeout_secs: u64,
}

/// Launch parameters for emulator processes.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub backend_path: PathBuf,
    pub image_path: PathBuf,
    pub backend_args: Vec<String>,
}

/// Parameters of one backend session.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub exchange_timeout: Duration,
    pub startup_timeout: Duration,
    pub startup_interval: Duration,
}

/// Parameters of the worker pool supervisor.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub num_workers: usize,
    pub ports: Range<u16>,
    pub restart_backoff: Duration,
    pub session: SessionConfig,
}

/// Parameters of one client connection.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub max_request_size: usize,
    pub idle_timeout: Duration,
}

/// Validated configuration, split per component.
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    pub listen_addr: SocketAddr,
    pub storage_dir: PathBuf,
    pub queue_capacity: usize,
    pub launch: LaunchConfig,
    pub pool: PoolConfig,
    pub client: ClientConfig,
}

impl TryFrom<CliArgs> for FrontendConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be greater than 0");
        }

        if args.port_range_start >= args.port_range_end {
            bail!(
                "Port range {}..{} is empty",
                args.port_range_start,
                args.port_range_end
            );
        }

        let port_count = usize::from(args.port_range_end - args.port_range_start);
        if port_count < args.num_workers {
            bail!(
                "Port range {}..{} has {} ports, fewer than NUM_WORKERS ({})",
                args.port_range_start,
                args.port_range_end,
                port_count,
                args.num_workers
            );
        }

        for (name, value) in [
            ("EXCHANGE_TIMEOUT_MS", args.exchange_timeout_ms),
            ("STARTUP_TIMEOUT_MS", args.startup_timeout_ms),
            ("STARTUP_INTERVAL_MS", args.startup_interval_ms),
            ("CLIENT_IDLE_TIMEOUT_SECS", args.client_idle_timeout_secs),
        ] {
            if value == 0 {
                bail!("{name} must be greater than 0");
            }
        }

        if args.max_request_size == 0 {
            bail!("MAX_REQUEST_SIZE must be greater than 0");
        }

        Ok(Self {
            listen_addr: args.listen_addr,
            storage_dir: args.storage_dir,
            queue_capacity: args.queue_capacity,
            launch: LaunchConfig {
                backend_path: args.backend_path,
                image_path: args.image_path,
                backend_args: args.backend_args,
            },
            pool: PoolConfig {
                num_workers: args.num_workers,
                ports: args.port_range_start..args.port_range_end,
                restart_backoff: Duration::from_millis(args.restart_backoff_ms),
                session: SessionConfig {
                    exchange_timeout: Duration::from_millis(args.exchange_timeout_ms),
                    startup_timeout: Duration::from_millis(args.startup_timeout_ms),
                    startup_interval: Duration::from_millis(args.startup_interval_ms),
                },
            },
            client: ClientConfig {
                max_request_size: args.max_request_size,
                idle_timeout: Duration::from_secs(args.client_idle_timeout_secs),
            },
        })
    }
}

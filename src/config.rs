use crate::connection_slot::{DeviceGroup, RegisterMap};
use crate::register_reader::Endpoint;
use crate::sink::DbSettings;
use crate::snapshot::SourceId;
use anyhow::{bail, Context};
use clap::Parser;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Snapshot slots fed by each register-based inverter, strings A, B, C.
pub const INVERTER_SOURCES: [[usize; 3]; 3] = [[0, 1, 2], [3, 4, 5], [6, 7, 8]];

/// Snapshot slots fed by the gateway string inverter, strings A and B.
pub const GATEWAY_SOURCES: [usize; 2] = [9, 10];

#[derive(Debug, Clone, Parser)]
#[command(
    name = "sma_watch",
    version,
    about = "Monitors SMA Sunny Boy inverter strings and logs them to MySQL"
)]
pub struct Config {
    /// Modbus TCP address of each register-based inverter, in snapshot order
    #[arg(
        long = "inverter",
        env = "SMA_INVERTERS",
        value_delimiter = ',',
        default_value = "192.168.10.41:502,192.168.10.42:502,192.168.10.52:502"
    )]
    pub inverters: Vec<String>,

    /// Modbus unit id the inverters answer on
    #[arg(long, env = "SMA_UNIT_ID", default_value_t = 3)]
    pub unit_id: u8,

    /// Base URL of the Sunny WebBox
    #[arg(long, env = "SMA_WEBBOX_URL", default_value = "http://192.168.10.22:80")]
    pub webbox_url: String,

    /// Name fragment identifying the string inverter behind the WebBox
    #[arg(long, env = "SMA_WEBBOX_DEVICE", default_value = "WRTU")]
    pub webbox_device: String,

    /// Database login id
    #[arg(long = "dblogin", env = "SMA_DB_LOGIN", default_value = "logger")]
    pub db_login: String,

    /// Database login password
    #[arg(long = "dbpwd", env = "SMA_DB_PASSWORD", default_value = "logger")]
    pub db_password: String,

    /// Name of the database
    #[arg(long = "dbname", env = "SMA_DB_NAME", default_value = "logging")]
    pub db_name: String,

    /// Database server and port
    #[arg(long = "dbserver", env = "SMA_DB_SERVER", default_value = "localhost:3306")]
    pub db_server: String,

    /// Table receiving one row per flush
    #[arg(long, env = "SMA_DB_TABLE", default_value = "solar_production")]
    pub db_table: String,

    /// Port number for the web interface
    #[arg(long, env = "SMA_PORT", default_value_t = 8081)]
    pub port: u16,

    /// Log every reading as it is taken
    #[arg(short, long, env = "SMA_VERBOSE")]
    pub verbose: bool,

    /// Milliseconds between inverter polls
    #[arg(long, env = "SMA_TICK_MS", default_value_t = 1000)]
    pub tick_ms: u64,

    /// Polls between WebBox queries and database writes
    #[arg(long, env = "SMA_FLUSH_TICKS", default_value_t = 15)]
    pub flush_ticks: u32,

    /// Timeout for each device connect, read and gateway request
    #[arg(long, env = "SMA_IO_TIMEOUT_MS", default_value_t = 2000)]
    pub io_timeout_ms: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.inverters.len() != INVERTER_SOURCES.len() {
            bail!(
                "expected {} inverter addresses, got {}",
                INVERTER_SOURCES.len(),
                self.inverters.len()
            );
        }
        if self.tick_ms == 0 {
            bail!("tick period must be at least 1ms");
        }
        if self.flush_ticks == 0 {
            bail!("flush period must be at least 1 tick");
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Pairs every inverter address with its fixed snapshot slots.
    pub fn device_groups(&self) -> anyhow::Result<Vec<DeviceGroup>> {
        self.validate()?;
        self.inverters
            .iter()
            .zip(INVERTER_SOURCES)
            .enumerate()
            .map(|(i, (address, sources))| {
                Ok(DeviceGroup {
                    name: format!("inverter-{}", i + 1),
                    endpoint: Endpoint {
                        address: resolve(address)?,
                        unit_id: self.unit_id,
                    },
                    sources: source_ids(sources)?,
                    registers: RegisterMap::default(),
                })
            })
            .collect()
    }

    pub fn gateway_sources(&self) -> anyhow::Result<[SourceId; 2]> {
        source_ids(GATEWAY_SOURCES)
    }

    pub fn db_settings(&self) -> DbSettings {
        DbSettings {
            login: self.db_login.clone(),
            password: self.db_password.clone(),
            database: self.db_name.clone(),
            server: self.db_server.clone(),
            table: self.db_table.clone(),
        }
    }
}

fn resolve(address: &str) -> anyhow::Result<SocketAddr> {
    address
        .to_socket_addrs()
        .with_context(|| format!("invalid inverter address `{address}`"))?
        .next()
        .with_context(|| format!("inverter address `{address}` did not resolve"))
}

fn source_ids<const N: usize>(indices: [usize; N]) -> anyhow::Result<[SourceId; N]> {
    let mut ids = [SourceId::new(0).context("snapshot has no slots")?; N];
    for (id, index) in ids.iter_mut().zip(indices) {
        *id = SourceId::new(index).with_context(|| format!("source index {index} out of range"))?;
    }
    Ok(ids)
}

//! SMA Watch Library
//!
//! Polls SMA Sunny Boy inverters over Modbus TCP every second and a Sunny
//! WebBox gateway every flush period, keeps the latest reading of every
//! string in a shared snapshot, logs that snapshot to MySQL and serves it
//! as JSON.

pub mod api;
pub mod config;
pub mod connection_slot;
pub mod error;
pub mod gateway;
pub mod measurement;
pub mod register_reader;
pub mod scheduler;
pub mod sink;
pub mod snapshot;
pub mod supervisor;
pub mod webbox;

// Re-export commonly used types for easier access
pub use config::Config;
pub use connection_slot::{ConnectionSlot, DeviceGroup, RegisterMap};
pub use gateway::GatewayPath;
pub use measurement::Measurement;
pub use register_reader::{Connector, Endpoint, ModbusTcpConnector, RegisterReader};
pub use scheduler::{Scheduler, TickReport};
pub use sink::{MySqlSink, Sink, SnapshotRow};
pub use snapshot::{SharedSnapshot, SnapshotView, SourceId};
pub use webbox::{GatewayQuery, WebboxClient};

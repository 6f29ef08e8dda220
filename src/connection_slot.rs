use crate::error::ConnectionError;
use crate::measurement::{Measurement, RegisterSpec};
use crate::register_reader::{Connector, Endpoint, RegisterReader};
use crate::snapshot::SourceId;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registers for one string input of an inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringRegisters {
    pub current: RegisterSpec,
    pub voltage: RegisterSpec,
    pub power: RegisterSpec,
}

/// Register layout of the A, B and C string inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    pub strings: [StringRegisters; 3],
}

impl RegisterMap {
    /// SMA Sunny Boy (SB3.0-5.0-1AV-40) DC input registers.
    pub const SUNNY_BOY: RegisterMap = RegisterMap {
        strings: [
            StringRegisters {
                current: RegisterSpec::new(30769, 3),
                voltage: RegisterSpec::new(30771, 2),
                power: RegisterSpec::new(30773, 0),
            },
            StringRegisters {
                current: RegisterSpec::new(30957, 3),
                voltage: RegisterSpec::new(30959, 2),
                power: RegisterSpec::new(30961, 0),
            },
            StringRegisters {
                current: RegisterSpec::new(30965, 3),
                voltage: RegisterSpec::new(30963, 2),
                power: RegisterSpec::new(30967, 0),
            },
        ],
    };
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::SUNNY_BOY
    }
}

/// Static description of one register-based inverter and the snapshot
/// slots its A/B/C strings feed.
#[derive(Debug, Clone)]
pub struct DeviceGroup {
    pub name: String,
    pub endpoint: Endpoint,
    pub sources: [SourceId; 3],
    pub registers: RegisterMap,
}

#[derive(Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected(Box<dyn RegisterReader>),
}

/// Owns the connection to one inverter. A failed connect or read leaves the
/// slot disconnected; the next poll starts over with a fresh connection.
pub struct ConnectionSlot {
    group: DeviceGroup,
    connector: Arc<dyn Connector>,
    state: ConnectionState,
    failing: bool,
}

impl ConnectionSlot {
    pub fn new(group: DeviceGroup, connector: Arc<dyn Connector>) -> Self {
        Self {
            group,
            connector,
            state: ConnectionState::Disconnected,
            failing: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.group.name
    }

    pub fn sources(&self) -> &[SourceId; 3] {
        &self.group.sources
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }

    /// Reads strings A, B and C. Values are only returned when all nine
    /// registers were read.
    pub async fn poll(&mut self) -> Result<[Measurement; 3], ConnectionError> {
        let result = self.poll_inner().await;
        match &result {
            Ok(values) => {
                if self.failing {
                    info!(group = %self.group.name, "Inverter back online");
                }
                self.failing = false;
                debug!(group = %self.group.name, ?values, "Inverter readings");
            }
            Err(e) if !self.failing => {
                warn!(group = %self.group.name, address = %self.group.endpoint.address, "Inverter poll failed: {e}");
                self.failing = true;
            }
            Err(e) => {
                debug!(group = %self.group.name, "Inverter still unavailable: {e}");
            }
        }
        result
    }

    async fn poll_inner(&mut self) -> Result<[Measurement; 3], ConnectionError> {
        let mut reader = match std::mem::take(&mut self.state) {
            ConnectionState::Connected(reader) => reader,
            ConnectionState::Disconnected => {
                let reader = self.connector.connect(&self.group.endpoint).await?;
                info!(group = %self.group.name, address = %self.group.endpoint.address, "Connected to inverter");
                reader
            }
        };

        // On error the reader is dropped here and the state stays Disconnected
        let values = read_group(reader.as_mut(), &self.group.registers).await?;
        self.state = ConnectionState::Connected(reader);
        Ok(values)
    }
}

async fn read_group(
    reader: &mut dyn RegisterReader,
    registers: &RegisterMap,
) -> Result<[Measurement; 3], ConnectionError> {
    let mut values = [Measurement::ZERO; 3];
    for (value, string) in values.iter_mut().zip(&registers.strings) {
        let current = read_quantity(reader, &string.current).await?;
        let voltage = read_quantity(reader, &string.voltage).await?;
        let power = read_quantity(reader, &string.power).await?;
        *value = Measurement::new(current, voltage, power);
    }
    Ok(values)
}

async fn read_quantity(
    reader: &mut dyn RegisterReader,
    spec: &RegisterSpec,
) -> Result<f64, ConnectionError> {
    let words = reader
        .read_registers(spec.register, RegisterSpec::WORDS)
        .await?;
    if words.len() != usize::from(RegisterSpec::WORDS) {
        return Err(ConnectionError::Malformed {
            register: spec.register,
            expected: usize::from(RegisterSpec::WORDS),
            actual: words.len(),
        });
    }
    Ok(spec.decode(&words))
}

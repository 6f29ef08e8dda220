use crate::error::ConnectionError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::prelude::*;

/// Network location of one Modbus inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub address: SocketAddr,
    pub unit_id: u8,
}

/// An open connection able to read input registers. Implementations return
/// the words as received; payload length is checked by the caller.
#[async_trait]
pub trait RegisterReader: Send {
    async fn read_registers(&mut self, register: u16, count: u16)
        -> Result<Vec<u16>, ConnectionError>;
}

/// Opens connections to inverters.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint)
        -> Result<Box<dyn RegisterReader>, ConnectionError>;
}

/// Modbus TCP transport. Connect and every read are bounded by `io_timeout`.
#[derive(Debug, Clone)]
pub struct ModbusTcpConnector {
    io_timeout: Duration,
}

impl ModbusTcpConnector {
    /// `io_timeout` bounds the TCP connect and each register read.
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

#[async_trait]
impl Connector for ModbusTcpConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn RegisterReader>, ConnectionError> {
        let address = endpoint.address;
        let ctx = timeout(
            self.io_timeout,
            tcp::connect_slave(address, Slave(endpoint.unit_id)),
        )
        .await
        .map_err(|_| ConnectionError::ConnectTimeout { address })?
        .map_err(|source| ConnectionError::Connect { address, source })?;
        Ok(Box::new(ModbusReader {
            ctx,
            io_timeout: self.io_timeout,
        }))
    }
}

struct ModbusReader {
    ctx: client::Context,
    io_timeout: Duration,
}

#[async_trait]
impl RegisterReader for ModbusReader {
    async fn read_registers(
        &mut self,
        register: u16,
        count: u16,
    ) -> Result<Vec<u16>, ConnectionError> {
        // tokio-modbus returns Result<Result<Vec<u16>, ExceptionCode>, Error>
        let response = timeout(self.io_timeout, self.ctx.read_input_registers(register, count))
            .await
            .map_err(|_| ConnectionError::Timeout { register })?;
        match response {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(exception)) => Err(ConnectionError::Exception {
                register,
                code: format!("{exception:?}"),
            }),
            Err(e) => Err(ConnectionError::Transport {
                register,
                message: e.to_string(),
            }),
        }
    }
}

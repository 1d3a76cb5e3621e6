//! Process-wide lookup of physical connections
//!
//! Every consumer that names the same `host:port` shares one
//! [`PhysicalConnection`], and with it one TCP session and one pair of task
//! queues.
//!
//! ```rust,no_run
//! use voltage_poller::{ConnectionRegistry, Consumer};
//!
//! # async fn example() -> voltage_poller::ModbusResult<()> {
//! let registry = ConnectionRegistry::new();
//! let id = "gw01-192.168.1.50:502:1-current";
//! let (device, mut sub) = registry.attach(Consumer::new(id, "current", "current"))?;
//! while let Some(notification) = sub.recv().await {
//!     println!("{} {}", device.sub_id(), notification.to_json());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::addressing::DeviceAddress;
use crate::config::ConnectionConfig;
use crate::connection::{Connector, PhysicalConnection, TcpConnector};
use crate::device::LogicalDevice;
use crate::error::{ModbusError, ModbusResult};
use crate::notify::{Consumer, Subscription};

/// Shared connections keyed by `(host, port)`
pub struct ConnectionRegistry<C: Connector = TcpConnector> {
    connector: Arc<C>,
    default_config: ConnectionConfig,
    connections: Mutex<HashMap<(String, u16), Arc<PhysicalConnection>>>,
}

impl ConnectionRegistry<TcpConnector> {
    pub fn new() -> Self {
        Self::with_connector(TcpConnector, ConnectionConfig::default())
    }
}

impl Default for ConnectionRegistry<TcpConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> ConnectionRegistry<C> {
    pub fn with_connector(connector: C, default_config: ConnectionConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            default_config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_config(&self) -> &ConnectionConfig {
        &self.default_config
    }

    /// Return the connection for `host:port`, creating it with the default config.
    pub fn get_or_create(&self, host: &str, port: u16) -> ModbusResult<Arc<PhysicalConnection>> {
        self.get_or_create_with(host, port, self.default_config.clone())
    }

    /// Return the connection for `host:port`, creating it with `config`.
    ///
    /// An existing connection keeps the config it was created with.
    pub fn get_or_create_with(
        &self,
        host: &str,
        port: u16,
        config: ConnectionConfig,
    ) -> ModbusResult<Arc<PhysicalConnection>> {
        let mut connections = self.connections.lock();
        let key = (host.to_string(), port);
        if let Some(existing) = connections.get(&key) {
            if existing.config() != &config {
                debug!("{}:{} already exists, keeping its original config", host, port);
            }
            return Ok(Arc::clone(existing));
        }

        let connection =
            PhysicalConnection::spawn(host, port, config, Arc::clone(&self.connector))?;
        connections.insert(key, Arc::clone(&connection));
        Ok(connection)
    }

    pub fn get(&self, host: &str, port: u16) -> Option<Arc<PhysicalConnection>> {
        self.connections
            .lock()
            .get(&(host.to_string(), port))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Resolve a consumer's id to its logical device and register the field.
    ///
    /// The field named at the end of the id must match `consumer.field`.
    pub fn attach(&self, consumer: Consumer) -> ModbusResult<(Arc<LogicalDevice>, Subscription)> {
        let address = DeviceAddress::parse(&consumer.id)?;
        if address.field != consumer.field {
            return Err(ModbusError::configuration(format!(
                "Device id '{}' names field '{}', consumer asks for '{}'",
                consumer.id, address.field, consumer.field
            )));
        }
        let connection = self.get_or_create(&address.host, address.port)?;
        let device = connection.sub_device(address.sub_id_or_base())?;
        let subscription = device.register_field(consumer)?;
        Ok((device, subscription))
    }

    /// Stop every poll scheduler and forget all connections.
    ///
    /// Workers exit once the last handle to their connection is dropped.
    pub fn shutdown(&self) {
        let connections: Vec<_> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.stop();
        }
    }
}

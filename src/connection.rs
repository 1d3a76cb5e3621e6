//! # Physical Connections
//!
//! One [`PhysicalConnection`] exists per `host:port`. It owns the logical
//! devices attached to the meter and a worker task that owns the Modbus session.
//!
//! ## Task Flow
//!
//! ```text
//! scheduler tick ──► read queue ──┐
//! read()         ──► read queue ──┼──► worker ──► client ──► meter
//! write()/command ─► write queue ─┘       │
//!                                         └──► LogicalDevice::on_read / caller
//! ```
//!
//! The worker runs exactly one transaction at a time, taking queued writes
//! before queued reads. Every transaction is bounded by the request timeout.
//!
//! ## Failure Handling
//!
//! | Error | Effect |
//! |-------|--------|
//! | Address | task fails, nothing sent, session kept |
//! | Decode / exception | task fails, session kept |
//! | Transport (incl. timeout) | task fails, queues drained with `Cancelled`, reconnect after backoff |
//!
//! While the backoff runs, newly arriving tasks fail with `NotConnected`.
//! Logical devices survive reconnects, so polling resumes by itself.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::client::{ModbusClient, ModbusTcpClient};
use crate::codec::check_block;
use crate::config::ConnectionConfig;
use crate::device::LogicalDevice;
use crate::error::{ModbusError, ModbusResult};
use crate::models::DeviceModel;
use crate::register::{AddressRange, RegisterClass};
use crate::transport::TransportStats;

// ============================================================================
// Connector
// ============================================================================

/// Opens a fresh Modbus session to a meter.
///
/// The worker calls this for the first connect and after every drop, so each
/// session starts from a clean client.
pub trait Connector: Send + Sync + 'static {
    type Client: ModbusClient + 'static;

    fn connect(
        &self,
        host: &str,
        port: u16,
        config: &ConnectionConfig,
    ) -> impl Future<Output = ModbusResult<Self::Client>> + Send;
}

/// Connects over TCP with [`ModbusTcpClient`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Client = ModbusTcpClient;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        config: &ConnectionConfig,
    ) -> ModbusResult<ModbusTcpClient> {
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                ModbusError::connection(format!("Could not resolve {}:{}", host, port))
            })?;

        ModbusTcpClient::connect(
            addr,
            config.connect_timeout(),
            config.request_timeout(),
            config.packet_logging,
        )
        .await
    }
}

// ============================================================================
// State and statistics
// ============================================================================

/// Session state broadcast to watchers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Per-connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connects: u64,
    pub connect_failures: u64,
    pub disconnects: u64,
    pub reconnects_scheduled: u64,
    pub reads_ok: u64,
    pub reads_failed: u64,
    pub writes_ok: u64,
    pub writes_failed: u64,
    pub tasks_cancelled: u64,
    /// Counters of the current session's transport
    pub transport: TransportStats,
}

#[derive(Debug)]
struct Link {
    state: watch::Sender<ConnectionState>,
    stats: Mutex<ConnectionStats>,
    queued_polls: Arc<AtomicUsize>,
}

impl Link {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Holds one place in the poll cycle until its read task is done.
#[derive(Debug)]
struct PollSlot(Arc<AtomicUsize>);

impl PollSlot {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for PollSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Tasks
// ============================================================================

enum ReadTarget {
    Device(Weak<LogicalDevice>),
    Caller(oneshot::Sender<ModbusResult<Vec<u16>>>),
}

struct ReadTask {
    range: AddressRange,
    target: ReadTarget,
    _slot: Option<PollSlot>,
}

impl ReadTask {
    fn complete(self, result: ModbusResult<Vec<u16>>) {
        match self.target {
            ReadTarget::Device(device) => {
                let Some(device) = device.upgrade() else {
                    return;
                };
                match &result {
                    Ok(registers) => device.on_read(self.range, registers),
                    Err(err) => device.on_read_error(self.range, err),
                }
            }
            ReadTarget::Caller(reply) => {
                let _ = reply.send(result);
            }
        }
    }
}

/// One register write inside a write task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteStep {
    pub address: u32,
    pub values: Vec<u16>,
}

impl WriteStep {
    pub fn new(address: u32, values: Vec<u16>) -> Self {
        Self { address, values }
    }
}

struct WriteTask {
    steps: Vec<WriteStep>,
    reply: oneshot::Sender<ModbusResult<()>>,
}

impl WriteTask {
    fn complete(self, result: ModbusResult<()>) {
        let _ = self.reply.send(result);
    }
}

// ============================================================================
// PhysicalConnection
// ============================================================================

/// A meter reachable at one `host:port`, shared by all of its logical devices
pub struct PhysicalConnection {
    host: String,
    port: u16,
    config: ConnectionConfig,
    this: Weak<PhysicalConnection>,
    children: Mutex<BTreeMap<u16, Arc<LogicalDevice>>>,
    link: Arc<Link>,
    read_tx: mpsc::UnboundedSender<ReadTask>,
    write_tx: mpsc::UnboundedSender<WriteTask>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PhysicalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalConnection")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

impl PhysicalConnection {
    /// Create the connection and spawn its worker, which starts connecting at once.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn<C: Connector>(
        host: impl Into<String>,
        port: u16,
        config: ConnectionConfig,
        connector: Arc<C>,
    ) -> ModbusResult<Arc<Self>> {
        config.validate()?;
        let host = host.into();

        let (read_tx, read_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let link = Arc::new(Link {
            state,
            stats: Mutex::new(ConnectionStats::default()),
            queued_polls: Arc::new(AtomicUsize::new(0)),
        });

        let worker = Worker {
            connector,
            host: host.clone(),
            port,
            config: config.clone(),
            link: Arc::clone(&link),
            read_rx,
            write_rx,
        };
        tokio::spawn(worker.run());

        Ok(Arc::new_cyclic(|this| Self {
            host,
            port,
            config,
            this: this.clone(),
            children: Mutex::new(BTreeMap::new()),
            link,
            read_tx,
            write_tx,
            scheduler: Mutex::new(None),
        }))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.state.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        *self.link.stats.lock()
    }

    // ===== Logical devices =====

    /// Get or create the logical device for `model`.
    ///
    /// Asking twice for the same sub-id returns the same device.
    pub fn device(&self, model: DeviceModel) -> ModbusResult<Arc<LogicalDevice>> {
        let mut children = self.children.lock();
        if let Some(existing) = children.get(&model.sub_id()) {
            if existing.model() != model {
                warn!(
                    "Sub-device {} on {} already exists as {:?}, ignoring {:?}",
                    model.sub_id(),
                    self.endpoint(),
                    existing.model(),
                    model
                );
            }
            return Ok(Arc::clone(existing));
        }

        let device = Arc::new(LogicalDevice::new(model, self.this.clone())?);
        debug!("Attached {} {} to {}", model.name(), model.sub_id(), self.endpoint());
        children.insert(model.sub_id(), Arc::clone(&device));
        Ok(device)
    }

    /// Get or create the sub-device using the configured meter family.
    pub fn sub_device(&self, sub_id: u16) -> ModbusResult<Arc<LogicalDevice>> {
        self.device(DeviceModel::for_sub_id(self.config.family, sub_id))
    }

    pub fn devices(&self) -> Vec<Arc<LogicalDevice>> {
        self.children.lock().values().cloned().collect()
    }

    // ===== Poll scheduler =====

    /// Start the poll scheduler. Calling it while it runs does nothing.
    pub fn start(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let this = self.this.clone();
        let period = self.config.poll_interval();
        info!("Polling {} every {:?}", self.endpoint(), period);
        *scheduler = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(connection) = this.upgrade() else {
                    break;
                };
                connection.poll_now();
            }
        }));
    }

    /// Stop the poll scheduler. Queued reads still run.
    pub fn stop(&self) {
        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
            info!("Stopped polling {}", self.endpoint());
        }
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Enqueue one read per range of every device that has registered fields.
    ///
    /// Skipped while disconnected or while the previous cycle is still queued.
    /// Returns the number of reads enqueued.
    pub fn poll_now(&self) -> usize {
        if !self.is_connected() {
            return 0;
        }
        let queued = self.link.queued_polls.load(Ordering::SeqCst);
        if queued > 0 {
            debug!("{}: {} reads still queued, skipping cycle", self.endpoint(), queued);
            return 0;
        }

        let mut enqueued = 0;
        for device in self.devices() {
            if !device.has_registered_fields() {
                continue;
            }
            for range in device.ranges() {
                let task = ReadTask {
                    range: *range,
                    target: ReadTarget::Device(Arc::downgrade(&device)),
                    _slot: Some(PollSlot::acquire(&self.link.queued_polls)),
                };
                if self.read_tx.send(task).is_err() {
                    return enqueued;
                }
                enqueued += 1;
            }
        }
        enqueued
    }

    // ===== Ad-hoc access =====

    fn ensure_connected(&self) -> ModbusResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ModbusError::NotConnected)
        }
    }

    /// Read a register range through the read queue.
    pub async fn read(&self, range: AddressRange) -> ModbusResult<Vec<u16>> {
        self.ensure_connected()?;
        let (reply, rx) = oneshot::channel();
        let task = ReadTask {
            range,
            target: ReadTarget::Caller(reply),
            _slot: None,
        };
        self.read_tx
            .send(task)
            .map_err(|_| ModbusError::NotConnected)?;
        rx.await
            .map_err(|_| ModbusError::cancelled("connection worker stopped"))?
    }

    /// Write holding registers starting at `address` as one write task.
    pub async fn write(&self, address: u32, values: &[u16]) -> ModbusResult<()> {
        self.submit_write(vec![WriteStep::new(address, values.to_vec())])
            .await
    }

    /// Run several writes back to back without other traffic in between.
    pub(crate) async fn submit_write(&self, steps: Vec<WriteStep>) -> ModbusResult<()> {
        self.ensure_connected()?;
        let (reply, rx) = oneshot::channel();
        self.write_tx
            .send(WriteTask { steps, reply })
            .map_err(|_| ModbusError::NotConnected)?;
        rx.await
            .map_err(|_| ModbusError::cancelled("connection worker stopped"))?
    }
}

impl Drop for PhysicalConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler.get_mut().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

enum TaskKind {
    Read,
    Write,
}

struct Worker<C: Connector> {
    connector: Arc<C>,
    host: String,
    port: u16,
    config: ConnectionConfig,
    link: Arc<Link>,
    read_rx: mpsc::UnboundedReceiver<ReadTask>,
    write_rx: mpsc::UnboundedReceiver<WriteTask>,
}

impl<C: Connector> Worker<C> {
    async fn run(mut self) {
        loop {
            self.link.set_state(ConnectionState::Connecting);
            let opened = self.open().await;
            let failure = match opened {
                Ok(mut client) => {
                    self.link.set_state(ConnectionState::Connected);
                    self.link.stats.lock().connects += 1;
                    info!("Connected to {}:{}", self.host, self.port);

                    let outcome = self.serve(&mut client).await;
                    if let Err(err) = client.close().await {
                        debug!("Closing {}:{}: {}", self.host, self.port, err);
                    }
                    match outcome {
                        Some(err) => {
                            self.link.stats.lock().disconnects += 1;
                            err
                        }
                        None => break,
                    }
                }
                Err(err) => {
                    self.link.stats.lock().connect_failures += 1;
                    err
                }
            };

            self.link.set_state(ConnectionState::Disconnected);
            self.link.stats.lock().reconnects_scheduled += 1;
            warn!(
                "Connection to {}:{} down ({}), reconnecting in {:?}",
                self.host,
                self.port,
                failure,
                self.config.reconnect_backoff()
            );
            self.cancel_pending(&failure);
            if !self.backoff().await {
                break;
            }
        }

        self.link.set_state(ConnectionState::Disconnected);
        debug!("Worker for {}:{} stopped", self.host, self.port);
    }

    async fn open(&self) -> ModbusResult<C::Client> {
        let connect = self.connector.connect(&self.host, self.port, &self.config);
        tokio::time::timeout(self.config.connect_timeout(), connect)
            .await
            .map_err(|_| {
                ModbusError::timeout(
                    format!("connect to {}:{}", self.host, self.port),
                    self.config.connect_timeout_ms,
                )
            })?
    }

    /// Run tasks until a transport error (returned) or until the owner is gone.
    async fn serve(&mut self, client: &mut C::Client) -> Option<ModbusError> {
        loop {
            let failure = tokio::select! {
                biased;
                task = self.write_rx.recv() => match task {
                    Some(task) => self.run_write(client, task).await,
                    None => return None,
                },
                task = self.read_rx.recv() => match task {
                    Some(task) => self.run_read(client, task).await,
                    None => return None,
                },
            };
            self.link.stats.lock().transport = client.get_stats();
            if failure.is_some() {
                return failure;
            }
        }
    }

    async fn run_read(&self, client: &mut C::Client, task: ReadTask) -> Option<ModbusError> {
        let result = self.read_range(client, task.range).await;
        let failure = self.account(TaskKind::Read, &task.range.to_string(), &result);
        task.complete(result);
        failure
    }

    async fn run_write(&self, client: &mut C::Client, task: WriteTask) -> Option<ModbusError> {
        let mut result = Ok(());
        for step in &task.steps {
            result = self.write_step(client, step).await;
            if result.is_err() {
                break;
            }
        }
        let target = task
            .steps
            .first()
            .map(|step| step.address.to_string())
            .unwrap_or_default();
        let failure = self.account(TaskKind::Write, &target, &result);
        task.complete(result);
        failure
    }

    async fn read_range(
        &self,
        client: &mut C::Client,
        range: AddressRange,
    ) -> ModbusResult<Vec<u16>> {
        let (class, offset) = range.resolve()?;
        let unit = self.config.unit_id;
        let request = async {
            match class {
                RegisterClass::Input => client.read_04(unit, offset, range.count).await,
                RegisterClass::Holding => client.read_03(unit, offset, range.count).await,
            }
        };
        let registers = tokio::time::timeout(self.config.request_timeout(), request)
            .await
            .map_err(|_| {
                ModbusError::timeout(format!("read {}", range), self.config.request_timeout_ms)
            })??;
        check_block(&registers, range.count)?;
        Ok(registers)
    }

    async fn write_step(&self, client: &mut C::Client, step: &WriteStep) -> ModbusResult<()> {
        let Some(count) = u32::try_from(step.values.len()).ok().filter(|n| *n > 0) else {
            return Err(ModbusError::address(step.address, "empty write"));
        };
        let (class, offset) = RegisterClass::resolve(step.address)?;
        let (last_class, _) = RegisterClass::resolve(step.address + count - 1)?;
        if class != RegisterClass::Holding || last_class != RegisterClass::Holding {
            return Err(ModbusError::address(
                step.address,
                "writes must target holding registers (4xxxx)",
            ));
        }

        let unit = self.config.unit_id;
        let request = async {
            match step.values.as_slice() {
                [value] => client.write_06(unit, offset, *value).await,
                values => client.write_10(unit, offset, values).await,
            }
        };
        tokio::time::timeout(self.config.request_timeout(), request)
            .await
            .map_err(|_| {
                ModbusError::timeout(
                    format!("write {}", step.address),
                    self.config.request_timeout_ms,
                )
            })?
    }

    /// Update counters, log the outcome and return the error if it is fatal to the session.
    fn account<T>(
        &self,
        kind: TaskKind,
        target: &str,
        result: &ModbusResult<T>,
    ) -> Option<ModbusError> {
        let mut guard = self.link.stats.lock();
        let stats = &mut *guard;
        let (ok, failed, op) = match kind {
            TaskKind::Read => (&mut stats.reads_ok, &mut stats.reads_failed, "read"),
            TaskKind::Write => (&mut stats.writes_ok, &mut stats.writes_failed, "write"),
        };
        let err = match result {
            Ok(_) => {
                *ok += 1;
                debug!("{}:{} {} {} ok", self.host, self.port, op, target);
                return None;
            }
            Err(err) => {
                *failed += 1;
                err
            }
        };

        match err {
            ModbusError::Address { .. } => {
                error!("{}:{} {} {}: {}", self.host, self.port, op, target, err)
            }
            err if err.is_transport() => {
                warn!("{}:{} {} {}: {}", self.host, self.port, op, target, err)
            }
            err => debug!("{}:{} {} {}: {}", self.host, self.port, op, target, err),
        }
        err.is_transport().then(|| err.clone())
    }

    /// Fail everything still queued from the dropped session.
    fn cancel_pending(&mut self, reason: &ModbusError) {
        let mut cancelled = 0;
        while let Ok(task) = self.write_rx.try_recv() {
            task.complete(Err(ModbusError::cancelled(reason.to_string())));
            cancelled += 1;
        }
        while let Ok(task) = self.read_rx.try_recv() {
            task.complete(Err(ModbusError::cancelled(reason.to_string())));
            cancelled += 1;
        }
        if cancelled > 0 {
            debug!("{}:{} cancelled {} queued tasks", self.host, self.port, cancelled);
            self.link.stats.lock().tasks_cancelled += cancelled;
        }
    }

    /// Wait out the reconnect backoff, failing tasks that arrive meanwhile.
    ///
    /// Returns `false` when the owning connection is gone.
    async fn backoff(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.config.reconnect_backoff());
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = &mut sleep => return true,
                task = self.write_rx.recv() => match task {
                    Some(task) => task.complete(Err(ModbusError::NotConnected)),
                    None => return false,
                },
                task = self.read_rx.recv() => match task {
                    Some(task) => task.complete(Err(ModbusError::NotConnected)),
                    None => return false,
                },
            }
        }
    }
}

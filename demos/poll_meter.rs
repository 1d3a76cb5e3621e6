//! Feeder Polling Example
//!
//! Subscribes to the leakage currents of a GEMS3512 feeder and prints every
//! batch the engine releases, plus an ad-hoc read of the raw block.
//!
//! # Register Map (GEMS3512 feeder 1)
//!
//! | Address | Type | Field |
//! |---------|------|-------|
//! | 32420 | u16 enum | type |
//! | 32423 | u32 /10 | leakageCurrent (mA) |
//! | 32434 | u16 /10 | lGCLeakageCurrent (mA) |
//! | 32435 | u16 /10 | lGRLeakageCurrent (mA) |
//!
//! # Running this example
//!
//! ```bash
//! cargo run --example poll_meter -- 192.168.1.50 502
//! ```

use std::time::Duration;

use voltage_poller::{
    AddressRange, ConnectionConfig, ConnectionRegistry, ConnectionState, Consumer, EmitPolicy,
    EventKind, MeterFamily, ModbusResult, TcpConnector,
};

#[tokio::main]
async fn main() -> ModbusResult<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = std::env::args()
        .nth(2)
        .and_then(|p| p.parse().ok())
        .unwrap_or(voltage_poller::DEFAULT_TCP_PORT);

    let config = ConnectionConfig::slow()
        .with_family(MeterFamily::Gems3512)
        .with_packet_logging(false);
    let registry = ConnectionRegistry::with_connector(TcpConnector, config);

    let id = format!("example-{}:{}:1-leakageCurrent", host, port);
    // Release on every 0.5 mA move, or after 3 quiet samples
    let consumer =
        Consumer::new(id, "leakageCurrent", "current").with_emit(EmitPolicy::batched(0.5, 3));
    let (device, mut updates) = registry.attach(consumer)?;

    let connection = registry.get_or_create(&host, port)?;
    let mut state = connection.subscribe_state();
    println!("Waiting for {}...", connection.endpoint());
    let wait = tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Connected),
    );
    if !matches!(wait.await, Ok(Ok(_))) {
        println!("Meter not reachable, giving up");
        return Ok(());
    }

    let raw = connection.read(device.ranges()[0]).await?;
    println!("Raw block {}: {:04X?}", device.ranges()[0], &raw[..16.min(raw.len())]);

    let type_block = connection.read(AddressRange::new(32420, 1)).await?;
    println!("Wiring type code: {:?}", type_block.first());

    for _ in 0..5 {
        match updates.recv().await {
            Some(notification) if notification.event == EventKind::ChangeArray => {
                println!("batch: {}", notification.to_json()["values"]);
            }
            Some(notification) => {
                println!("{}: {}", notification.event.as_str(), notification.to_json())
            }
            None => break,
        }
    }

    let stats = connection.stats();
    println!(
        "reads ok {}, failed {}, bytes in {}",
        stats.reads_ok, stats.reads_failed, stats.transport.bytes_received
    );
    registry.shutdown();
    Ok(())
}

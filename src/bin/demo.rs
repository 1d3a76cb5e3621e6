//! Voltage Poller Demo
//!
//! Shows the decoding pipeline offline, then polls a live meter if one is
//! reachable:
//! - Register tables of the supported meter models
//! - Wire decoding and unit conversion
//! - Emit policies (always / on change / batched)
//! - Shared-connection polling through the registry
//!
//! Usage: cargo run --bin demo [host:port] [seconds]
//! Example: RUST_LOG=voltage_poller=debug cargo run --bin demo 192.168.1.50:502 30

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use voltage_poller::codec::decode_field;
use voltage_poller::{
    ConnectionConfig, ConnectionRegistry, ConnectionState, Consumer, DeviceModel, EmitPolicy,
    EmitTracker, FieldValue, MeterFamily, Sample, TcpConnector,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("Voltage Poller v{} Demo", voltage_poller::VERSION);
    println!("===========================\n");

    // =========================================================================
    // Part 1: Register tables
    // =========================================================================
    println!("Part 1: Register Tables");
    println!("-----------------------");

    for model in [
        DeviceModel::Base,
        DeviceModel::Feeder(1),
        DeviceModel::CompactFeeder(1),
        DeviceModel::Direct,
    ] {
        let table = model.table()?;
        let ranges: Vec<String> = table.ranges.iter().map(|r| r.to_string()).collect();
        println!(
            "  {:<15} sub-id {}  ranges [{}]  {} fields",
            model.name(),
            model.sub_id(),
            ranges.join(", "),
            table.fields.len()
        );
    }

    // =========================================================================
    // Part 2: Decoding a captured block
    // =========================================================================
    println!("\nPart 2: Decoding");
    println!("----------------");

    let table = DeviceModel::Feeder(1).table()?;
    let mut block = vec![0u16; 40];
    block[0] = 5; // 3P4W
    block[2] = 0x0000;
    block[3] = 0x30D4; // 125.00 A
    block[4] = 0xFFFF;
    block[5] = 0xFF38; // -2.00 kW
    for name in ["type", "current", "power"] {
        if let Some(index) = table.field_index(name) {
            let spec = &table.fields[index];
            let offset = (spec.address - table.ranges[0].start) as usize;
            let value = decode_field(&block, offset, spec.wire, spec.converter);
            println!("  {:<8} @{} -> {}", name, spec.address, value);
        }
    }

    // =========================================================================
    // Part 3: Emit policies
    // =========================================================================
    println!("\nPart 3: Emit Policies");
    println!("---------------------");

    let readings = [10.0, 10.2, 10.4, 11.5, 11.6, 11.7, 11.8, 11.9, 12.0];
    for policy in [
        EmitPolicy::Always,
        EmitPolicy::on_change(1.0),
        EmitPolicy::batched(1.0, 4),
    ] {
        let mut tracker = EmitTracker::new();
        let released = readings
            .iter()
            .filter(|v| {
                tracker
                    .record(&policy, &Sample::now(FieldValue::Number(**v)))
                    .is_some()
            })
            .count();
        println!(
            "  {:<55} {} of {} readings released",
            format!("{:?}", policy),
            released,
            readings.len()
        );
    }

    // =========================================================================
    // Part 4: Live polling (requires a meter)
    // =========================================================================
    println!("\nPart 4: Live Polling");
    println!("--------------------");

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:502".to_string());
    let seconds: u64 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let config = ConnectionConfig::new()
        .with_family(MeterFamily::Gems35xx)
        .with_reconnect_backoff_ms(5_000);
    let registry = ConnectionRegistry::with_connector(TcpConnector, config);

    let mut subscriptions = Vec::new();
    for (sub_id, field, data_type) in [
        (None, "V1", "voltage"),
        (None, "frequency", "frequency"),
        (Some(1), "current", "current"),
    ] {
        let id = match sub_id {
            Some(n) => format!("demo-{}:{}-{}", endpoint, n, field),
            None => format!("demo-{}-{}", endpoint, field),
        };
        let (_device, subscription) = registry.attach(Consumer::new(id, field, data_type))?;
        subscriptions.push(subscription);
    }

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let mut received = 0usize;
    loop {
        let next = async {
            for subscription in subscriptions.iter_mut() {
                if let Some(notification) = subscription.try_recv() {
                    return Some(notification);
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            None
        };
        tokio::select! {
            _ = &mut deadline => break,
            notification = next => {
                if let Some(notification) = notification {
                    received += 1;
                    println!("  {} {}", notification.event.as_str(), notification.to_json());
                }
            }
        }
    }

    if let Some((host, port)) = endpoint.rsplit_once(':') {
        let port: u16 = port.parse()?;
        if let Some(connection) = registry.get(host, port) {
            let stats = connection.stats();
            println!(
                "\n  state {:?}, connects {}, reads ok/failed {}/{}, reconnects {}",
                connection.state(),
                stats.connects,
                stats.reads_ok,
                stats.reads_failed,
                stats.reconnects_scheduled
            );
            if connection.state() != ConnectionState::Connected && received == 0 {
                println!("  (No meter reachable at {})", endpoint);
            }
        }
    }

    registry.shutdown();
    println!("\nDemo completed.");
    Ok(())
}

//! End-to-end tests against a loopback Modbus TCP responder.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use voltage_poller::{
    ConnectionConfig, ConnectionRegistry, ConnectionState, Consumer, ModbusClient, ModbusError,
    ModbusTcpClient, Status, TcpConnector,
};

type Registers = Arc<Mutex<HashMap<u32, u16>>>;

/// Highest protocol offset the responder serves
const SERVED_SPAN: u32 = 200;

fn respond(pdu: &[u8], registers: &Registers) -> Vec<u8> {
    let function = pdu[0];
    let exception = |code: u8| vec![function | 0x80, code];
    if pdu.len() < 5 {
        return exception(0x03);
    }
    let address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let second = u16::from_be_bytes([pdu[3], pdu[4]]);

    match function {
        0x03 | 0x04 => {
            if u32::from(address) + u32::from(second) > SERVED_SPAN {
                return exception(0x02);
            }
            let base = if function == 0x04 { 30000 } else { 40000 };
            let registers = registers.lock();
            let mut reply = vec![function, (second * 2) as u8];
            for i in 0..u32::from(second) {
                let value = registers
                    .get(&(base + u32::from(address) + i))
                    .copied()
                    .unwrap_or(0);
                reply.extend_from_slice(&value.to_be_bytes());
            }
            reply
        }
        0x06 => {
            registers.lock().insert(40000 + u32::from(address), second);
            pdu.to_vec()
        }
        0x10 => {
            let mut registers = registers.lock();
            for i in 0..usize::from(second) {
                let value = u16::from_be_bytes([pdu[6 + 2 * i], pdu[7 + 2 * i]]);
                registers.insert(40000 + u32::from(address) + i as u32, value);
            }
            pdu[..5].to_vec()
        }
        _ => exception(0x01),
    }
}

async fn handle(mut stream: TcpStream, registers: Registers) {
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        if stream.read_exact(&mut pdu).await.is_err() {
            return;
        }

        let reply = respond(&pdu, &registers);
        let mut frame = header[..4].to_vec();
        frame.extend_from_slice(&((reply.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&reply);
        if stream.write_all(&frame).await.is_err() {
            return;
        }
    }
}

struct Responder {
    addr: SocketAddr,
    registers: Registers,
}

async fn start_responder() -> Responder {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registers = Registers::default();

    let shared = Arc::clone(&registers);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle(stream, Arc::clone(&shared)));
        }
    });
    Responder { addr, registers }
}

async fn client(responder: &Responder) -> ModbusTcpClient {
    ModbusTcpClient::new(responder.addr, Duration::from_secs(1))
        .await
        .unwrap()
}

// ============================================================================
// Client over TCP
// ============================================================================

#[tokio::test]
async fn test_read_input_registers() {
    let responder = start_responder().await;
    responder.registers.lock().insert(30002, 6000);

    let mut client = client(&responder).await;
    let values = client.read_04(1, 0, 4).await.unwrap();
    assert_eq!(values, vec![0, 0, 6000, 0]);

    let stats = client.get_stats();
    assert_eq!(stats.requests_sent, 1);
    assert_eq!(stats.responses_received, 1);
    // MBAP (7) + FC + byte count + 4 registers
    assert_eq!(stats.bytes_received, 7 + 2 + 8);
}

#[tokio::test]
async fn test_exception_keeps_session_open() {
    let responder = start_responder().await;
    let mut client = client(&responder).await;

    let err = client.read_04(1, 150, 100).await.unwrap_err();
    assert!(matches!(
        err,
        ModbusError::Exception {
            function: 0x04,
            code: 0x02
        }
    ));
    assert!(!err.is_transport());
    assert!(client.is_connected());

    assert_eq!(client.read_04(1, 0, 1).await.unwrap(), vec![0]);
}

#[tokio::test]
async fn test_writes_round_trip_through_holding_registers() {
    let responder = start_responder().await;
    let mut client = client(&responder).await;

    client.write_10(1, 101, &[0x0000, 0x1234]).await.unwrap();
    client.write_06(1, 5, 42).await.unwrap();

    assert_eq!(client.read_03(1, 101, 2).await.unwrap(), vec![0x0000, 0x1234]);
    assert_eq!(client.read_holding_registers(1, 5, 1).await.unwrap(), vec![42]);
    assert_eq!(responder.registers.lock().get(&40102), Some(&0x1234));
}

// ============================================================================
// Full polling path
// ============================================================================

fn fast_config() -> ConnectionConfig {
    ConnectionConfig::new()
        .with_poll_interval_ms(50)
        .with_reconnect_backoff_ms(100)
        .with_request_timeout_ms(1_000)
        .with_packet_logging(true)
}

#[tokio::test]
async fn test_registry_polls_real_socket() {
    let responder = start_responder().await;
    responder.registers.lock().insert(30001, 253);

    let registry = ConnectionRegistry::with_connector(TcpConnector, fast_config());
    let id = format!("gw1-127.0.0.1:{}-temperature", responder.addr.port());
    let (_device, mut sub) = registry
        .attach(Consumer::new(id.clone(), "temperature", "temperature"))
        .unwrap();

    let notification = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .unwrap()
        .unwrap();
    let json = notification.to_json();
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["result"]["temperature"], 25.3);

    let connection = registry.get("127.0.0.1", responder.addr.port()).unwrap();
    let stats = connection.stats();
    assert!(stats.reads_ok >= 1);
    assert!(stats.transport.requests_sent >= 1);
    registry.shutdown();
}

#[tokio::test]
async fn test_unreachable_meter_reports_disconnected() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let registry = ConnectionRegistry::with_connector(TcpConnector, fast_config());
    let id = format!("gw1-127.0.0.1:{}-V1", addr.port());
    let (_device, _sub) = registry.attach(Consumer::new(id, "V1", "voltage")).unwrap();

    let connection = registry.get("127.0.0.1", addr.port()).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = connection.stats();
    assert!(stats.connect_failures >= 1);
    assert_eq!(stats.connects, 0);
    assert_ne!(connection.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_demand_reset_over_tcp() {
    let responder = start_responder().await;
    let registry = ConnectionRegistry::with_connector(TcpConnector, fast_config());
    let id = format!("gw1-127.0.0.1:{}-demandReset", responder.addr.port());
    let (base, mut sub) = registry
        .attach(Consumer::new(id, "demandReset", "powerSwitch"))
        .unwrap();

    let connection = registry.get("127.0.0.1", responder.addr.port()).unwrap();
    let mut state = connection.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    base.command("demandReset", None).await.unwrap();
    assert_eq!(sub.recv().await.unwrap().status(), Status::On);

    // Pulse is cleared again by the second step
    let registers = responder.registers.lock();
    assert_eq!(registers.get(&40101), Some(&0));
    assert_eq!(registers.get(&40102), Some(&0));
}

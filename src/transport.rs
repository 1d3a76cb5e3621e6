//! Modbus TCP transport
//!
//! A transport moves one request/response pair at a time. Modbus TCP has no
//! way to pipeline, so callers must never share a transport between
//! concurrent tasks; the connection worker owns it exclusively.
//!
//! # MBAP frame
//!
//! | Field | Size | Notes |
//! |-------|------|-------|
//! | Transaction ID | 2 | echoed by the server, checked on receive |
//! | Protocol ID | 2 | always 0 |
//! | Length | 2 | unit id + PDU |
//! | Unit ID | 1 | |
//! | PDU | n | function code + data |

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{ModbusRequest, ModbusResponse};

/// Counters kept by every transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// One request in flight at a time over some byte stream.
pub trait ModbusTransport: Send + Sync {
    fn request(
        &mut self,
        request: &ModbusRequest,
    ) -> impl Future<Output = ModbusResult<ModbusResponse>> + Send;

    fn is_connected(&self) -> bool;

    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    fn get_stats(&self) -> TransportStats;
}

/// Modbus TCP transport over a tokio socket
#[derive(Debug)]
pub struct TcpTransport {
    pub address: SocketAddr,
    stream: Option<TcpStream>,
    timeout: Duration,
    transaction_id: u16,
    stats: TransportStats,
    packet_logger: Option<CallbackLogger>,
}

impl TcpTransport {
    /// Connect, giving up after `timeout`. The same timeout bounds every request.
    pub async fn new(address: SocketAddr, timeout: Duration) -> ModbusResult<Self> {
        Self::connect(address, timeout, timeout).await
    }

    pub async fn connect(
        address: SocketAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> ModbusResult<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                ModbusError::timeout(
                    format!("connect to {}", address),
                    connect_timeout.as_millis() as u64,
                )
            })??;
        stream.set_nodelay(true)?;
        debug!("TCP connected to {}", address);

        Ok(Self {
            address,
            stream: Some(stream),
            timeout: request_timeout,
            transaction_id: 0,
            stats: TransportStats::default(),
            packet_logger: None,
        })
    }

    /// Trace every raw frame in hex.
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logger = enabled.then(CallbackLogger::default);
    }

    pub fn packet_logging(&self) -> bool {
        self.packet_logger.is_some()
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    fn encode_frame(&mut self, request: &ModbusRequest) -> ModbusResult<(u16, BytesMut)> {
        let tid = self.next_transaction_id();
        let mut pdu = BytesMut::with_capacity(16 + request.data.len());
        request.encode_pdu(&mut pdu)?;

        let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
        frame.put_u16(tid);
        frame.put_u16(0);
        frame.put_u16((pdu.len() + 1) as u16);
        frame.put_u8(request.slave_id);
        frame.extend_from_slice(&pdu);
        Ok((tid, frame))
    }

    async fn exchange(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        let (tid, frame) = self.encode_frame(request)?;
        if let Some(logger) = &self.packet_logger {
            logger.log_packet("TX", &frame);
        }

        let stream = self.stream.as_mut().ok_or(ModbusError::NotConnected)?;
        stream.write_all(&frame).await?;
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        let mut header = [0u8; MBAP_HEADER_LEN + 1];
        stream.read_exact(&mut header).await?;

        let rx_tid = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let unit_id = header[6];

        if protocol_id != 0 {
            return Err(ModbusError::frame(format!(
                "Unexpected protocol id {}",
                protocol_id
            )));
        }
        if length < 2 || length > MAX_MBAP_LENGTH {
            return Err(ModbusError::frame(format!("Invalid MBAP length {}", length)));
        }

        let mut pdu = vec![0u8; length - 1];
        stream.read_exact(&mut pdu).await?;
        self.stats.bytes_received += (header.len() + pdu.len()) as u64;

        if let Some(logger) = &self.packet_logger {
            let mut raw = header.to_vec();
            raw.extend_from_slice(&pdu);
            logger.log_packet("RX", &raw);
        }

        if rx_tid != tid {
            return Err(ModbusError::frame(format!(
                "Transaction id mismatch: sent {}, got {}",
                tid, rx_tid
            )));
        }

        self.stats.responses_received += 1;
        ModbusResponse::from_pdu(unit_id, &pdu)
    }
}

impl ModbusTransport for TcpTransport {
    async fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        let timeout = self.timeout;
        let result = match tokio::time::timeout(timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => {
                self.stats.timeouts += 1;
                Err(ModbusError::timeout(
                    format!("{} at {}", request.function.description(), request.address),
                    timeout.as_millis() as u64,
                ))
            }
        };

        if let Err(err) = &result {
            self.stats.errors += 1;
            if err.is_transport() {
                warn!("TCP transport to {} failed: {}", self.address, err);
                self.stream = None;
            }
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            debug!("TCP connection to {} closed", self.address);
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats
    }
}

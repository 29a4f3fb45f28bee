use std::{
    fmt,
    io::{Read, Write},
    sync::Arc,
};

use bytes::Buf;
use rustls::{
    ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection,
    pki_types::ServerName,
};
use sealport_transport::{
    EngineError, EngineResult, ErrorCategory, HandshakeStatus, MAX_PLAINTEXT_FRAGMENT,
    OperationKind, OperationStatus, SecurityClass, SessionBuffer, SessionBufferSizes,
    SessionEngine, engine::DelegatedTask,
};
use tracing::trace;

use crate::error::{map_io_error, map_rustls_error};

const RECORD_HEADER_LEN: usize = 5;
/// 加密记录体的上限：明文分片加上 AEAD 扩展余量。
const MAX_RECORD_BODY: usize = MAX_PLAINTEXT_FRAGMENT + 2048;

/// 返回不在握手后下发 TLS 1.3 会话票据的服务端配置；已关闭时原样返回。
///
/// 票据记录在握手完成后直接写往套接字，不带长度前缀，对端解帧器会把记录头误读为帧长。
pub(crate) fn without_session_tickets(config: Arc<ServerConfig>) -> Arc<ServerConfig> {
    if config.send_tls13_tickets == 0 {
        return config;
    }
    let mut owned = ServerConfig::clone(&config);
    owned.send_tls13_tickets = 0;
    Arc::new(owned)
}

/// rustls 会话的默认缓冲区尺寸。
pub const DEFAULT_BUFFER_SIZES: SessionBufferSizes = SessionBufferSizes {
    application: MAX_RECORD_BODY,
    packet: RECORD_HEADER_LEN + MAX_RECORD_BODY,
};

/// 以 `rustls` 连接实现 [`SessionEngine`]。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 握手驱动器按“包装/解包”的节奏推进会话，而 rustls 暴露的是 `read_tls`/`write_tls`
///   与 `process_new_packets`；本适配器把两者对齐。
///
/// ## 逻辑（How）
/// - 状态推导：待发送密文 → `NeedWrap`；仍在握手 → `NeedUnwrap`；否则 `NotHandshaking`，
///   握手完成后的第一次操作结果报告一次 `Finished`；
/// - `unwrap` 按 TLS 记录头（第 3、4 字节为大端长度）判断记录完整性，每次只喂入一条记录，
///   保证未消费的字节留在调用方缓冲区内；
/// - `wrap` 在握手完成后才接受明文，随后把 rustls 排队的密文写入目标缓冲区。
///
/// ## 契约（What）
/// - 不产生委托任务，`delegated_task` 恒为 `None`；
/// - `close_inbound` 在未收到对端 `close_notify` 时返回完整性错误（截断攻击的信号）。
pub struct RustlsEngine {
    conn: Connection,
    sizes: SessionBufferSizes,
    inbound_closed: bool,
    outbound_closed: bool,
    peer_closed: bool,
    completion_reported: bool,
}

impl RustlsEngine {
    /// 创建客户端会话。
    pub fn client(
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Result<Self, EngineError> {
        let conn = ClientConnection::new(config, server_name)
            .map_err(|err| map_rustls_error(OperationKind::HANDSHAKE, err))?;
        Ok(Self::from_connection(conn))
    }

    /// 创建服务端会话。
    ///
    /// 分帧通道上不允许出现未分帧的握手后记录，因此配置中的 TLS 1.3 会话票据会被关闭。
    pub fn server(config: Arc<ServerConfig>) -> Result<Self, EngineError> {
        let conn = ServerConnection::new(without_session_tickets(config))
            .map_err(|err| map_rustls_error(OperationKind::HANDSHAKE, err))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: impl Into<Connection>) -> Self {
        Self {
            conn: conn.into(),
            sizes: DEFAULT_BUFFER_SIZES,
            inbound_closed: false,
            outbound_closed: false,
            peer_closed: false,
            completion_reported: false,
        }
    }

    /// 覆盖上报给驱动器的初始缓冲区尺寸；过小的尺寸会在握手过程中按倍增策略扩容。
    pub fn with_buffer_sizes(mut self, sizes: SessionBufferSizes) -> Self {
        self.sizes = sizes;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn current_status(&self) -> HandshakeStatus {
        if self.conn.wants_write() {
            HandshakeStatus::NeedWrap
        } else if self.conn.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else {
            HandshakeStatus::NotHandshaking
        }
    }

    fn status_after_operation(&mut self) -> HandshakeStatus {
        let status = self.current_status();
        if status == HandshakeStatus::NotHandshaking
            && !self.completion_reported
            && !self.inbound_closed
            && !self.outbound_closed
        {
            self.completion_reported = true;
            trace!("rustls session established");
            return HandshakeStatus::Finished;
        }
        status
    }
}

impl fmt::Debug for RustlsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustlsEngine")
            .field("handshaking", &self.conn.is_handshaking())
            .field("sizes", &self.sizes)
            .field("inbound_closed", &self.inbound_closed)
            .field("outbound_closed", &self.outbound_closed)
            .field("peer_closed", &self.peer_closed)
            .finish_non_exhaustive()
    }
}

impl SessionEngine for RustlsEngine {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        // rustls 在构造连接时已排队首个握手消息。
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        self.current_status()
    }

    fn wrap(
        &mut self,
        src: &mut dyn Buf,
        dst: &mut SessionBuffer,
    ) -> Result<EngineResult, EngineError> {
        let mut consumed = 0;
        if !self.outbound_closed && !self.conn.is_handshaking() {
            while src.has_remaining() {
                let written = self
                    .conn
                    .writer()
                    .write(src.chunk())
                    .map_err(|err| map_io_error(OperationKind::WRAP, err))?;
                if written == 0 {
                    break;
                }
                src.advance(written);
                consumed += written;
            }
        }

        let mut produced = 0;
        while self.conn.wants_write() {
            if dst.is_full() {
                return Ok(EngineResult::new(
                    OperationStatus::BufferOverflow,
                    self.current_status(),
                    consumed,
                    produced,
                ));
            }
            let written = self
                .conn
                .write_tls(dst)
                .map_err(|err| map_io_error(OperationKind::WRAP, err))?;
            if written == 0 {
                break;
            }
            produced += written;
        }

        let status = if self.outbound_closed {
            OperationStatus::Closed
        } else {
            OperationStatus::Ok
        };
        Ok(EngineResult::new(
            status,
            self.status_after_operation(),
            consumed,
            produced,
        ))
    }

    fn unwrap(
        &mut self,
        src: &mut SessionBuffer,
        dst: &mut SessionBuffer,
    ) -> Result<EngineResult, EngineError> {
        if self.peer_closed || self.inbound_closed {
            return Ok(EngineResult::idle(
                OperationStatus::Closed,
                self.current_status(),
            ));
        }
        let record_len = match record_length(src.as_slice()) {
            Some(len) if len <= src.len() => len,
            _ => {
                return Ok(EngineResult::idle(
                    OperationStatus::BufferUnderflow,
                    self.current_status(),
                ));
            }
        };
        if dst.remaining_mut() < record_len - RECORD_HEADER_LEN {
            return Ok(EngineResult::idle(
                OperationStatus::BufferOverflow,
                self.current_status(),
            ));
        }

        let mut record = &src.as_slice()[..record_len];
        while !record.is_empty() {
            let read = self
                .conn
                .read_tls(&mut record)
                .map_err(|err| map_io_error(OperationKind::UNWRAP, err))?;
            if read == 0 {
                break;
            }
        }
        src.advance(record_len);

        let state = self
            .conn
            .process_new_packets()
            .map_err(|err| map_rustls_error(OperationKind::UNWRAP, err))?;
        let mut pending = state.plaintext_bytes_to_read();
        let mut produced = 0;
        while pending > 0 {
            let read = dst
                .fill_with(|spare| self.conn.reader().read(spare))
                .map_err(|err| map_io_error(OperationKind::UNWRAP, err))?;
            if read == 0 {
                break;
            }
            produced += read;
            pending = pending.saturating_sub(read);
        }

        let status = if state.peer_has_closed() {
            self.peer_closed = true;
            OperationStatus::Closed
        } else {
            OperationStatus::Ok
        };
        Ok(EngineResult::new(
            status,
            self.status_after_operation(),
            record_len,
            produced,
        ))
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        None
    }

    fn close_inbound(&mut self) -> Result<(), EngineError> {
        self.inbound_closed = true;
        if self.peer_closed {
            return Ok(());
        }
        Err(
            EngineError::new(
                OperationKind::HANDSHAKE,
                "inbound closed before receiving close_notify",
            )
            .with_category(ErrorCategory::Security(SecurityClass::Integrity)),
        )
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.conn.send_close_notify();
            self.outbound_closed = true;
        }
    }

    fn is_inbound_done(&self) -> bool {
        self.inbound_closed || self.peer_closed
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_closed && !self.conn.wants_write()
    }

    fn buffer_sizes(&self) -> SessionBufferSizes {
        self.sizes
    }
}

/// 读取 TLS 记录头，返回整条记录（含头部）的长度。
fn record_length(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < RECORD_HEADER_LEN {
        return None;
    }
    let body = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
    Some(RECORD_HEADER_LEN + body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_length_reads_big_endian_body_size() {
        assert_eq!(record_length(&[0x17, 0x03, 0x03, 0x00, 0x20]), Some(37));
        assert_eq!(record_length(&[0x16, 0x03, 0x01, 0x01, 0x00, 0xaa]), Some(261));
        assert_eq!(record_length(&[0x16, 0x03, 0x01, 0x01]), None);
    }

    #[test]
    fn default_sizes_cover_a_full_record() {
        assert!(DEFAULT_BUFFER_SIZES.application >= MAX_PLAINTEXT_FRAGMENT);
        assert_eq!(
            DEFAULT_BUFFER_SIZES.packet,
            DEFAULT_BUFFER_SIZES.application + RECORD_HEADER_LEN
        );
    }
}

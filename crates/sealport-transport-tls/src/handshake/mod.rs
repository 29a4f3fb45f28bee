//! 握手驱动器。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 会话引擎只负责协议状态机，真正的字节搬运（读套接字、写套接字、等待就绪）由驱动器完成；
//! - 阻塞与非阻塞两种驱动器共享同一套状态推进逻辑，差异仅在 I/O 策略与截止时间。
//!
//! ## 逻辑（How）
//! - [`HandshakeCore`] 持有三个缓冲区（明文、入站密文、出站密文）与引擎，按
//!   `NeedUnwrap`/`NeedWrap`/`NeedTask` 推进，直到 `Finished` 或 `NotHandshaking`；
//! - [`HandshakeIo`] 抽象“读一次”“写空出站缓冲”“检查截止时间”三件事；
//! - 入站缓冲只在为空或上一次解包欠载时才读取套接字，已缓冲的完整记录优先处理。
//!
//! ## 契约（What）
//! - 成功返回 `Ok(true)`；对端在握手期间关闭返回 `Ok(false)`；其余故障返回错误；
//! - 读到流结束后进入关闭路径，此时对端已彻底消失导致的写失败（`EPIPE`/`ECONNRESET`）
//!   同样按对端关闭处理；
//! - 溢出时对应缓冲区容量翻倍后重试，且永不缩小；
//! - 握手期间出现的 `wrap` 欠载属于实现缺陷，直接报错。

mod blocking;
mod nonblocking;


use std::io;

use bytes::Bytes;
use sealport_transport::{
    HandshakeError, HandshakeStatus, OperationKind, OperationStatus, SessionBuffer, SessionEngine,
};
use tracing::{debug, trace};

use crate::remnant::Remnant;

pub use blocking::BlockingHandshake;
pub use nonblocking::NonBlockingHandshake;

/// 握手结束后交还给调用方的全部状态。
#[derive(Debug)]
pub struct HandshakeParts<E> {
    pub engine: E,
    pub status: HandshakeStatus,
    /// 非阻塞握手捕获的应用层余量；阻塞握手恒为 `None`。
    pub remnant: Option<Remnant>,
    /// 入站缓冲中尚未解包的密文，调用方应在读取套接字前先处理它们。
    pub pending_ciphertext: Bytes,
    pub capacities: BufferCapacities,
}

/// 三个握手缓冲区结束时的逻辑容量。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCapacities {
    pub clear: usize,
    pub inbound: usize,
    pub outbound: usize,
}

pub(crate) enum ReadOutcome {
    Data(usize),
    Eof,
}

pub(crate) trait HandshakeIo {
    fn check_deadline(&self) -> Result<(), HandshakeError>;

    /// 向 `inbound` 追加至少一个字节，或报告对端关闭。
    fn read_into(&mut self, inbound: &mut SessionBuffer) -> Result<ReadOutcome, HandshakeError>;

    /// 把 `outbound` 完整写出并清空。
    fn flush(&mut self, outbound: &mut SessionBuffer) -> Result<(), HandshakeError>;
}

pub(crate) struct HandshakeCore<E> {
    engine: E,
    clear: SessionBuffer,
    inbound: SessionBuffer,
    outbound: SessionBuffer,
    status: HandshakeStatus,
    started: bool,
    /// 已观察到流结束或对端 `close_notify`，正在发送关闭告警。
    closing: bool,
}

impl<E: SessionEngine> HandshakeCore<E> {
    pub(crate) fn new(engine: E) -> Self {
        let sizes = engine.buffer_sizes();
        Self {
            clear: SessionBuffer::with_capacity(sizes.application),
            inbound: SessionBuffer::with_capacity(sizes.packet),
            outbound: SessionBuffer::with_capacity(sizes.packet),
            status: engine.handshake_status(),
            engine,
            started: false,
            closing: false,
        }
    }

    #[inline]
    pub(crate) fn status(&self) -> HandshakeStatus {
        self.status
    }

    /// 标记驱动器已启动；第二次调用返回 [`HandshakeError::AlreadyRun`]。
    pub(crate) fn begin(&mut self) -> Result<(), HandshakeError> {
        if self.started {
            return Err(HandshakeError::AlreadyRun);
        }
        self.started = true;
        Ok(())
    }

    pub(crate) fn drive<I: HandshakeIo>(&mut self, io: &mut I) -> Result<bool, HandshakeError> {
        self.engine.begin_handshake()?;
        let mut status = self.engine.handshake_status();
        let mut needs_read = self.inbound.is_empty();

        while !status.is_complete() {
            io.check_deadline()?;
            let next = match status {
                HandshakeStatus::NeedUnwrap => self.step_unwrap(io, &mut needs_read)?,
                HandshakeStatus::NeedWrap => self.step_wrap(io)?,
                HandshakeStatus::NeedTask => Some(self.run_delegated_tasks()),
                HandshakeStatus::Failed => None,
                HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => break,
            };
            let Some(next) = next else {
                self.status = HandshakeStatus::Failed;
                return Ok(false);
            };
            trace!(from = %status, to = %next, "tls handshake transition");
            status = next;
        }

        self.status = status;
        Ok(true)
    }

    fn step_unwrap<I: HandshakeIo>(
        &mut self,
        io: &mut I,
        needs_read: &mut bool,
    ) -> Result<Option<HandshakeStatus>, HandshakeError> {
        if *needs_read {
            if self.inbound.is_full() {
                self.inbound.grow();
            }
            match io.read_into(&mut self.inbound) {
                Ok(ReadOutcome::Data(read)) => trace!(read, "tls handshake bytes received"),
                Ok(ReadOutcome::Eof) => return Ok(self.on_end_of_stream()),
                Err(err) if self.closing && is_peer_gone(&err) => {
                    debug!(error = %err, "peer reset while tls session was closing");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }

        let result = self.engine.unwrap(&mut self.inbound, &mut self.clear)?;
        match result.status {
            OperationStatus::Ok => {
                *needs_read = self.inbound.is_empty();
                Ok(Some(result.handshake))
            }
            OperationStatus::BufferOverflow => {
                self.clear.grow();
                *needs_read = false;
                Ok(Some(HandshakeStatus::NeedUnwrap))
            }
            OperationStatus::BufferUnderflow => {
                *needs_read = true;
                Ok(Some(result.handshake))
            }
            OperationStatus::Closed => {
                if self.engine.is_outbound_done() {
                    debug!("tls session closed by peer during handshake");
                    return Ok(None);
                }
                self.closing = true;
                self.engine.close_outbound();
                *needs_read = self.inbound.is_empty();
                Ok(Some(self.engine.handshake_status()))
            }
        }
    }

    fn on_end_of_stream(&mut self) -> Option<HandshakeStatus> {
        if self.engine.is_inbound_done() && self.engine.is_outbound_done() {
            debug!("peer closed during tls handshake");
            return None;
        }
        if let Err(err) = self.engine.close_inbound() {
            debug!(error = %err, "inbound closed without close_notify");
        }
        self.closing = true;
        self.engine.close_outbound();
        Some(self.engine.handshake_status())
    }

    fn step_wrap<I: HandshakeIo>(
        &mut self,
        io: &mut I,
    ) -> Result<Option<HandshakeStatus>, HandshakeError> {
        let mut empty: &[u8] = &[];
        let result = self.engine.wrap(&mut empty, &mut self.outbound)?;
        let next = match result.status {
            OperationStatus::Ok => result.handshake,
            OperationStatus::BufferOverflow => {
                self.outbound.grow();
                return Ok(Some(HandshakeStatus::NeedWrap));
            }
            OperationStatus::BufferUnderflow => {
                return Err(HandshakeError::UnexpectedUnderflow { operation: "wrap" });
            }
            OperationStatus::Closed => self.engine.handshake_status(),
        };
        match io.flush(&mut self.outbound) {
            Ok(()) => Ok(Some(next)),
            Err(err) if self.closing && is_peer_gone(&err) => {
                debug!(error = %err, "peer gone before close alert was flushed");
                self.outbound.clear();
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn run_delegated_tasks(&mut self) -> HandshakeStatus {
        let mut ran = 0usize;
        while let Some(task) = self.engine.delegated_task() {
            task();
            ran += 1;
        }
        trace!(tasks = ran, "delegated tasks completed");
        self.engine.handshake_status()
    }

    /// 解密握手结束时仍留在入站缓冲中的应用记录。
    ///
    /// 任何引擎故障都视为入站数据损坏。不完整的尾部记录留在入站缓冲中。
    pub(crate) fn drain_remnant(&mut self) -> Result<Remnant, HandshakeError> {
        while !self.inbound.is_empty() {
            let result = self
                .engine
                .unwrap(&mut self.inbound, &mut self.clear)
                .map_err(|err| {
                    HandshakeError::io(
                        OperationKind::REMNANT,
                        io::Error::new(io::ErrorKind::InvalidData, err),
                    )
                })?;
            match result.status {
                OperationStatus::Ok if result.made_progress() => {}
                OperationStatus::BufferOverflow => {
                    self.clear.grow();
                }
                OperationStatus::Ok
                | OperationStatus::BufferUnderflow
                | OperationStatus::Closed => break,
            }
        }
        Ok(Remnant::new(self.clear.take_bytes()))
    }

    pub(crate) fn into_parts(mut self, remnant: Option<Remnant>) -> HandshakeParts<E> {
        let capacities = BufferCapacities {
            clear: self.clear.capacity(),
            inbound: self.inbound.capacity(),
            outbound: self.outbound.capacity(),
        };
        HandshakeParts {
            pending_ciphertext: self.inbound.take_bytes(),
            engine: self.engine,
            status: self.status,
            remnant,
            capacities,
        }
    }
}

/// 对端已整体关闭套接字时，关闭路径上的读写会得到这几类错误。
fn is_peer_gone(err: &HandshakeError) -> bool {
    matches!(
        err,
        HandshakeError::Io { source, .. } if matches!(
            source.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
        )
    )
}

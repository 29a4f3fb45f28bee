use std::{
    io,
    os::unix::io::AsRawFd,
    time::{Duration, Instant},
};

use mio::Interest;
use sealport_transport::{
    HandshakeConfig, HandshakeError, HandshakeStatus, OperationKind, SessionBuffer, SessionEngine,
};
use tracing::{debug, warn};

use super::{HandshakeCore, HandshakeIo, HandshakeParts, ReadOutcome};
use crate::{
    remnant::Remnant,
    socket::{RawSocket, Readiness, SocketHandle},
};

/// 就绪等待的下限；零间隔会让等待退化为忙轮询。
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 在非阻塞模式下完成握手，受截止时间约束，并捕获握手末尾到达的应用层余量。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// - 运行期间套接字切换为非阻塞模式；读写遇到 `WouldBlock` 时通过 `mio` 等待就绪，
///   单次等待不超过轮询间隔与剩余时间中的较小者；
/// - 每次循环迭代与每次就绪等待前检查截止时间，超时返回 [`HandshakeError::Timeout`]；
/// - 握手成功且套接字恢复原模式后，解密入站缓冲中剩余的完整记录作为余量。
///
/// ## 契约（What）
/// - 超时判定的最大延迟约为一个轮询间隔；
/// - [`take_remnant`](Self::take_remnant) 只能取走一次余量；
/// - 对端关闭返回 `Ok(false)`，此时不计算余量。
pub struct NonBlockingHandshake<'a, S, E> {
    socket: &'a SocketHandle<S>,
    core: HandshakeCore<E>,
    timeout: Duration,
    poll_interval: Duration,
    remnant: Option<Remnant>,
}

impl<'a, S: RawSocket, E: SessionEngine> NonBlockingHandshake<'a, S, E> {
    pub fn new(socket: &'a SocketHandle<S>, engine: E) -> Self {
        Self::with_config(socket, engine, &HandshakeConfig::default())
    }

    pub fn with_config(socket: &'a SocketHandle<S>, engine: E, config: &HandshakeConfig) -> Self {
        Self {
            socket,
            core: HandshakeCore::new(engine),
            timeout: config.handshake_timeout(),
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
            remnant: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn run(&mut self) -> Result<bool, HandshakeError> {
        self.core.begin()?;
        let started = Instant::now();
        debug!(timeout = ?self.timeout, "non-blocking tls handshake started");

        let outcome = {
            let socket = self.socket;
            let scope = socket
                .scoped_mode(true)
                .map_err(|err| HandshakeError::io(OperationKind::CONFIGURE, err))?;
            let readiness = Readiness::new(scope.stream().as_raw_fd())
                .map_err(|err| HandshakeError::io(OperationKind::POLL, err))?;
            let mut io = PolledIo {
                stream: scope.stream(),
                readiness,
                started,
                timeout: self.timeout,
                poll_interval: self.poll_interval,
            };
            self.core.drive(&mut io)
        };

        let completed = match outcome {
            Ok(completed) => completed,
            Err(err) => {
                if let HandshakeError::Timeout { elapsed, deadline } = &err {
                    warn!(?elapsed, ?deadline, "tls handshake timed out");
                }
                return Err(err);
            }
        };

        if completed {
            let remnant = self.core.drain_remnant()?;
            debug!(
                remnant = remnant.len(),
                elapsed = ?started.elapsed(),
                "non-blocking tls handshake finished"
            );
            self.remnant = Some(remnant);
        } else {
            debug!(elapsed = ?started.elapsed(), "non-blocking tls handshake ended by peer");
        }
        Ok(completed)
    }

    pub fn status(&self) -> HandshakeStatus {
        self.core.status()
    }

    pub fn has_remnant(&self) -> bool {
        self.remnant.as_ref().is_some_and(|remnant| !remnant.is_empty())
    }

    /// 取走余量；为空或已被取走时返回 `None`。
    pub fn take_remnant(&mut self) -> Option<Remnant> {
        self.remnant.take().filter(|remnant| !remnant.is_empty())
    }

    pub fn into_parts(self) -> HandshakeParts<E> {
        let remnant = self.remnant.filter(|remnant| !remnant.is_empty());
        self.core.into_parts(remnant)
    }
}

struct PolledIo<'s, S> {
    stream: &'s S,
    readiness: Readiness,
    started: Instant,
    timeout: Duration,
    poll_interval: Duration,
}

impl<S: RawSocket> PolledIo<'_, S> {
    fn wait(&mut self, interest: Interest) -> Result<(), HandshakeError> {
        self.check_deadline()?;
        let remaining = self.timeout.saturating_sub(self.started.elapsed());
        self.readiness
            .wait(interest, remaining.min(self.poll_interval))
            .map_err(|err| HandshakeError::io(OperationKind::POLL, err))?;
        Ok(())
    }
}

impl<S: RawSocket> HandshakeIo for PolledIo<'_, S> {
    fn check_deadline(&self) -> Result<(), HandshakeError> {
        let elapsed = self.started.elapsed();
        if elapsed > self.timeout {
            return Err(HandshakeError::Timeout {
                elapsed,
                deadline: self.timeout,
            });
        }
        Ok(())
    }

    fn read_into(&mut self, inbound: &mut SessionBuffer) -> Result<ReadOutcome, HandshakeError> {
        loop {
            let stream = self.stream;
            match inbound.fill_with(|spare| stream.read_some(spare)) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(read) => return Ok(ReadOutcome::Data(read)),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.wait(Interest::READABLE)?;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(HandshakeError::io(OperationKind::READ, err)),
            }
        }
    }

    fn flush(&mut self, outbound: &mut SessionBuffer) -> Result<(), HandshakeError> {
        while !outbound.is_empty() {
            match self.stream.write_some(outbound.as_slice()) {
                Ok(0) => {
                    return Err(HandshakeError::io(
                        OperationKind::WRITE,
                        io::Error::from(io::ErrorKind::WriteZero),
                    ));
                }
                Ok(written) => outbound.advance(written),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.wait(Interest::WRITABLE)?;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(HandshakeError::io(OperationKind::WRITE, err)),
            }
        }
        Ok(())
    }
}

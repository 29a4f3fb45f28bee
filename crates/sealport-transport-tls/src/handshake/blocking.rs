use std::{io, time::Instant};

use sealport_transport::{
    HandshakeError, HandshakeStatus, OperationKind, SessionBuffer, SessionEngine,
};
use tracing::debug;

use super::{HandshakeCore, HandshakeIo, HandshakeParts, ReadOutcome};
use crate::socket::{RawSocket, SocketHandle};

/// 在阻塞模式下完成握手。
///
/// 运行期间套接字被切换为阻塞模式，返回前恢复原模式。没有截止时间，
/// 也不捕获应用层余量：握手结束后仍在入站缓冲中的密文通过
/// [`into_parts`](Self::into_parts) 的 `pending_ciphertext` 交还。
pub struct BlockingHandshake<'a, S, E> {
    socket: &'a SocketHandle<S>,
    core: HandshakeCore<E>,
}

impl<'a, S: RawSocket, E: SessionEngine> BlockingHandshake<'a, S, E> {
    pub fn new(socket: &'a SocketHandle<S>, engine: E) -> Self {
        Self {
            socket,
            core: HandshakeCore::new(engine),
        }
    }

    pub fn run(&mut self) -> Result<bool, HandshakeError> {
        self.core.begin()?;
        let started = Instant::now();
        debug!("blocking tls handshake started");

        let socket = self.socket;
        let scope = socket
            .scoped_mode(false)
            .map_err(|err| HandshakeError::io(OperationKind::CONFIGURE, err))?;
        let mut io = BlockingIo {
            stream: scope.stream(),
        };
        let completed = self.core.drive(&mut io)?;
        drop(scope);

        debug!(
            completed,
            elapsed = ?started.elapsed(),
            "blocking tls handshake finished"
        );
        Ok(completed)
    }

    pub fn status(&self) -> HandshakeStatus {
        self.core.status()
    }

    pub fn into_parts(self) -> HandshakeParts<E> {
        self.core.into_parts(None)
    }
}

struct BlockingIo<'s, S> {
    stream: &'s S,
}

impl<S: RawSocket> HandshakeIo for BlockingIo<'_, S> {
    fn check_deadline(&self) -> Result<(), HandshakeError> {
        Ok(())
    }

    fn read_into(&mut self, inbound: &mut SessionBuffer) -> Result<ReadOutcome, HandshakeError> {
        loop {
            match inbound.fill_with(|spare| self.stream.read_some(spare)) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(read) => return Ok(ReadOutcome::Data(read)),
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
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(HandshakeError::io(OperationKind::WRITE, err)),
            }
        }
        Ok(())
    }
}

use bytes::{Buf, Bytes, BytesMut};
use sealport_transport::{
    FramerError, HandshakeConfig, OperationStatus, SessionBuffer, SessionBufferSizes,
    SessionEngine,
};
use tracing::trace;

use crate::framer::LENGTH_PREFIX_LEN;

/// [`ChunkFramer`](crate::ChunkFramer) 的接收端：累积线路字节，按长度前缀切出整块密文并解密。
///
/// 一个分块可能包含多条 TLS 记录，逐条解包后拼接为一条明文消息。
#[derive(Debug)]
pub struct ChunkDecoder {
    pending: BytesMut,
    cipher: SessionBuffer,
    clear: SessionBuffer,
    max_frame_size: usize,
}

impl ChunkDecoder {
    pub fn new(sizes: SessionBufferSizes, max_frame_size: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            cipher: SessionBuffer::with_capacity(sizes.packet),
            clear: SessionBuffer::with_capacity(sizes.application),
            max_frame_size,
        }
    }

    pub fn for_engine<E: SessionEngine + ?Sized>(engine: &E, config: &HandshakeConfig) -> Self {
        Self::new(engine.buffer_sizes(), config.max_frame_size)
    }

    /// 追加从线路读取的字节。
    pub fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// 若已缓冲一个完整分块，解密并返回其明文；否则返回 `Ok(None)`。
    pub fn next_message<E: SessionEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Option<Bytes>, FramerError> {
        if self.pending.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }
        let prefix = [
            self.pending[0],
            self.pending[1],
            self.pending[2],
            self.pending[3],
        ];
        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_frame_size {
            return Err(FramerError::FrameTooLarge {
                len,
                limit: self.max_frame_size,
            });
        }
        if self.pending.len() < LENGTH_PREFIX_LEN + len {
            return Ok(None);
        }
        self.pending.advance(LENGTH_PREFIX_LEN);
        let frame = self.pending.split_to(len);

        self.cipher.clear();
        self.cipher.grow_to_fit(len);
        self.cipher.extend_from_slice(&frame);
        while !self.cipher.is_empty() {
            let result = engine.unwrap(&mut self.cipher, &mut self.clear)?;
            match result.status {
                OperationStatus::Ok if result.made_progress() => {}
                OperationStatus::Ok | OperationStatus::BufferUnderflow => {
                    return Err(FramerError::TruncatedRecord { len });
                }
                OperationStatus::BufferOverflow => {
                    self.clear.grow();
                }
                OperationStatus::Closed => return Err(FramerError::Closed),
            }
        }

        let message = self.clear.take_bytes();
        trace!(ciphertext = len, plaintext = message.len(), "chunk decoded");
        Ok(Some(message))
    }
}

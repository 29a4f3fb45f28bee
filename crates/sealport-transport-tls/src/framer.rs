use bytes::{Buf, Bytes};
use sealport_transport::{
    FramerError, HandshakeConfig, MAX_PLAINTEXT_FRAGMENT, OperationStatus, SessionBuffer,
    SessionEngine,
};
use tracing::trace;

/// 每个分块前缀的长度字段字节数。
pub const LENGTH_PREFIX_LEN: usize = 4;

/// 把一条明文消息切成若干加密分块，每块为 `[4 字节大端密文长度][密文]`。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 线路协议要求接收方先读长度再读整块密文，而 TLS 记录的密文长度只有在加密之后才知道；
///
/// ## 逻辑（How）
/// - 每次 [`next_chunk`](Self::next_chunk) 从剩余消息头部取至多 `unit_size` 字节；
/// - 先写入 4 字节占位，再反复 `wrap` 直到该单元的明文全部被消耗，溢出时按倍增策略扩容暂存区；
/// - 最后把实际密文长度以大端写回占位处。
///
/// ## 契约（What）
/// - 前缀只计密文长度，不含前缀自身；
/// - 返回的切片借用内部暂存区，在下一次调用前有效；
/// - 消息耗尽后返回 `Ok(None)`，空消息不产生任何分块；
/// - `unit_size` 不超过 16 KiB。
#[derive(Debug)]
pub struct ChunkFramer {
    message: Option<Bytes>,
    scratch: SessionBuffer,
    unit_size: usize,
}

impl ChunkFramer {
    /// `packet_size` 为暂存区的初始密文容量，不足时自动翻倍。
    pub fn new(unit_size: usize, packet_size: usize) -> Self {
        Self {
            message: None,
            scratch: SessionBuffer::with_capacity(LENGTH_PREFIX_LEN + packet_size),
            unit_size: unit_size.clamp(1, MAX_PLAINTEXT_FRAGMENT),
        }
    }

    /// 单元大小取配置值、引擎明文缓冲尺寸与 16 KiB 三者的最小值。
    pub fn for_engine<E: SessionEngine + ?Sized>(engine: &E, config: &HandshakeConfig) -> Self {
        let sizes = engine.buffer_sizes();
        let unit = config
            .chunk_unit_size
            .min(sizes.application)
            .min(MAX_PLAINTEXT_FRAGMENT);
        Self::new(unit, sizes.packet)
    }

    #[inline]
    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// 设定待分帧的消息，丢弃上一条消息尚未发出的部分。
    pub fn set_message(&mut self, message: impl Into<Bytes>) {
        let message = message.into();
        self.message = (!message.is_empty()).then_some(message);
    }

    pub fn has_next(&self) -> bool {
        self.message.is_some()
    }

    /// 加密下一个单元并返回带长度前缀的分块。
    pub fn next_chunk<E: SessionEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Option<&[u8]>, FramerError> {
        let Some(message) = self.message.as_mut() else {
            return Ok(None);
        };
        let take = self.unit_size.min(message.len());
        let mut unit = message.split_to(take);
        if message.is_empty() {
            self.message = None;
        }

        self.scratch.clear();
        self.scratch.grow_to_fit(LENGTH_PREFIX_LEN);
        self.scratch.extend_from_slice(&[0; LENGTH_PREFIX_LEN]);
        loop {
            let result = engine.wrap(&mut unit, &mut self.scratch)?;
            match result.status {
                OperationStatus::Ok if !unit.has_remaining() => break,
                OperationStatus::Ok if !result.made_progress() => {
                    return Err(FramerError::Stalled);
                }
                OperationStatus::Ok => {}
                OperationStatus::BufferOverflow => {
                    self.scratch.grow();
                }
                OperationStatus::BufferUnderflow => return Err(FramerError::UnexpectedUnderflow),
                OperationStatus::Closed => return Err(FramerError::Closed),
            }
        }

        let cipher_len = self.scratch.len() - LENGTH_PREFIX_LEN;
        let prefix = u32::try_from(cipher_len).map_err(|_| FramerError::FrameTooLarge {
            len: cipher_len,
            limit: u32::MAX as usize,
        })?;
        self.scratch.as_mut_slice()[..LENGTH_PREFIX_LEN].copy_from_slice(&prefix.to_be_bytes());
        trace!(plaintext = take, ciphertext = cipher_len, "chunk framed");
        Ok(Some(self.scratch.as_slice()))
    }
}

use bytes::Buf;

use crate::{
    buffer::SessionBuffer,
    error::EngineError,
    status::{EngineResult, HandshakeStatus},
};

/// 引擎委托给调用方执行的后台任务（例如证书吊销查询）。
pub type DelegatedTask = Box<dyn FnOnce() + Send + 'static>;

/// 会话协商出的缓冲区尺寸，握手驱动器据此初始化三个缓冲区。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionBufferSizes {
    /// 单条记录可解出的最大明文长度。
    pub application: usize,
    /// 单条记录在线路上的最大长度（含记录头）。
    pub packet: usize,
}

/// 加密会话引擎契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 握手驱动器与分帧器只依赖这组能力，不感知底层 TLS 库；
/// - 真实实现（`RustlsEngine`）与测试用的脚本引擎都实现本 trait。
///
/// ## 契约（What）
/// - `wrap`：把 `src` 中的明文加密追加到 `dst`；握手期间 `src` 不会被消耗；
///   `dst` 剩余容量不足时返回 `BufferOverflow`，调用方扩容后以同一 `dst` 重试，
///   已写入 `dst` 的字节保持有效；
/// - `unwrap`：从 `src` 头部解出一条完整记录追加到 `dst`，并消费这条记录；
///   记录不完整时返回 `BufferUnderflow` 且不消费任何字节；
/// - `delegated_task`：依次取出待执行任务，执行完毕后应重新查询状态；
/// - `close_inbound` 在尚未收到对端关闭通知时可以返回错误，驱动器只记录不传播；
/// - 每个实例只驱动一次握手。
///
/// ## 注意事项（Trade-offs）
/// - trait 保持对象安全，调用方可以使用 `&mut dyn SessionEngine`。
pub trait SessionEngine: Send {
    fn begin_handshake(&mut self) -> crate::Result<(), EngineError>;

    fn handshake_status(&self) -> HandshakeStatus;

    fn wrap(
        &mut self,
        src: &mut dyn Buf,
        dst: &mut SessionBuffer,
    ) -> crate::Result<EngineResult, EngineError>;

    fn unwrap(
        &mut self,
        src: &mut SessionBuffer,
        dst: &mut SessionBuffer,
    ) -> crate::Result<EngineResult, EngineError>;

    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    fn close_inbound(&mut self) -> crate::Result<(), EngineError>;

    fn close_outbound(&mut self);

    fn is_inbound_done(&self) -> bool;

    fn is_outbound_done(&self) -> bool;

    fn buffer_sizes(&self) -> SessionBufferSizes;
}

impl<E: SessionEngine + ?Sized> SessionEngine for &mut E {
    fn begin_handshake(&mut self) -> crate::Result<(), EngineError> {
        (**self).begin_handshake()
    }

    fn handshake_status(&self) -> HandshakeStatus {
        (**self).handshake_status()
    }

    fn wrap(
        &mut self,
        src: &mut dyn Buf,
        dst: &mut SessionBuffer,
    ) -> crate::Result<EngineResult, EngineError> {
        (**self).wrap(src, dst)
    }

    fn unwrap(
        &mut self,
        src: &mut SessionBuffer,
        dst: &mut SessionBuffer,
    ) -> crate::Result<EngineResult, EngineError> {
        (**self).unwrap(src, dst)
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        (**self).delegated_task()
    }

    fn close_inbound(&mut self) -> crate::Result<(), EngineError> {
        (**self).close_inbound()
    }

    fn close_outbound(&mut self) {
        (**self).close_outbound()
    }

    fn is_inbound_done(&self) -> bool {
        (**self).is_inbound_done()
    }

    fn is_outbound_done(&self) -> bool {
        (**self).is_outbound_done()
    }

    fn buffer_sizes(&self) -> SessionBufferSizes {
        (**self).buffer_sizes()
    }
}

impl<E: SessionEngine + ?Sized> SessionEngine for Box<E> {
    fn begin_handshake(&mut self) -> crate::Result<(), EngineError> {
        (**self).begin_handshake()
    }

    fn handshake_status(&self) -> HandshakeStatus {
        (**self).handshake_status()
    }

    fn wrap(
        &mut self,
        src: &mut dyn Buf,
        dst: &mut SessionBuffer,
    ) -> crate::Result<EngineResult, EngineError> {
        (**self).wrap(src, dst)
    }

    fn unwrap(
        &mut self,
        src: &mut SessionBuffer,
        dst: &mut SessionBuffer,
    ) -> crate::Result<EngineResult, EngineError> {
        (**self).unwrap(src, dst)
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        (**self).delegated_task()
    }

    fn close_inbound(&mut self) -> crate::Result<(), EngineError> {
        (**self).close_inbound()
    }

    fn close_outbound(&mut self) {
        (**self).close_outbound()
    }

    fn is_inbound_done(&self) -> bool {
        (**self).is_inbound_done()
    }

    fn is_outbound_done(&self) -> bool {
        (**self).is_outbound_done()
    }

    fn buffer_sizes(&self) -> SessionBufferSizes {
        (**self).buffer_sizes()
    }
}

#[allow(dead_code)]
fn _assert_object_safe(_: &mut dyn SessionEngine) {}

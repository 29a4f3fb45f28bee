#![deny(unsafe_code)]
#![doc = "sealport-transport: 安全传输层的契约接口与共享机制。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **What**：定义加密会话引擎契约 [`SessionEngine`]、握手状态与操作结果的闭合枚举、缓冲区增长策略 [`SessionBuffer`]、错误分类与握手配置。"]
#![doc = "- **How**：实现 crate（`sealport-transport-tls`）只依赖本 crate 的类型驱动握手与分帧，底层 TLS 库被隔离在适配器之后。"]
#![doc = "- **边界**：本 crate 不做任何网络 I/O，也不实现 TLS 协议本身。"]

/// 传输层契约内部使用的统一返回别名。
///
/// 与 `core::result::Result` 等价，调用方需在签名中显式声明错误类型。
pub type Result<T, E> = core::result::Result<T, E>;

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod status;

pub use buffer::SessionBuffer;
pub use config::{ConfigError, HandshakeConfig};
pub use engine::{DelegatedTask, SessionBufferSizes, SessionEngine};
pub use error::{
    EngineError, ErrorCategory, FramerError, HandshakeError, OperationKind, SecurityClass,
};
pub use status::{EngineResult, HandshakeStatus, OperationStatus};

/// TLS 记录明文分片上限（2^14 字节）。
///
/// 会话引擎一次不会加密超过该长度的明文，分帧器的单元大小以此为上界。
pub const MAX_PLAINTEXT_FRAGMENT: usize = 16 * 1024;

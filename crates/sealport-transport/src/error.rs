use std::{borrow::Cow, error::Error as StdError, io, time::Duration};

use thiserror::Error;

/// 错误的主要处置策略，驱动上层的重连、告警与熔断决策。
///
/// 本层从不自行重试；分类只是交给连接管理层的提示。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 瞬时故障，建议在给定等待时间后由上层重建连接。
    Retryable(Duration),
    NonRetryable,
    Security(SecurityClass),
    ResourceExhausted,
    ProtocolViolation,
    Timeout,
}

/// 安全类错误的细分。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityClass {
    /// 记录或握手消息完整性被破坏。
    Integrity,
    /// 证书或身份校验失败。
    Authentication,
    /// 对端拒绝访问。
    Authorization,
    Unknown,
}

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

impl OperationKind {
    pub const HANDSHAKE: OperationKind = OperationKind {
        code: "sealport.transport.tls.handshake_failed",
        message: "tls handshake",
    };
    pub const READ: OperationKind = OperationKind {
        code: "sealport.transport.tls.read_failed",
        message: "tls handshake read",
    };
    pub const WRITE: OperationKind = OperationKind {
        code: "sealport.transport.tls.write_failed",
        message: "tls handshake write",
    };
    pub const POLL: OperationKind = OperationKind {
        code: "sealport.transport.tls.poll_failed",
        message: "tls readiness poll",
    };
    pub const CONFIGURE: OperationKind = OperationKind {
        code: "sealport.transport.tls.configure_failed",
        message: "tls socket configure",
    };
    pub const REMNANT: OperationKind = OperationKind {
        code: "sealport.transport.tls.remnant_failed",
        message: "tls remnant drain",
    };
    pub const WRAP: OperationKind = OperationKind {
        code: "sealport.transport.tls.wrap_failed",
        message: "tls wrap",
    };
    pub const UNWRAP: OperationKind = OperationKind {
        code: "sealport.transport.tls.unwrap_failed",
        message: "tls unwrap",
    };
}

const TIMEOUT_CODE: &str = "sealport.transport.tls.handshake_timeout";
const UNDERFLOW_CODE: &str = "sealport.transport.tls.unexpected_underflow";
const REUSED_CODE: &str = "sealport.transport.tls.handshake_reused";

/// 会话引擎报告的故障，例如畸形的握手记录或解密失败。
///
/// # 契约（What）
/// - `operation`：出错时正在执行的引擎操作；
/// - `message`：面向排障人员的描述；
/// - `category`：由适配器依据底层库错误推导，默认 `ProtocolViolation`；
/// - `source`：底层库的原始错误（若有）。
#[derive(Debug, Error)]
#[error("{}: {message}", .operation.message)]
pub struct EngineError {
    operation: OperationKind,
    message: Cow<'static, str>,
    category: ErrorCategory,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl EngineError {
    pub fn new(operation: OperationKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            operation,
            message: message.into(),
            category: ErrorCategory::ProtocolViolation,
            source: None,
        }
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    #[inline]
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    #[inline]
    pub fn code(&self) -> &'static str {
        self.operation.code
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn category(&self) -> ErrorCategory {
        self.category
    }
}

/// 握手驱动器的错误。
///
/// 对端在握手中途关闭连接不属于错误，驱动器以 `Ok(false)` 报告。
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// 超过握手截止时间，连接必须关闭。
    #[error("tls handshake timed out after {elapsed:?} (deadline {deadline:?})")]
    Timeout { elapsed: Duration, deadline: Duration },
    /// 会话引擎报告协议故障。
    #[error("tls handshake protocol error: {source}")]
    Protocol {
        #[from]
        source: EngineError,
    },
    /// 在不可能出现欠载的位置观测到 `BufferUnderflow`，属于实现缺陷。
    #[error("unexpected buffer underflow during {operation}")]
    UnexpectedUnderflow { operation: &'static str },
    /// 套接字读写、就绪等待或余量解密失败。
    #[error("{}: {source}", .kind.message)]
    Io {
        kind: OperationKind,
        #[source]
        source: io::Error,
    },
    /// 同一驱动器被第二次运行。
    #[error("tls handshake driver already ran")]
    AlreadyRun,
}

impl HandshakeError {
    pub fn io(kind: OperationKind, source: io::Error) -> Self {
        Self::Io { kind, source }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => TIMEOUT_CODE,
            Self::Protocol { source } => source.code(),
            Self::UnexpectedUnderflow { .. } => UNDERFLOW_CODE,
            Self::Io { kind, .. } => kind.code,
            Self::AlreadyRun => REUSED_CODE,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Protocol { source } => source.category(),
            Self::UnexpectedUnderflow { .. } | Self::AlreadyRun => ErrorCategory::NonRetryable,
            Self::Io { source, .. } => categorize_io_error(source),
        }
    }
}

/// 分帧与解帧的错误。
#[derive(Debug, Error)]
pub enum FramerError {
    /// 会话引擎加密或解密失败。
    #[error("chunk encryption failed: {source}")]
    Encrypt {
        #[from]
        source: EngineError,
    },
    #[error("unexpected buffer underflow while wrapping a chunk")]
    UnexpectedUnderflow,
    /// 会话方向已关闭，无法继续加解密。
    #[error("tls session closed")]
    Closed,
    /// 引擎既未消耗明文也未产出密文，通常意味着握手尚未完成。
    #[error("tls session made no progress on a pending chunk")]
    Stalled,
    /// 帧内密文不是完整的 TLS 记录序列。
    #[error("chunk of {len} bytes ends with a truncated tls record")]
    TruncatedRecord { len: usize },
    #[error("chunk length {len} exceeds limit {limit}")]
    FrameTooLarge { len: usize, limit: usize },
}

impl FramerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Encrypt { source } => source.code(),
            Self::UnexpectedUnderflow => UNDERFLOW_CODE,
            Self::Closed => "sealport.transport.tls.session_closed",
            Self::Stalled => "sealport.transport.tls.session_stalled",
            Self::TruncatedRecord { .. } => "sealport.transport.tls.truncated_record",
            Self::FrameTooLarge { .. } => "sealport.transport.tls.frame_too_large",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Encrypt { source } => source.category(),
            Self::TruncatedRecord { .. } | Self::FrameTooLarge { .. } => {
                ErrorCategory::ProtocolViolation
            }
            Self::UnexpectedUnderflow | Self::Closed | Self::Stalled => {
                ErrorCategory::NonRetryable
            }
        }
    }
}

/// 依据 `io::ErrorKind` 推导分类。
pub fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::WouldBlock | ErrorKind::Interrupted => {
            ErrorCategory::Retryable(Duration::from_millis(5))
        }
        ErrorKind::UnexpectedEof => ErrorCategory::Retryable(Duration::from_millis(40)),
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => ErrorCategory::Retryable(Duration::from_millis(50)),
        ErrorKind::WriteZero | ErrorKind::OutOfMemory => ErrorCategory::ResourceExhausted,
        ErrorKind::InvalidData => ErrorCategory::ProtocolViolation,
        _ => ErrorCategory::NonRetryable,
    }
}

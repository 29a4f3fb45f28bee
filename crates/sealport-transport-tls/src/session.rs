use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::{ClientConfig, ServerConfig, pki_types::ServerName};
use sealport_transport::{EngineError, SessionBufferSizes};

use crate::engine::{RustlsEngine, without_session_tickets};

/// 可热替换的服务端 TLS 配置，用于为每条入站连接创建会话引擎。
///
/// # 设计动机（Why）
/// - 证书轮换不应中断已建立的连接，也不应阻塞正在握手的线程；
/// - 以 `ArcSwap<ServerConfig>` 实现 RCU 式的配置广播：读路径无锁，写路径原子替换。
///
/// # 核心契约（What）
/// - [`new_engine`](Self::new_engine) 读取调用时刻的配置快照，新旧连接互不影响；
/// - [`replace`](Self::replace) 立即对后续 `new_engine` 可见，并返回旧配置；
/// - 写入的 `ServerConfig` 必须已装载证书链与私钥；
/// - 存入前关闭 TLS 1.3 会话票据，[`snapshot`](Self::snapshot) 返回的是调整后的配置。
#[derive(Clone)]
pub struct ServerSessionFactory {
    inner: Arc<ArcSwap<ServerConfig>>,
    sizes: Option<SessionBufferSizes>,
}

impl ServerSessionFactory {
    pub fn new(initial: Arc<ServerConfig>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(without_session_tickets(initial))),
            sizes: None,
        }
    }

    #[inline]
    pub fn from_config(initial: ServerConfig) -> Self {
        Self::new(Arc::new(initial))
    }

    /// 为后续创建的引擎指定初始缓冲区尺寸。
    pub fn with_buffer_sizes(mut self, sizes: SessionBufferSizes) -> Self {
        self.sizes = Some(sizes);
        self
    }

    #[inline]
    pub fn snapshot(&self) -> Arc<ServerConfig> {
        self.inner.load_full()
    }

    /// 原子替换当前配置，返回被替换下来的旧值。
    #[inline]
    pub fn replace(&self, next: Arc<ServerConfig>) -> Arc<ServerConfig> {
        self.inner.swap(without_session_tickets(next))
    }

    pub fn new_engine(&self) -> Result<RustlsEngine, EngineError> {
        let engine = RustlsEngine::server(self.inner.load_full())?;
        Ok(apply_sizes(engine, self.sizes))
    }
}

impl fmt::Debug for ServerSessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSessionFactory")
            .field("sizes", &self.sizes)
            .finish_non_exhaustive()
    }
}

/// 可热替换的客户端 TLS 配置。
///
/// 与 [`ServerSessionFactory`] 语义一致，额外需要每条连接的目标服务器名。
#[derive(Clone)]
pub struct ClientSessionFactory {
    inner: Arc<ArcSwap<ClientConfig>>,
    sizes: Option<SessionBufferSizes>,
}

impl ClientSessionFactory {
    pub fn new(initial: Arc<ClientConfig>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(initial)),
            sizes: None,
        }
    }

    #[inline]
    pub fn from_config(initial: ClientConfig) -> Self {
        Self::new(Arc::new(initial))
    }

    pub fn with_buffer_sizes(mut self, sizes: SessionBufferSizes) -> Self {
        self.sizes = Some(sizes);
        self
    }

    #[inline]
    pub fn snapshot(&self) -> Arc<ClientConfig> {
        self.inner.load_full()
    }

    #[inline]
    pub fn replace(&self, next: Arc<ClientConfig>) -> Arc<ClientConfig> {
        self.inner.swap(next)
    }

    pub fn new_engine(&self, server_name: ServerName<'static>) -> Result<RustlsEngine, EngineError> {
        let engine = RustlsEngine::client(self.inner.load_full(), server_name)?;
        Ok(apply_sizes(engine, self.sizes))
    }
}

impl fmt::Debug for ClientSessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSessionFactory")
            .field("sizes", &self.sizes)
            .finish_non_exhaustive()
    }
}

fn apply_sizes(engine: RustlsEngine, sizes: Option<SessionBufferSizes>) -> RustlsEngine {
    match sizes {
        Some(sizes) => engine.with_buffer_sizes(sizes),
        None => engine,
    }
}

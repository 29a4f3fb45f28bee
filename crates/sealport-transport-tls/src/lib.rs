#![deny(unsafe_code)]
#![doc = "sealport-transport-tls: 基于 rustls 的同步 TLS 握手驱动与分帧实现。"]
#![doc = ""]
#![doc = "== 模块速览 =="]
#![doc = "- [`BlockingHandshake`]/[`NonBlockingHandshake`]：在已连接套接字上驱动一次握手，后者带截止时间并捕获余量；"]
#![doc = "- [`ChunkFramer`]/[`ChunkDecoder`]：`[4 字节大端长度][密文]` 的分块编码与解码；"]
#![doc = "- [`RustlsEngine`]：以 rustls 连接实现 `SessionEngine` 契约；"]
#![doc = "- [`ServerSessionFactory`]/[`ClientSessionFactory`]：可热替换配置的会话工厂；"]
#![doc = "- [`SocketHandle`]：串行化阻塞模式切换的套接字句柄。"]

mod decoder;
mod engine;
mod error;
mod framer;
pub mod handshake;
mod remnant;
mod session;
mod socket;

pub use decoder::ChunkDecoder;
pub use engine::{DEFAULT_BUFFER_SIZES, RustlsEngine};
pub use framer::{ChunkFramer, LENGTH_PREFIX_LEN};
pub use handshake::{
    BlockingHandshake, BufferCapacities, HandshakeParts, NonBlockingHandshake,
};
pub use remnant::Remnant;
pub use session::{ClientSessionFactory, ServerSessionFactory};
pub use socket::{ModeScope, RawSocket, SocketHandle};

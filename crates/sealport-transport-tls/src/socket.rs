use mio::{Events, Interest, Poll, Token, unix::SourceFd};
use parking_lot::{Mutex, MutexGuard};
use std::{
    fmt,
    io::{self, Read, Write},
    net::TcpStream,
    os::unix::{
        io::{AsRawFd, RawFd},
        net::UnixStream,
    },
    time::Duration,
};
use tracing::warn;

/// 握手驱动器所需的最小套接字能力：阻塞模式切换与单次读写。
///
/// 为标准库的 `TcpStream` 与 `UnixStream` 提供了实现；读写通过共享引用完成，
/// 以便在持有模式锁的同时进行 I/O。
pub trait RawSocket: AsRawFd + Send + Sync {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_some(&self, buf: &[u8]) -> io::Result<usize>;
}

macro_rules! impl_raw_socket {
    ($($ty:ty),* $(,)?) => {
        $(
            impl RawSocket for $ty {
                fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
                    <$ty>::set_nonblocking(self, nonblocking)
                }

                fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
                    let mut stream: &$ty = self;
                    stream.read(buf)
                }

                fn write_some(&self, buf: &[u8]) -> io::Result<usize> {
                    let mut stream: &$ty = self;
                    stream.write(buf)
                }
            }
        )*
    };
}

impl_raw_socket!(TcpStream, UnixStream);

/// 已连接套接字的共享句柄，负责串行化阻塞模式的切换。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 阻塞/非阻塞模式是套接字上的共享可变属性，握手期间的临时切换必须与其他切换方互斥；
/// - 握手结束（无论成功、失败还是提前返回错误）都要恢复切换前的模式。
///
/// ## 逻辑（How）
/// - `nonblocking` 互斥锁记录当前模式；所有切换都在持锁状态下完成；
/// - [`scoped_mode`](Self::scoped_mode) 返回 [`ModeScope`]，它在整个握手期间持有锁，
///   `Drop` 时恢复原模式。
///
/// ## 契约（What）
/// - [`new`](Self::new) 假定传入的套接字处于阻塞模式（标准库默认）；
/// - 持有 `ModeScope` 的线程不得再调用本句柄的模式方法，否则会自锁。
pub struct SocketHandle<S> {
    stream: S,
    nonblocking: Mutex<bool>,
}

impl<S: RawSocket> SocketHandle<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            nonblocking: Mutex::new(false),
        }
    }

    /// 包装套接字并显式设定初始模式。
    pub fn with_mode(stream: S, nonblocking: bool) -> io::Result<Self> {
        stream.set_nonblocking(nonblocking)?;
        Ok(Self {
            stream,
            nonblocking: Mutex::new(nonblocking),
        })
    }

    pub fn is_nonblocking(&self) -> bool {
        *self.nonblocking.lock()
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let mut mode = self.nonblocking.lock();
        if *mode != nonblocking {
            self.stream.set_nonblocking(nonblocking)?;
            *mode = nonblocking;
        }
        Ok(())
    }

    /// 在持锁状态下切换到目标模式，返回的作用域对象析构时恢复原模式。
    pub fn scoped_mode(&self, nonblocking: bool) -> io::Result<ModeScope<'_, S>> {
        let mut mode = self.nonblocking.lock();
        let previous = *mode;
        if previous != nonblocking {
            self.stream.set_nonblocking(nonblocking)?;
            *mode = nonblocking;
        }
        Ok(ModeScope {
            stream: &self.stream,
            mode,
            previous,
        })
    }

    #[inline]
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: fmt::Debug> fmt::Debug for SocketHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

/// 临时阻塞模式的作用域守卫。
pub struct ModeScope<'a, S: RawSocket> {
    stream: &'a S,
    mode: MutexGuard<'a, bool>,
    previous: bool,
}

impl<'a, S: RawSocket> ModeScope<'a, S> {
    #[inline]
    pub fn stream(&self) -> &'a S {
        self.stream
    }

    #[inline]
    pub fn is_nonblocking(&self) -> bool {
        *self.mode
    }
}

impl<S: RawSocket> Drop for ModeScope<'_, S> {
    fn drop(&mut self) {
        if *self.mode == self.previous {
            return;
        }
        match self.stream.set_nonblocking(self.previous) {
            Ok(()) => *self.mode = self.previous,
            Err(err) => warn!(
                error = %err,
                restore_nonblocking = self.previous,
                "failed to restore socket blocking mode"
            ),
        }
    }
}

const SOCKET_TOKEN: Token = Token(0);

/// 基于 `mio` 的单套接字就绪通知。
///
/// 每次等待都以 `reregister` 重新声明关注的事件，已就绪的套接字会立即上报，
/// 不依赖边沿触发的时序。
pub(crate) struct Readiness {
    poll: Poll,
    events: Events,
    fd: RawFd,
    registered: bool,
}

impl Readiness {
    pub(crate) fn new(fd: RawFd) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(4),
            fd,
            registered: false,
        })
    }

    /// 最多等待 `timeout`，返回期间是否观测到就绪事件。
    pub(crate) fn wait(&mut self, interest: Interest, timeout: Duration) -> io::Result<bool> {
        let mut source = SourceFd(&self.fd);
        if self.registered {
            self.poll
                .registry()
                .reregister(&mut source, SOCKET_TOKEN, interest)?;
        } else {
            self.poll
                .registry()
                .register(&mut source, SOCKET_TOKEN, interest)?;
            self.registered = true;
        }
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => Ok(!self.events.is_empty()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl Drop for Readiness {
    fn drop(&mut self) {
        if self.registered {
            let _ = self.poll.registry().deregister(&mut SourceFd(&self.fd));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn scoped_mode_restores_previous_mode() {
        let (left, _right) = UnixStream::pair().unwrap();
        let handle = SocketHandle::new(left);
        {
            let scope = handle.scoped_mode(true).unwrap();
            assert!(scope.is_nonblocking());
            let mut buf = [0u8; 4];
            let err = scope.stream().read_some(&mut buf).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        }
        assert!(!handle.is_nonblocking());
    }

    #[test]
    fn scoped_mode_keeps_already_nonblocking_socket() {
        let (left, _right) = UnixStream::pair().unwrap();
        let handle = SocketHandle::with_mode(left, true).unwrap();
        drop(handle.scoped_mode(false).unwrap());
        assert!(handle.is_nonblocking());
    }

    #[test]
    fn readiness_reports_pending_bytes() {
        let (left, mut right) = UnixStream::pair().unwrap();
        left.set_nonblocking(true).unwrap();
        let mut readiness = Readiness::new(left.as_raw_fd()).unwrap();
        assert!(
            !readiness
                .wait(Interest::READABLE, Duration::from_millis(10))
                .unwrap()
        );
        right.write_all(b"ping").unwrap();
        assert!(
            readiness
                .wait(Interest::READABLE, Duration::from_secs(5))
                .unwrap()
        );
        assert!(
            readiness
                .wait(Interest::READABLE, Duration::from_secs(5))
                .unwrap(),
            "unread bytes must be reported again after re-arming"
        );
    }
}

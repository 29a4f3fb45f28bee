use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, IoSlice};
use tracing::trace;

/// 握手与分帧共用的字节缓冲区，携带显式的逻辑容量。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 会话引擎依据“目标缓冲区剩余容量”判定 `BufferOverflow`，而 `BytesMut` 会自动扩容，
///   因此需要一个独立于底层分配的逻辑容量；
/// - 溢出后的处理统一为“容量翻倍并保留已写入字节”，握手循环与分帧器都复用这里的实现。
///
/// ## 逻辑（How）
/// - `bytes` 保存尚未被消费的字节，`capacity` 是逻辑上限；
/// - 写入（[`io::Write`]、[`extend_from_slice`](Self::extend_from_slice)、[`fill_with`](Self::fill_with)）
///   只会填充到 `capacity` 为止；
/// - [`grow`](Self::grow) 把 `capacity` 翻倍并预留底层空间，已缓冲字节原样保留；
/// - 从头部消费（[`advance`](Self::advance)/[`split_to`](Self::split_to)）不会降低 `capacity`。
///
/// ## 契约（What）
/// - `capacity` 在整个生命周期内单调不减；
/// - `len() <= capacity()` 恒成立。
#[derive(Debug)]
pub struct SessionBuffer {
    bytes: BytesMut,
    capacity: usize,
}

impl SessionBuffer {
    /// 以给定逻辑容量创建缓冲区；容量为 0 时按 1 处理，保证翻倍策略可推进。
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bytes: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 距离逻辑容量还可写入的字节数。
    #[inline]
    pub fn remaining_mut(&self) -> usize {
        self.capacity.saturating_sub(self.bytes.len())
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.remaining_mut() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// 将逻辑容量翻倍，返回新容量。
    pub fn grow(&mut self) -> usize {
        let next = doubled_capacity(self.capacity);
        self.bytes.reserve(next.saturating_sub(self.bytes.len()));
        trace!(from = self.capacity, to = next, buffered = self.bytes.len(), "session buffer grown");
        self.capacity = next;
        next
    }

    /// 反复翻倍直到至少还能写入 `additional` 字节。
    pub fn grow_to_fit(&mut self, additional: usize) -> usize {
        while self.remaining_mut() < additional {
            self.grow();
        }
        self.capacity
    }

    /// 在逻辑容量范围内追加字节，返回实际写入的数量。
    pub fn extend_from_slice(&mut self, src: &[u8]) -> usize {
        let take = src.len().min(self.remaining_mut());
        self.bytes.extend_from_slice(&src[..take]);
        take
    }

    /// 把剩余空间以可写切片交给 `fill`，并按其返回值提交写入长度。
    ///
    /// `fill` 的典型实现是一次套接字读取；返回 `Ok(0)` 表示未写入任何字节。
    /// 缓冲区已满时直接返回 `InvalidInput`，避免把“没有空间”误读为流结束。
    pub fn fill_with<F>(&mut self, fill: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        let spare = self.remaining_mut();
        if spare == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "session buffer has no spare capacity",
            ));
        }
        let start = self.bytes.len();
        self.bytes.resize(start + spare, 0);
        match fill(&mut self.bytes[start..]) {
            Ok(written) => {
                let written = written.min(spare);
                self.bytes.truncate(start + written);
                Ok(written)
            }
            Err(err) => {
                self.bytes.truncate(start);
                Err(err)
            }
        }
    }

    /// 丢弃头部 `cnt` 个已消费字节。
    #[inline]
    pub fn advance(&mut self, cnt: usize) {
        self.bytes.advance(cnt.min(self.bytes.len()));
    }

    /// 从头部切出 `cnt` 个字节，转为不可变 [`Bytes`]。
    pub fn split_to(&mut self, cnt: usize) -> Bytes {
        let cnt = cnt.min(self.bytes.len());
        self.bytes.split_to(cnt).freeze()
    }

    /// 取走全部已缓冲字节。
    pub fn take_bytes(&mut self) -> Bytes {
        self.bytes.split().freeze()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

impl io::Write for SessionBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.extend_from_slice(buf))
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut written = 0;
        for buf in bufs {
            let n = self.extend_from_slice(buf);
            written += n;
            if n < buf.len() {
                break;
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 翻倍策略：0 视为 1，乘法饱和于 `usize::MAX`。
#[inline]
pub fn doubled_capacity(current: usize) -> usize {
    current.max(1).saturating_mul(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn writes_stop_at_logical_capacity() {
        let mut buffer = SessionBuffer::with_capacity(4);
        assert_eq!(buffer.write(b"abcdef").unwrap(), 4);
        assert!(buffer.is_full());
        assert_eq!(buffer.write(b"gh").unwrap(), 0);
        assert_eq!(buffer.as_slice(), b"abcd");
    }

    #[test]
    fn grow_doubles_and_keeps_unconsumed_bytes() {
        let mut buffer = SessionBuffer::with_capacity(4);
        buffer.extend_from_slice(b"abcd");
        buffer.advance(1);
        assert_eq!(buffer.grow(), 8);
        assert_eq!(buffer.as_slice(), b"bcd");
        assert_eq!(buffer.remaining_mut(), 5);
        buffer.extend_from_slice(b"efghi");
        assert_eq!(buffer.as_slice(), b"bcdefghi");
    }

    #[test]
    fn consuming_never_lowers_capacity() {
        let mut buffer = SessionBuffer::with_capacity(8);
        buffer.extend_from_slice(b"12345678");
        let head = buffer.split_to(3);
        assert_eq!(&head[..], b"123");
        buffer.advance(10);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 8);
    }

    #[test]
    fn fill_with_commits_only_reported_bytes() {
        let mut buffer = SessionBuffer::with_capacity(16);
        buffer.extend_from_slice(b"ab");
        let n = buffer
            .fill_with(|spare| {
                assert_eq!(spare.len(), 14);
                spare[..3].copy_from_slice(b"cde");
                Ok(3)
            })
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(buffer.as_slice(), b"abcde");

        let err = buffer
            .fill_with(|_| Err(io::Error::from(io::ErrorKind::WouldBlock)))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(buffer.as_slice(), b"abcde");
    }

    #[test]
    fn fill_with_rejects_full_buffer() {
        let mut buffer = SessionBuffer::with_capacity(2);
        buffer.extend_from_slice(b"xy");
        let err = buffer.fill_with(|_| Ok(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn grow_to_fit_reaches_requested_room() {
        let mut buffer = SessionBuffer::with_capacity(3);
        buffer.extend_from_slice(b"abc");
        assert_eq!(buffer.grow_to_fit(10), 24);
        assert!(buffer.remaining_mut() >= 10);
    }

    #[test]
    fn zero_capacity_still_grows() {
        let mut buffer = SessionBuffer::with_capacity(0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(doubled_capacity(0), 2);
        assert_eq!(doubled_capacity(usize::MAX), usize::MAX);
    }
}

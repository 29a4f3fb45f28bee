use std::ops::Deref;

use bytes::Bytes;

/// 握手完成时已随最后一批握手记录到达、并被提前解密的应用层明文。
///
/// 这些字节必须先于后续从套接字读取的任何数据交给应用层，否则会丢失消息开头。
/// 内容不可变，只能整体读取。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Remnant(Bytes);

impl Remnant {
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for Remnant {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Remnant {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

use core::fmt;

/// 握手状态机的当前节点。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `NeedUnwrap`：需要先从对端读取密文并解密；
/// - `NeedWrap`：引擎有待发送的握手数据；
/// - `NeedTask`：引擎暴露了必须先执行的委托任务；
/// - `Finished`：最近一次 wrap/unwrap 恰好完成了握手，只会出现一次；
/// - `NotHandshaking`：当前不在握手中；
/// - `Failed`：由驱动层合成，表示对端关闭连接且本端已无法完成收尾。
///
/// ## 注意事项（Trade-offs）
/// - 枚举与任何具体 TLS 库解耦，适配器负责把库内部状态映射到这里；
/// - 驱动循环退出时只可能观测到 `Finished`、`NotHandshaking` 或 `Failed`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandshakeStatus {
    NeedUnwrap,
    NeedWrap,
    NeedTask,
    Finished,
    NotHandshaking,
    Failed,
}

impl HandshakeStatus {
    /// 握手是否已成功结束。
    #[inline]
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Finished | Self::NotHandshaking)
    }

    /// 是否为驱动循环允许的终止状态。
    #[inline]
    pub fn is_terminal(self) -> bool {
        self.is_complete() || self == Self::Failed
    }
}

impl fmt::Display for HandshakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NeedUnwrap => "need_unwrap",
            Self::NeedWrap => "need_wrap",
            Self::NeedTask => "need_task",
            Self::Finished => "finished",
            Self::NotHandshaking => "not_handshaking",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// 单次 wrap/unwrap 的结果标签。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    /// 操作完成。
    Ok,
    /// 目标缓冲区容量不足，调用方需扩容后重试。
    BufferOverflow,
    /// 源缓冲区中的字节不足以构成完整记录。
    BufferUnderflow,
    /// 对应方向已关闭。
    Closed,
}

/// wrap/unwrap 的完整结果：操作标签、操作后的握手状态以及消耗/产出的字节数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineResult {
    pub status: OperationStatus,
    pub handshake: HandshakeStatus,
    pub consumed: usize,
    pub produced: usize,
}

impl EngineResult {
    pub fn new(
        status: OperationStatus,
        handshake: HandshakeStatus,
        consumed: usize,
        produced: usize,
    ) -> Self {
        Self {
            status,
            handshake,
            consumed,
            produced,
        }
    }

    /// 未消耗也未产出任何字节的结果，常用于 `BufferOverflow`/`BufferUnderflow`。
    pub fn idle(status: OperationStatus, handshake: HandshakeStatus) -> Self {
        Self::new(status, handshake, 0, 0)
    }

    /// 本次操作是否推动了任何字节。
    #[inline]
    pub fn made_progress(&self) -> bool {
        self.consumed > 0 || self.produced > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_finished_and_not_handshaking_are_complete() {
        let all = [
            HandshakeStatus::NeedUnwrap,
            HandshakeStatus::NeedWrap,
            HandshakeStatus::NeedTask,
            HandshakeStatus::Finished,
            HandshakeStatus::NotHandshaking,
            HandshakeStatus::Failed,
        ];
        let complete: Vec<_> = all.iter().filter(|s| s.is_complete()).collect();
        assert_eq!(
            complete,
            [&HandshakeStatus::Finished, &HandshakeStatus::NotHandshaking]
        );
        assert!(HandshakeStatus::Failed.is_terminal());
        assert!(!HandshakeStatus::NeedTask.is_terminal());
    }

    #[test]
    fn idle_result_reports_no_progress() {
        let result = EngineResult::idle(OperationStatus::BufferOverflow, HandshakeStatus::NeedWrap);
        assert!(!result.made_progress());
        assert!(EngineResult::new(OperationStatus::Ok, HandshakeStatus::NeedWrap, 0, 7).made_progress());
    }
}

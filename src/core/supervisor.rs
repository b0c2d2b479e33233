//! 执行监管：单个执行体的控制信号
//!
//! 每个执行体持有两个 CancellationToken 与信号种类；调度器发出 Pause / Cancel / Superseded，
//! 执行循环在步骤边界检查。信号只升不降：Superseded > Cancel > Pause。
//! Cancel / Superseded 还会触发 discard，让进行中的补全调用立即放弃。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// 控制信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Signal {
    /// 提交进行中的步骤后转为 Paused
    Pause = 1,
    /// 丢弃进行中的步骤，转为 Cancelled
    Cancel = 2,
    /// 更新的 Resume 已接管，不再写入任何内容
    Superseded = 3,
}

impl Signal {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Signal::Pause),
            2 => Some(Signal::Cancel),
            3 => Some(Signal::Superseded),
            _ => None,
        }
    }
}

/// 执行体的控制句柄（可克隆，调度器与执行体各持一份）
#[derive(Debug, Clone, Default)]
pub struct ExecutionControl {
    /// 任意信号
    token: CancellationToken,
    /// 仅 Cancel / Superseded
    discard: CancellationToken,
    signal: Arc<AtomicU8>,
}

impl ExecutionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发出信号；已有更高优先级的信号时保持不变
    pub fn request(&self, signal: Signal) {
        self.signal.fetch_max(signal as u8, Ordering::SeqCst);
        if signal >= Signal::Cancel {
            self.discard.cancel();
        }
        self.token.cancel();
    }

    pub fn signal(&self) -> Option<Signal> {
        Signal::from_u8(self.signal.load(Ordering::SeqCst))
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 进行中的步骤是否必须丢弃
    pub fn is_discarded(&self) -> bool {
        self.discard.is_cancelled()
    }

    /// 在 select! 中等待丢弃信号（补全调用、退避睡眠期间）
    pub async fn discarded(&self) {
        self.discard.cancelled().await
    }
}

/// 活跃注册表中的条目
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub generation: u64,
    pub control: ExecutionControl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_only_escalates() {
        let control = ExecutionControl::new();
        assert!(!control.is_stopped());
        assert_eq!(control.signal(), None);

        control.request(Signal::Pause);
        assert!(control.is_stopped());
        assert!(!control.is_discarded());

        control.request(Signal::Cancel);
        control.request(Signal::Pause);
        assert!(control.is_discarded());
        assert_eq!(control.signal(), Some(Signal::Cancel));
        assert!(control.is_stopped());

        control.request(Signal::Superseded);
        assert_eq!(control.signal(), Some(Signal::Superseded));
    }

    #[test]
    fn test_clones_share_state() {
        let control = ExecutionControl::new();
        let clone = control.clone();
        clone.request(Signal::Pause);
        assert_eq!(control.signal(), Some(Signal::Pause));
    }
}

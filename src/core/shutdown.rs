//! 优雅关闭
//!
//! 统一监听 Ctrl+C / SIGTERM；关闭时先暂停所有活跃执行体，让进行中的步骤提交后转为 Paused，
//! 下次启动由 `recover` 或 `resume` 接着跑。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::scheduler::TaskScheduler;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => f.write_str("ctrl-c"),
            ShutdownReason::Terminate => f.write_str("sigterm"),
        }
    }
}

/// 关闭信号：一个取消令牌，由信号处理器触发
#[derive(Debug, Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!(%reason, "shutdown requested, pausing active tasks");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装 Ctrl+C / SIGTERM 处理器
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                manager.shutdown(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Terminate);
                }
            });
        }
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 日志中使用的名称
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理，每项带超时
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout_secs: u64,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 依次执行清理；单项失败或超时只记日志，不影响后续项
    pub async fn run_cleanup(&self) {
        let timeout = Duration::from_secs(self.timeout_secs);
        for task in &self.cleanup_tasks {
            let cleanup = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::debug!(cleanup, "cleanup finished"),
                Ok(Err(e)) => tracing::warn!(cleanup, error = %e, "cleanup failed"),
                Err(_) => tracing::warn!(cleanup, timeout_secs = self.timeout_secs, "cleanup timed out"),
            }
        }
    }
}

/// 暂停所有活跃执行体并等待它们在步骤边界退出
pub struct SchedulerDrain {
    scheduler: Arc<TaskScheduler>,
    timeout: Duration,
}

impl SchedulerDrain {
    pub fn new(scheduler: Arc<TaskScheduler>, timeout: Duration) -> Self {
        Self { scheduler, timeout }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for SchedulerDrain {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let remaining = self.scheduler.drain(self.timeout).await;
        if remaining > 0 {
            anyhow::bail!("{remaining} execution(s) still running after drain");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SchedulerDrain"
    }
}

/// 运行主流程直到其结束或收到关闭信号，然后执行清理
pub async fn run_with_graceful_shutdown<F, Fut>(
    manager: Arc<ShutdownManager>,
    work: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    manager.install_signal_handlers();
    tokio::select! {
        _ = work => tracing::debug!("foreground work finished"),
        _ = manager.wait_for_shutdown() => tracing::debug!("foreground work interrupted"),
    }
    cleanup().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown());

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.wait_for_shutdown().await })
        };
        manager.shutdown(ShutdownReason::Terminate);
        manager.shutdown(ShutdownReason::Interrupt);
        assert!(manager.is_shutdown());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    struct FlagCleanup {
        called: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl ShutdownCleanup for FlagCleanup {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.called.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "FlagCleanup"
        }
    }

    #[tokio::test]
    async fn test_coordinator_runs_cleanup_after_shutdown() {
        let manager = Arc::new(ShutdownManager::new());
        let mut coordinator = ShutdownCoordinator::new();
        let called = Arc::new(AtomicBool::new(false));
        coordinator.register(FlagCleanup {
            called: Arc::clone(&called),
        });

        let trigger = Arc::clone(&manager);
        run_with_graceful_shutdown(
            Arc::clone(&manager),
            async move {
                trigger.shutdown(ShutdownReason::Interrupt);
                std::future::pending::<()>().await
            },
            || coordinator.run_cleanup(),
        )
        .await;
        assert!(called.load(Ordering::SeqCst));
    }
}

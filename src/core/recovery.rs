//! 错误恢复引擎
//!
//! 根据 GatewayError 类型与已尝试次数返回 RecoveryAction，供步骤内的补全调用决定是退避重试还是放弃。

use std::time::Duration;

use serde::Deserialize;

use crate::llm::GatewayError;

/// 退避重试参数
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryPolicy {
    /// 含首次调用在内的最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次失败（从 1 开始）之后的等待时长
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exp);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// 恢复动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待后重试
    RetryAfter(Duration),
    /// 放弃：不可重试，或重试次数耗尽
    Abort,
}

/// 将网关错误映射为恢复动作
#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    policy: RetryPolicy,
}

impl RecoveryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// attempt 为刚失败的那次调用序号（从 1 开始）
    pub fn handle(&self, err: &GatewayError, attempt: u32) -> RecoveryAction {
        if !err.is_retryable() || attempt >= self.policy.max_attempts {
            return RecoveryAction::Abort;
        }
        let mut wait = self.policy.backoff(attempt);
        // 服务端提示的等待时长作为下限
        if let Some(hint) = err.retry_after_ms() {
            wait = wait.max(Duration::from_millis(hint));
        }
        RecoveryAction::RetryAfter(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_rate_limited_backs_off_exponentially() {
        let engine = RecoveryEngine::default();
        let err = GatewayError::RateLimited { retry_after_ms: None };
        assert_eq!(
            engine.handle(&err, 1),
            RecoveryAction::RetryAfter(Duration::from_millis(500))
        );
        assert_eq!(
            engine.handle(&err, 2),
            RecoveryAction::RetryAfter(Duration::from_millis(1000))
        );
        assert_eq!(engine.handle(&err, 3), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_honours_retry_after_hint() {
        let engine = RecoveryEngine::default();
        let err = GatewayError::RateLimited {
            retry_after_ms: Some(2500),
        };
        assert_eq!(
            engine.handle(&err, 1),
            RecoveryAction::RetryAfter(Duration::from_millis(2500))
        );
    }

    #[test]
    fn test_recovery_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(9), Duration::from_millis(8000));
    }

    #[test]
    fn test_recovery_unauthorized_aborts() {
        let engine = RecoveryEngine::default();
        let err = GatewayError::Unauthorized("bad key".into());
        assert_eq!(engine.handle(&err, 1), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_invalid_aborts() {
        let engine = RecoveryEngine::default();
        let err = GatewayError::Invalid("too long".into());
        assert_eq!(engine.handle(&err, 1), RecoveryAction::Abort);
    }
}

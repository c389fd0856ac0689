use std::time::Duration;

/// 送信の再試行設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 試行回数の上限（初回を含む）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// `attempt` 回目が失敗した後の待ち時間（指数バックオフ）
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

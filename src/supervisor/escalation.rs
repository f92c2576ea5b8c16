//! 升级阶梯：按当前步骤的拒绝次数决定软干预 / 硬干预

/// 对一次拒绝后计数的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// 普通重试
    None,
    /// 主管写修正稿作为 baseline，仍交回原 worker
    Soft,
    /// 主管代写并推进到下一步
    Hard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationLadder {
    soft_at: Vec<u32>,
    hard_at: u32,
}

impl EscalationLadder {
    /// 大于等于硬阈值的软阈值无意义，直接丢弃
    pub fn new(soft_at: impl IntoIterator<Item = u32>, hard_at: u32) -> Self {
        let hard_at = hard_at.max(1);
        let mut soft_at: Vec<u32> = soft_at
            .into_iter()
            .filter(|n| *n > 0 && *n < hard_at)
            .collect();
        soft_at.sort_unstable();
        soft_at.dedup();
        Self { soft_at, hard_at }
    }

    /// 评估当前计数（拒绝后已加一）
    pub fn assess(&self, count: u32) -> Escalation {
        if count >= self.hard_at {
            Escalation::Hard
        } else if self.soft_at.contains(&count) {
            Escalation::Soft
        } else {
            Escalation::None
        }
    }
}

impl Default for EscalationLadder {
    fn default() -> Self {
        Self::new([10, 20], 30)
    }
}

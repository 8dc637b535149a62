//! # 容量策略模块
//!
//! ## 设计思路
//!
//! 容量上限应由账户档位决定：基础档位较低，升级档位较高；
//! 当用户已用满基础上限但尚未达到升级上限时，提示升级。
//!
//! 旧实现把上限绑定在“当前数量”上（`count <= 2 → 2，否则 5`），
//! 任何能让数量达到 3 的旁路都会解锁更高上限。该行为保留为
//! `CapacityPolicy::LegacyCount`，仅用于兼容性对比，默认使用 `Tier`。
//!
//! 所有函数均为纯函数：同样的输入永远得到同样的输出。

use serde::{Deserialize, Serialize};

use super::config::{CapacityMode, IngestConfig};

/// 账户档位（由外部权益服务提供，只读）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountTier {
    #[default]
    Base,
    Elevated,
}

/// 容量策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// 按档位决定上限。
    Tier { base_limit: usize, elevated_limit: usize },
    /// 按当前数量决定上限（旧行为）。
    LegacyCount { base_limit: usize, elevated_limit: usize },
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self::Tier {
            base_limit: 2,
            elevated_limit: 5,
        }
    }
}

impl CapacityPolicy {
    /// 根据配置构建策略。
    pub fn from_config(config: &IngestConfig) -> Self {
        let base_limit = config.base_tier_limit;
        let elevated_limit = config.elevated_tier_limit;
        match config.capacity_mode {
            CapacityMode::Tier => Self::Tier {
                base_limit,
                elevated_limit,
            },
            CapacityMode::LegacyCount => Self::LegacyCount {
                base_limit,
                elevated_limit,
            },
        }
    }

    /// 当前允许的最大图片数量。
    pub fn max(&self, current_count: usize, tier: AccountTier) -> usize {
        match *self {
            Self::Tier {
                base_limit,
                elevated_limit,
            } => match tier {
                AccountTier::Base => base_limit,
                AccountTier::Elevated => elevated_limit,
            },
            Self::LegacyCount {
                base_limit,
                elevated_limit,
            } => {
                if current_count <= base_limit {
                    base_limit
                } else {
                    elevated_limit
                }
            }
        }
    }

    /// 剩余可用数量（已超限时为 0）。
    pub fn available(&self, current_count: usize, tier: AccountTier) -> usize {
        self.max(current_count, tier).saturating_sub(current_count)
    }

    /// 是否展示“升级档位”提示。
    pub fn should_show_upsell_hint(&self, current_count: usize, tier: AccountTier) -> bool {
        match *self {
            Self::Tier {
                base_limit,
                elevated_limit,
            } => tier == AccountTier::Base && current_count >= base_limit && base_limit < elevated_limit,
            Self::LegacyCount {
                base_limit,
                elevated_limit,
            } => current_count >= base_limit && current_count < elevated_limit,
        }
    }

    /// 汇总当前容量状态。
    pub fn status(&self, current_count: usize, tier: AccountTier) -> CapacityStatus {
        CapacityStatus {
            count: current_count,
            max: self.max(current_count, tier),
            available: self.available(current_count, tier),
            show_upsell_hint: self.should_show_upsell_hint(current_count, tier),
        }
    }
}

/// 容量状态快照（供 UI 展示）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityStatus {
    pub count: usize,
    pub max: usize,
    pub available: usize,
    pub show_upsell_hint: bool,
}

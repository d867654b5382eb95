//! 控件查找 - 业务能力层
//!
//! 页面上同一个控件在不同版本里的 ID 不一样，所以查找被建模成
//! 一串有序的查找策略：按顺序尝试，使用第一个命中的，并记录命中的是哪一级。

use regex::Regex;
use std::fmt;
use tracing::{debug, info};

use crate::config::SurfaceSelectors;
use crate::error::{AppError, AppResult, ConfigError};
use crate::infrastructure::{ControlHandle, Surface, SurfaceDriver};

/// 查找策略
#[derive(Debug, Clone)]
pub enum DiscoveryStrategy {
    /// 按选择器查找，取第一个匹配
    Selector(String),
    /// 扫描 `scope` 匹配的全部控件，取第一个文字匹配 `pattern` 的
    LabelScan { scope: String, pattern: Regex },
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryStrategy::Selector(selector) => write!(f, "选择器 {}", selector),
            DiscoveryStrategy::LabelScan { pattern, .. } => write!(f, "文字匹配 /{}/", pattern),
        }
    }
}

/// 命中结果
#[derive(Debug, Clone)]
pub struct FoundControl {
    pub handle: ControlHandle,
    /// 命中的策略序号（从 1 开始）
    pub tier: usize,
}

/// 有序的控件查找器
#[derive(Debug, Clone)]
pub struct ControlFinder {
    name: String,
    strategies: Vec<DiscoveryStrategy>,
}

impl ControlFinder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategies: Vec::new(),
        }
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.strategies.push(DiscoveryStrategy::Selector(selector.into()));
        self
    }

    pub fn selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for selector in selectors {
            self.strategies.push(DiscoveryStrategy::Selector(selector.into()));
        }
        self
    }

    pub fn label_scan(mut self, scope: impl Into<String>, pattern: &str) -> AppResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            AppError::Config(ConfigError::InvalidValue {
                name: format!("{} 文字匹配", self.name),
                value: pattern.to_string(),
                expected: e.to_string(),
            })
        })?;
        self.strategies.push(DiscoveryStrategy::LabelScan {
            scope: scope.into(),
            pattern,
        });
        Ok(self)
    }

    /// 总分重算按钮：稳定 ID → 常见 ID → 全量文字扫描
    pub fn recalc_total(selectors: &SurfaceSelectors) -> AppResult<Self> {
        Self::new("总分重算按钮")
            .selector(&selectors.recalc_primary)
            .selectors(&selectors.recalc_common)
            .label_scan(&selectors.recalc_scan_scope, &selectors.recalc_label_pattern)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategies(&self) -> &[DiscoveryStrategy] {
        &self.strategies
    }

    /// 按顺序尝试每一级策略
    pub async fn find(&self, driver: &dyn SurfaceDriver, surface: &Surface) -> AppResult<Option<FoundControl>> {
        for (idx, strategy) in self.strategies.iter().enumerate() {
            let tier = idx + 1;
            let hit = match strategy {
                DiscoveryStrategy::Selector(selector) => {
                    driver.query(surface, selector).await?.into_iter().next()
                }
                DiscoveryStrategy::LabelScan { scope, pattern } => driver
                    .query(surface, scope)
                    .await?
                    .into_iter()
                    .find(|handle| pattern.is_match(handle.label.trim())),
            };

            match hit {
                Some(handle) => {
                    info!("🎯 {} 命中第 {} 级策略 ({})", self.name, tier, strategy);
                    return Ok(Some(FoundControl { handle, tier }));
                }
                None => debug!("{} 第 {} 级策略未命中 ({})", self.name, tier, strategy),
            }
        }
        Ok(None)
    }
}

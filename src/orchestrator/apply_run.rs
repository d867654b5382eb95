//! 写回阶段 - 编排层
//!
//! ## 职责
//!
//! 1. **资源管理**：连接浏览器，持有 Browser 和唯一的页面驱动
//! 2. **状态订阅**：把页面上的网络响应喂给 `StatusTracker`
//! 3. **名单遍历**：按页面上的顺序逐个学生处理，不并发
//! 4. **失败隔离**：单个学生失败只记录日志；账本读写失败中止整个运行
//! 5. **统计**：已处理 / 跳过 / 失败

use anyhow::{Context, Result};
use chromiumoxide::Browser;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::browser::{connect_to_browser_and_page, BrowserSurface};
use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::{JsExecutor, SurfaceDriver};
use crate::models::load_rubric_dir;
use crate::services::{
    GradingPage, OpenAiOracle, OracleClient, PreviewExtractor, ResultStore, RosterEntry,
    StatusTracker,
};
use crate::utils::logging::{log_student_start, print_final_stats};
use crate::workflow::{StudentFlow, StudentOutcome};

/// 写回阶段统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyStats {
    pub total: usize,
    /// 已写入成绩
    pub processed: usize,
    /// 未提交
    pub not_submitted: usize,
    /// 页面上已评分
    pub already_graded: usize,
    /// 账本中没有成绩
    pub no_result: usize,
    /// 处理过程中出错
    pub failed: usize,
}

impl ApplyStats {
    pub fn skipped(&self) -> usize {
        self.not_submitted + self.already_graded + self.no_result
    }
}

/// 写回阶段
pub struct ApplyRun {
    config: Config,
    _browser: Browser,
    driver: BrowserSurface,
    flow: StudentFlow,
    tracker: StatusTracker,
    store: ResultStore,
}

impl ApplyRun {
    /// 连接浏览器、加载账本和评分标准
    pub async fn initialize(config: Config) -> Result<Self> {
        let selectors = config.load_selectors().context("加载选择器配置失败")?;

        let store = ResultStore::open(config.ledger_path()).context("加载账本失败")?;
        info!("💾 账本中已有 {} 条成绩", store.len());

        let rubrics = load_rubric_dir(&config.rubric_dir).await?;

        let roster_url = config.grading_url_for("");
        let url_hint = roster_url.split('?').next().unwrap_or(&roster_url);
        let (browser, page) = connect_to_browser_and_page(
            config.browser_debug_port,
            Some(&roster_url),
            Some(url_hint),
        )
        .await
        .context("连接浏览器失败")?;

        let driver = BrowserSurface::new(JsExecutor::new(page), &selectors.status_url_fragment);
        let client = Arc::new(OracleClient::new(
            Arc::new(OpenAiOracle::new(&config)),
            &config.comments.parse_failure,
        )?);
        let grading_page = GradingPage::new(&config, selectors)?;
        let flow = StudentFlow::new(
            &config,
            grading_page,
            client,
            Arc::new(PreviewExtractor),
            rubrics,
        );

        Ok(Self {
            config,
            _browser: browser,
            driver,
            flow,
            tracker: StatusTracker::new(),
            store,
        })
    }

    /// 遍历名单写回成绩
    pub async fn run(&mut self) -> Result<ApplyStats> {
        self.driver
            .subscribe_status_events(self.tracker.clone())
            .await?;

        let top = self.driver.navigate(&self.config.grading_url_for("")).await?;
        let roster = self.flow.page().roster(&self.driver, &top).await?;
        if roster.is_empty() {
            warn!("⚠️ 名单为空，程序结束");
            return Ok(ApplyStats::default());
        }
        info!("✓ 名单中共有 {} 个学生", roster.len());

        let stats = apply_roster(
            &self.driver,
            &self.flow,
            &self.tracker,
            &mut self.store,
            &roster,
        )
        .await
        .context("写回阶段中止")?;

        print_final_stats(
            stats.processed,
            stats.skipped(),
            stats.failed,
            stats.total,
            &self.config.output_log_file,
        );
        Ok(stats)
    }
}

/// 按名单顺序逐个处理学生
///
/// 每个学生有独立的失败边界；只有致命错误（账本读写）会向上传播。
pub async fn apply_roster(
    driver: &dyn SurfaceDriver,
    flow: &StudentFlow,
    tracker: &StatusTracker,
    store: &mut ResultStore,
    roster: &[RosterEntry],
) -> AppResult<ApplyStats> {
    let total = roster.len();
    let mut stats = ApplyStats {
        total,
        ..Default::default()
    };

    for (idx, student) in roster.iter().enumerate() {
        let position = idx + 1;
        log_student_start(&student.student_id, &student.name, position, total);

        match flow
            .run(driver, tracker, store, student, position, total)
            .await
        {
            Ok(StudentOutcome::Applied { applied, failed }) => {
                if failed > 0 {
                    warn!(
                        "[学生 {}] ⚠️ 写入 {} 题，失败 {} 题",
                        student.student_id, applied, failed
                    );
                }
                stats.processed += 1;
            }
            Ok(StudentOutcome::NotSubmitted) => stats.not_submitted += 1,
            Ok(StudentOutcome::AlreadyGraded) => stats.already_graded += 1,
            Ok(StudentOutcome::NoResult) => stats.no_result += 1,
            Err(e) if e.is_fatal() => {
                error!("[学生 {}] ❌ 致命错误，中止运行: {}", student.student_id, e);
                return Err(e);
            }
            Err(e) => {
                error!("[学生 {}] ❌ 处理失败，继续下一个: {}", student.student_id, e);
                stats.failed += 1;
            }
        }
    }

    Ok(stats)
}

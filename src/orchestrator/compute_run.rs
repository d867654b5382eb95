//! 计算阶段 - 编排层
//!
//! ## 职责
//!
//! 离线计算所有提交的成绩，不接触评分页面：
//!
//! 1. **扫描提交**：按文件名规则聚合成 `SubmissionRecord`
//! 2. **加载评分标准**：每题一份 `QuestionSpec`
//! 3. **跳过已有成绩**：账本中已存在的 `(学生, 题目)` 不再调用评分服务
//! 4. **评分**：同步（有并发上限）或批处理
//! 5. **落盘**：所有结果经唯一的写入者进入账本

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, OracleMode};
use crate::error::AppResult;
use crate::models::{load_rubric_dir, QuestionSpec, SubmissionRecord};
use crate::services::{
    BatchBackend, BatchRunner, BatchSettings, GradingRequest, LocalContentExtractor,
    OpenAiBatchBackend, OpenAiOracle, OracleClient, ResultStore, ResultWriter, ScoringOracle,
    SubmissionCorrelator,
};

/// 计算阶段统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ComputeStats {
    /// 扫描到的提交数
    pub submissions: usize,
    /// 账本中已有成绩而跳过的
    pub reused: usize,
    /// 缺少评分标准（或满分）而跳过的
    pub missing_rubric: usize,
    /// 没有可预览文件、留给人工评分的
    pub manual_grading: usize,
    /// 本次新算出的成绩数
    pub graded: usize,
}

/// 使用真实评分服务执行计算阶段
///
/// 按 Ctrl-C 会取消正在轮询的批处理任务。
pub async fn run_compute(config: &Config) -> Result<ComputeStats> {
    let oracle: Arc<dyn ScoringOracle> = Arc::new(OpenAiOracle::new(config));
    let backend: Arc<dyn BatchBackend> = Arc::new(OpenAiBatchBackend::new(config));

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⚠️ 收到中断信号，正在取消...");
                cancel.cancel();
            }
        })
    };

    let result = compute_with(config, oracle, backend, &cancel).await;
    watcher.abort();

    let stats = result.context("计算阶段失败")?;
    info!(
        "📊 计算阶段完成: 提交 {} / 复用 {} / 缺少评分标准 {} / 人工评分 {} / 新评分 {}",
        stats.submissions, stats.reused, stats.missing_rubric, stats.manual_grading, stats.graded
    );
    Ok(stats)
}

/// 计算阶段主体，评分服务和批处理接口由调用方提供
pub async fn compute_with(
    config: &Config,
    oracle: Arc<dyn ScoringOracle>,
    backend: Arc<dyn BatchBackend>,
    cancel: &CancellationToken,
) -> AppResult<ComputeStats> {
    let correlator = SubmissionCorrelator::new(config.assignment_mode, &config.assignment_id)?;

    info!("\n📁 正在扫描提交目录: {}", config.submissions_dir);
    let records = correlator
        .list_submissions(Path::new(&config.submissions_dir))
        .await?;
    info!("✓ 找到 {} 份提交", records.len());

    let rubrics = load_rubric_dir(&config.rubric_dir).await?;
    let store = ResultStore::open(config.ledger_path())?;
    info!("💾 账本中已有 {} 条成绩", store.len());

    let mut stats = ComputeStats {
        submissions: records.len(),
        ..Default::default()
    };
    let requests = build_requests(&records, &rubrics, &store, &mut stats).await?;

    if requests.is_empty() {
        info!("没有需要评分的提交");
        return Ok(stats);
    }

    let client = Arc::new(OracleClient::new(oracle, &config.comments.parse_failure)?);

    stats.graded = match config.oracle_mode {
        OracleMode::Sync => {
            let writer = ResultWriter::spawn(store, config.ledger_flush_every);
            let delivered = client
                .grade_all(requests, config.oracle_concurrency, writer.sender())
                .await?;
            writer.finish().await?;
            delivered
        }
        OracleMode::Batch => {
            let runner = BatchRunner::new(backend, client, BatchSettings::from_config(config));
            let (job, results) = runner.run(&requests, cancel).await?;
            info!("✓ 批处理任务 {} 结束，状态: {}", job.job_id, job.status);

            let writer = ResultWriter::spawn(store, config.ledger_flush_every);
            let sender = writer.sender();
            let mut delivered = 0;
            for result in results {
                if sender.send(result).await.is_ok() {
                    delivered += 1;
                }
            }
            drop(sender);
            writer.finish().await?;
            delivered
        }
    };

    Ok(stats)
}

/// 为每条没有成绩的提交构造评分请求
async fn build_requests(
    records: &[SubmissionRecord],
    rubrics: &HashMap<String, QuestionSpec>,
    store: &ResultStore,
    stats: &mut ComputeStats,
) -> AppResult<Vec<GradingRequest>> {
    let extractor = LocalContentExtractor;
    let mut requests = Vec::with_capacity(records.len());

    for record in records {
        if store.exists(&record.student_id, &record.question_id) {
            stats.reused += 1;
            continue;
        }

        let Some(spec) = rubrics.get(&record.question_id) else {
            warn!(
                "[学生 {}] ⚠️ 题目 {} 没有评分标准，跳过",
                record.student_id, record.question_id
            );
            stats.missing_rubric += 1;
            continue;
        };
        let Some(max_points) = spec.max_points else {
            warn!(
                "[学生 {}] ⚠️ 题目 {} 的评分标准没有满分，跳过",
                record.student_id, record.question_id
            );
            stats.missing_rubric += 1;
            continue;
        };

        let Some(content) = extractor.extract_record(record).await? else {
            warn!(
                "[学生 {}] ⚠️ 题目 {} 没有可预览的文件，留给人工评分",
                record.student_id, record.question_id
            );
            stats.manual_grading += 1;
            continue;
        };
        requests.push(GradingRequest {
            student_id: record.student_id.clone(),
            question_id: record.question_id.clone(),
            content,
            question_text: spec.question_text(),
            rubric: spec.rubric_text(max_points),
            max_points,
        });
    }

    Ok(requests)
}

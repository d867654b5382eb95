//! 学生处理流程 - 流程层
//!
//! 核心职责：定义"一个学生"的完整对账流程
//!
//! 流程顺序：
//! 1. 切换到该学生
//! 2. 查状态：未提交 → 0 分 + "未提交"；已评分 → 跳过
//! 3. 单题作业：写入账本中的成绩
//! 4. 多题作业：逐题判断题型并写入（每题互不影响）
//! 5. 收尾：重算总分，提交汇总评语

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{AssignmentMode, CommentTemplates, Config};
use crate::error::{AppError, AppResult, ParseError};
use crate::infrastructure::{Surface, SurfaceDriver};
use crate::models::question::format_points;
use crate::models::{GradingResult, QuestionSpec};
use crate::services::{
    ContentExtractor, Extraction, GradingPage, GradingRequest, OracleClient, QuestionSlot,
    ResultStore, RosterEntry, StatusTracker,
};
use crate::workflow::student_ctx::ReconciliationState;

/// 学生处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentOutcome {
    /// 已写入成绩
    Applied { applied: usize, failed: usize },
    /// 未提交，已标注
    NotSubmitted,
    /// 页面上已评分，未做任何操作
    AlreadyGraded,
    /// 账本中没有该学生的成绩
    NoResult,
}

/// 学生处理流程
///
/// - 编排单个学生的对账流程
/// - 不持有页面资源，只通过 `SurfaceDriver` 操作
/// - 账本只在这里追加，并按学生落盘
pub struct StudentFlow {
    page: GradingPage,
    client: Arc<OracleClient>,
    extractor: Arc<dyn ContentExtractor>,
    rubrics: HashMap<String, QuestionSpec>,
    mode: AssignmentMode,
    assignment_id: String,
    comments: CommentTemplates,
}

impl StudentFlow {
    pub fn new(
        config: &Config,
        page: GradingPage,
        client: Arc<OracleClient>,
        extractor: Arc<dyn ContentExtractor>,
        rubrics: HashMap<String, QuestionSpec>,
    ) -> Self {
        Self {
            page,
            client,
            extractor,
            rubrics,
            mode: config.assignment_mode,
            assignment_id: config.assignment_id.clone(),
            comments: config.comments.clone(),
        }
    }

    pub fn page(&self) -> &GradingPage {
        &self.page
    }

    pub async fn run(
        &self,
        driver: &dyn SurfaceDriver,
        tracker: &StatusTracker,
        store: &mut ResultStore,
        student: &RosterEntry,
        position: usize,
        total: usize,
    ) -> AppResult<StudentOutcome> {
        let mut state = ReconciliationState::new(&student.student_id, position, total);

        // ========== 1. 切换学生 ==========
        let top = self.page.select_student(driver, &student.student_id).await?;

        // ========== 2. 查状态 ==========
        let status = match tracker.get(&student.student_id) {
            Some(status) => status,
            None => {
                self.page
                    .probe_status(driver, &top, &student.student_id)
                    .await?
            }
        };

        if !status.has_submission {
            info!("{} 📭 未提交，标注 0 分", state);
            if let Err(e) = self.page.apply_score(driver, &top, 0.0).await {
                warn!("{} ⚠️ 写入 0 分失败: {}", state, e);
            }
            self.page
                .submit_comment(driver, &top, &self.comments.not_submitted)
                .await?;
            return Ok(StudentOutcome::NotSubmitted);
        }

        if status.has_graded {
            info!("{} ✓ 已评分，跳过", state);
            return Ok(StudentOutcome::AlreadyGraded);
        }

        // ========== 3/4. 按作业模式写入 ==========
        match self.mode {
            AssignmentMode::Single => self.apply_single(driver, &top, store, &state).await,
            AssignmentMode::Grouped => {
                self.apply_grouped(driver, &top, store, &mut state).await
            }
        }
    }

    /// 单题作业：一个学生一份成绩
    async fn apply_single(
        &self,
        driver: &dyn SurfaceDriver,
        top: &Surface,
        store: &ResultStore,
        state: &ReconciliationState,
    ) -> AppResult<StudentOutcome> {
        let Some(result) = store.get(&state.student_id, &self.assignment_id) else {
            warn!("{} ⚠️ 账本中没有该学生的成绩，跳过", state);
            return Ok(StudentOutcome::NoResult);
        };

        self.page.apply_score(driver, top, result.score).await?;
        info!("{} ✓ 已写入 {} 分", state, format_points(result.score));

        let full_mark = self
            .rubrics
            .get(&self.assignment_id)
            .and_then(|spec| spec.max_points)
            .map(|max| result.is_full_mark(max))
            .unwrap_or(false);
        let comment = if full_mark {
            self.comments.full_mark.as_str()
        } else {
            result.feedback.as_str()
        };

        self.page.submit_comment(driver, top, comment).await?;
        Ok(StudentOutcome::Applied {
            applied: 1,
            failed: 0,
        })
    }

    /// 多题作业：逐题处理，单题失败不影响其他题
    async fn apply_grouped(
        &self,
        driver: &dyn SurfaceDriver,
        top: &Surface,
        store: &mut ResultStore,
        state: &mut ReconciliationState,
    ) -> AppResult<StudentOutcome> {
        let frame = self.page.question_frame(driver, top).await?;
        let slots = self.page.questions_needing_review(driver, &frame).await?;

        if slots.is_empty() {
            info!("{} 没有需要复核的题目", state);
            return Ok(StudentOutcome::Applied {
                applied: 0,
                failed: 0,
            });
        }

        info!("{} 📝 {} 道题需要复核", state, slots.len());
        state.enqueue(slots);

        while let Some(slot) = state.next_question() {
            match self.apply_question(driver, store, state, &slot).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("{} ❌ 题目 {} 处理失败: {}", state, slot.question_id, e);
                    state.failed += 1;
                }
            }
        }

        // 本学生新算出的成绩先落盘
        if state.new_results > 0 {
            store.flush()?;
        }

        // ========== 5. 收尾 ==========
        self.page.recalc_total(driver, &frame).await?;

        let feedback = state.aggregated_feedback();
        if !feedback.is_empty() {
            self.page.submit_comment(driver, top, &feedback).await?;
        }

        Ok(StudentOutcome::Applied {
            applied: state.applied,
            failed: state.failed,
        })
    }

    async fn apply_question(
        &self,
        driver: &dyn SurfaceDriver,
        store: &mut ResultStore,
        state: &mut ReconciliationState,
        slot: &QuestionSlot,
    ) -> AppResult<()> {
        let question_id = slot.question_id.as_str();

        // 已有成绩优先，不再调用评分服务
        if let Some(existing) = store.get(&state.student_id, question_id).cloned() {
            info!("{} 题目 {}: 使用已有成绩", state, question_id);
            return self.write_result(driver, state, slot, &existing).await;
        }

        let content = if self.page.is_file_upload(driver, &slot.surface).await? {
            match self.extract_attachment(driver, state, slot).await {
                Some(content) => content,
                None => {
                    state.push_feedback(question_id, &self.comments.manual_grading);
                    return Ok(());
                }
            }
        } else {
            let answer = self.page.read_answer(driver, &slot.surface).await?;
            if answer.trim().is_empty() {
                info!("{} 题目 {}: 未作答，记 0 分", state, question_id);
                self.page.apply_score(driver, &slot.surface, 0.0).await?;
                state.applied += 1;
                state.push_feedback(question_id, &self.comments.no_answer);
                return Ok(());
            }
            answer
        };

        let request = self.build_request(driver, state, slot, content).await?;
        let result = self.client.grade(&request).await;
        store.add(result.clone());
        state.new_results += 1;

        self.write_result(driver, state, slot, &result).await
    }

    /// 抽取附件文本；不支持预览或抽取失败时返回 `None`（转人工）
    async fn extract_attachment(
        &self,
        driver: &dyn SurfaceDriver,
        state: &ReconciliationState,
        slot: &QuestionSlot,
    ) -> Option<String> {
        let attachment = match self.page.attachment(driver, &slot.surface).await {
            Ok(Some(attachment)) => attachment,
            Ok(None) => {
                warn!("{} ⚠️ 题目 {}: 没有找到附件，转人工评分", state, slot.question_id);
                return None;
            }
            Err(e) => {
                warn!("{} ⚠️ 题目 {}: 读取附件失败，转人工评分: {}", state, slot.question_id, e);
                return None;
            }
        };

        match self.extractor.extract(driver, &attachment).await {
            Ok(Extraction::Text(text)) => Some(text),
            Ok(Extraction::Unsupported { name }) => {
                info!("{} 题目 {}: {} 不支持预览，转人工评分", state, slot.question_id, name);
                None
            }
            Err(e) => {
                warn!(
                    "{} ⚠️ 题目 {}: 抽取 {} 失败，转人工评分: {}",
                    state, slot.question_id, attachment.name, e
                );
                None
            }
        }
    }

    async fn build_request(
        &self,
        driver: &dyn SurfaceDriver,
        state: &ReconciliationState,
        slot: &QuestionSlot,
        content: String,
    ) -> AppResult<GradingRequest> {
        let question_id = slot.question_id.as_str();
        let spec = self.rubrics.get(question_id).ok_or_else(|| {
            AppError::Parse(ParseError::Rubric {
                path: question_id.to_string(),
                reason: "缺少评分标准".to_string(),
            })
        })?;

        let page_max = self.page.read_max_points(driver, &slot.surface).await?;
        let max_points = page_max.or(spec.max_points).ok_or_else(|| {
            AppError::Parse(ParseError::Rubric {
                path: question_id.to_string(),
                reason: "页面和评分标准都没有满分".to_string(),
            })
        })?;

        let question_text = match &spec.description {
            Some(description) => description.clone(),
            None => self
                .page
                .read_question_text(driver, &slot.surface)
                .await?
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| spec.question_text()),
        };

        Ok(GradingRequest {
            student_id: state.student_id.clone(),
            question_id: question_id.to_string(),
            content,
            question_text,
            rubric: spec.rubric_text(max_points),
            max_points,
        })
    }

    async fn write_result(
        &self,
        driver: &dyn SurfaceDriver,
        state: &mut ReconciliationState,
        slot: &QuestionSlot,
        result: &GradingResult,
    ) -> AppResult<()> {
        self.page
            .apply_score(driver, &slot.surface, result.score)
            .await?;
        state.applied += 1;
        state.push_feedback(&slot.question_id, &result.feedback);
        info!(
            "{} ✓ 题目 {}: {} 分",
            state,
            slot.question_id,
            format_points(result.score)
        );
        Ok(())
    }
}

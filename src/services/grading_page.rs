//! 评分页面操作 - 业务能力层
//!
//! 把"选学生 / 读题目 / 写分数 / 写评语"翻译成 [`SurfaceDriver`] 的基本动作。
//! 不做流程判断，流程在 `workflow` 层。

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, SurfaceSelectors};
use crate::error::{AppError, AppResult};
use crate::infrastructure::{Surface, SurfaceDriver};
use crate::models::question::format_points;
use crate::models::StudentStatus;
use crate::services::content_extractor::Attachment;
use crate::services::control_finder::ControlFinder;

/// 名单中的一个学生
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub student_id: String,
    pub name: String,
}

/// 一道需要复核的题目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSlot {
    pub question_id: String,
    /// 以该题目为根的区域
    pub surface: Surface,
}

/// 分数是通过哪种控件写入的
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreControl {
    Numeric,
    /// 两态控件，写入的是 "complete" / "incomplete"
    Categorical,
}

/// 两态控件的取值
pub fn categorical_value(score: f64) -> &'static str {
    if score > 0.0 {
        "complete"
    } else {
        "incomplete"
    }
}

/// 从控件标识中取出题目 ID：`question_123456` → `123456`
pub fn question_id_from_ident(ident: &str) -> Option<String> {
    let digits: String = ident
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    (!digits.is_empty()).then_some(digits)
}

/// 从 "10 pts" / "满分 2.5" 这类文字中取第一个数字
pub fn parse_points(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let number: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.trim_end_matches('.').parse().ok()
}

/// 评分页面
pub struct GradingPage {
    selectors: SurfaceSelectors,
    grading_url: String,
    comment_timeout: Duration,
    numeric_score: ControlFinder,
    categorical_score: ControlFinder,
    recalc_total: ControlFinder,
}

impl GradingPage {
    pub fn new(config: &Config, selectors: SurfaceSelectors) -> AppResult<Self> {
        let numeric_score = ControlFinder::new("数值打分框").selectors(&selectors.numeric_score);
        let categorical_score =
            ControlFinder::new("两态打分控件").selectors(&selectors.categorical_score);
        let recalc_total = ControlFinder::recalc_total(&selectors)?;

        Ok(Self {
            selectors,
            grading_url: config.grading_url.clone(),
            comment_timeout: config.comment_confirm_timeout(),
            numeric_score,
            categorical_score,
            recalc_total,
        })
    }

    pub fn selectors(&self) -> &SurfaceSelectors {
        &self.selectors
    }

    fn url_for(&self, student_id: &str) -> String {
        self.grading_url.replace("{student_id}", student_id)
    }

    /// 读取学生名单，保持页面上的顺序
    pub async fn roster(&self, driver: &dyn SurfaceDriver, surface: &Surface) -> AppResult<Vec<RosterEntry>> {
        let items = driver.query(surface, &self.selectors.roster_item).await?;
        let roster: Vec<RosterEntry> = items
            .into_iter()
            .filter_map(|handle| {
                let student_id = handle.ident.filter(|id| !id.trim().is_empty())?;
                Some(RosterEntry {
                    student_id: student_id.trim().to_string(),
                    name: handle.label,
                })
            })
            .collect();
        Ok(roster)
    }

    /// 切换到某个学生，返回顶层区域
    pub async fn select_student(&self, driver: &dyn SurfaceDriver, student_id: &str) -> AppResult<Surface> {
        let top = driver.navigate(&self.url_for(student_id)).await?;
        let ready = driver
            .wait_for_signal(&top, &self.selectors.ready_signal, self.comment_timeout)
            .await?;
        if !ready {
            warn!("[学生 {}] ⚠️ 等待页面就绪超时，继续处理", student_id);
        }
        Ok(top)
    }

    /// 没有观察到状态事件时，直接探测页面
    pub async fn probe_status(
        &self,
        driver: &dyn SurfaceDriver,
        top: &Surface,
        student_id: &str,
    ) -> AppResult<StudentStatus> {
        let not_submitted = driver
            .probe_capability(top, &self.selectors.not_submitted_marker)
            .await?;
        let graded = driver.probe_capability(top, &self.selectors.graded_marker).await?;
        debug!(
            "[学生 {}] 页面探测: 未提交={} 已评分={}",
            student_id, not_submitted, graded
        );
        Ok(StudentStatus {
            student_id: student_id.to_string(),
            has_submission: !not_submitted,
            has_graded: graded,
        })
    }

    /// 进入题目所在的内嵌页面
    pub async fn question_frame(&self, driver: &dyn SurfaceDriver, top: &Surface) -> AppResult<Surface> {
        driver
            .enter_sub_surface(top, &self.selectors.question_frame)
            .await?
            .ok_or_else(|| AppError::control_not_found(&self.selectors.question_frame))
    }

    /// 需要复核的题目，按页面顺序
    pub async fn questions_needing_review(
        &self,
        driver: &dyn SurfaceDriver,
        frame: &Surface,
    ) -> AppResult<Vec<QuestionSlot>> {
        let handles = driver
            .query(frame, &self.selectors.question_needs_review)
            .await?;
        let slots = handles
            .iter()
            .map(|handle| QuestionSlot {
                question_id: handle
                    .ident
                    .as_deref()
                    .and_then(question_id_from_ident)
                    .unwrap_or_else(|| format!("{}", handle.index + 1)),
                surface: Surface::within(handle),
            })
            .collect();
        Ok(slots)
    }

    pub async fn is_file_upload(&self, driver: &dyn SurfaceDriver, question: &Surface) -> AppResult<bool> {
        driver
            .probe_capability(question, &self.selectors.file_upload_probe)
            .await
    }

    /// 文字题作答内容，没有作答区域时视为空
    pub async fn read_answer(&self, driver: &dyn SurfaceDriver, question: &Surface) -> AppResult<String> {
        self.read_first(driver, question, &self.selectors.text_answer)
            .await
            .map(|text| text.unwrap_or_default())
    }

    pub async fn read_question_text(
        &self,
        driver: &dyn SurfaceDriver,
        question: &Surface,
    ) -> AppResult<Option<String>> {
        self.read_first(driver, question, &self.selectors.question_text).await
    }

    /// 页面上标注的题目满分
    pub async fn read_max_points(&self, driver: &dyn SurfaceDriver, question: &Surface) -> AppResult<Option<f64>> {
        let text = self
            .read_first(driver, question, &self.selectors.question_points)
            .await?;
        Ok(text.as_deref().and_then(parse_points))
    }

    /// 文件上传题的第一个附件
    pub async fn attachment(&self, driver: &dyn SurfaceDriver, question: &Surface) -> AppResult<Option<Attachment>> {
        let links = driver
            .query(question, &self.selectors.attachment_link)
            .await?;
        Ok(links.iter().find_map(Attachment::from_handle))
    }

    /// 写入分数：先找数值输入框，没有再找两态控件
    pub async fn apply_score(
        &self,
        driver: &dyn SurfaceDriver,
        surface: &Surface,
        score: f64,
    ) -> AppResult<ScoreControl> {
        if let Some(found) = self.numeric_score.find(driver, surface).await? {
            driver.set_value(&found.handle, &format_points(score)).await?;
            return Ok(ScoreControl::Numeric);
        }

        if let Some(found) = self.categorical_score.find(driver, surface).await? {
            driver
                .set_value(&found.handle, categorical_value(score))
                .await?;
            return Ok(ScoreControl::Categorical);
        }

        Err(AppError::control_not_found(format!("打分控件 ({})", surface)))
    }

    /// 点击"更新分数"，找不到时只记录警告
    pub async fn recalc_total(&self, driver: &dyn SurfaceDriver, surface: &Surface) -> AppResult<bool> {
        match self.recalc_total.find(driver, surface).await? {
            Some(found) => {
                driver.click(&found.handle).await?;
                Ok(true)
            }
            None => {
                warn!("⚠️ 未找到{}，跳过总分重算", self.recalc_total.name());
                Ok(false)
            }
        }
    }

    /// 提交评语并等待保存确认，返回是否确认
    pub async fn submit_comment(&self, driver: &dyn SurfaceDriver, top: &Surface, comment: &str) -> AppResult<bool> {
        let comment_box = driver
            .query(top, &self.selectors.comment_box)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::control_not_found(&self.selectors.comment_box))?;
        driver.set_value(&comment_box, comment).await?;

        let submit = driver
            .query(top, &self.selectors.comment_submit)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::control_not_found(&self.selectors.comment_submit))?;
        driver.click(&submit).await?;

        let confirmed = driver
            .wait_for_signal(top, &self.selectors.comment_saved_signal, self.comment_timeout)
            .await?;
        if confirmed {
            info!("💬 评语已保存");
        } else {
            warn!("⚠️ {} 秒内未看到评语保存确认，继续处理", self.comment_timeout.as_secs());
        }
        Ok(confirmed)
    }

    async fn read_first(
        &self,
        driver: &dyn SurfaceDriver,
        surface: &Surface,
        selector: &str,
    ) -> AppResult<Option<String>> {
        match driver.query(surface, selector).await?.first() {
            Some(handle) => Ok(Some(driver.read_text(handle).await?.trim().to_string())),
            None => Ok(None),
        }
    }
}

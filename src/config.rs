use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, AppResult, ConfigError};

/// 运行阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    /// 只调用评分服务生成成绩（可离线于评分页面）
    Compute,
    /// 只把账本中的成绩写回评分页面
    Apply,
    /// 先计算后写回
    All,
}

impl RunPhase {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compute" => Some(RunPhase::Compute),
            "apply" => Some(RunPhase::Apply),
            "all" => Some(RunPhase::All),
            _ => None,
        }
    }

    pub fn includes_compute(self) -> bool {
        matches!(self, RunPhase::Compute | RunPhase::All)
    }

    pub fn includes_apply(self) -> bool {
        matches!(self, RunPhase::Apply | RunPhase::All)
    }
}

/// 作业模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssignmentMode {
    /// 单题作业：一个学生只有一份成绩
    Single,
    /// 多题作业：按题目分组
    Grouped,
}

impl AssignmentMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" => Some(AssignmentMode::Single),
            "grouped" | "group" | "multi" => Some(AssignmentMode::Grouped),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentMode::Single => "single",
            AssignmentMode::Grouped => "grouped",
        }
    }
}

/// 评分服务调用方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OracleMode {
    /// 逐条同步调用（有并发上限）
    Sync,
    /// 打包成一个批处理任务
    Batch,
}

impl OracleMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" => Some(OracleMode::Sync),
            "batch" => Some(OracleMode::Batch),
            _ => None,
        }
    }
}

/// 写给学生的固定评语
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CommentTemplates {
    /// 未提交
    pub not_submitted: String,
    /// 文字题未作答
    pub no_answer: String,
    /// 文件无法预览，需要人工评分
    pub manual_grading: String,
    /// 满分时替代原始评语
    pub full_mark: String,
    /// 评分服务返回内容无法解析
    pub parse_failure: String,
}

impl Default for CommentTemplates {
    fn default() -> Self {
        Self {
            not_submitted: "未提交".to_string(),
            no_answer: "未作答".to_string(),
            manual_grading: "该文件无法自动预览，需要人工评分".to_string(),
            full_mark: "满分，完成得很好！".to_string(),
            parse_failure: "自动评分结果无法解析，请联系助教复核".to_string(),
        }
    }
}

/// 评分页面控件定位配置
///
/// 每一项都是 CSS 选择器；列表类字段按顺序作为多级查找策略。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SurfaceSelectors {
    /// 学生名单中的每一项
    pub roster_item: String,
    /// 页面加载完成的标志
    pub ready_signal: String,
    /// "该学生未提交"提示
    pub not_submitted_marker: String,
    /// "已评分"提示
    pub graded_marker: String,
    /// 题目所在的内嵌页面
    pub question_frame: String,
    /// 需要复核的题目
    pub question_needs_review: String,
    /// 判定为文件上传题的特征
    pub file_upload_probe: String,
    /// 文件上传题的附件链接
    pub attachment_link: String,
    /// 文字题作答内容
    pub text_answer: String,
    /// 题干
    pub question_text: String,
    /// 题目满分
    pub question_points: String,
    /// 数值打分输入框（按顺序尝试）
    pub numeric_score: Vec<String>,
    /// 两态（完成/未完成）打分控件（按顺序尝试）
    pub categorical_score: Vec<String>,
    /// 总分重算按钮：稳定 ID
    pub recalc_primary: String,
    /// 总分重算按钮：常见 ID
    pub recalc_common: Vec<String>,
    /// 总分重算按钮：全量扫描的控件范围
    pub recalc_scan_scope: String,
    /// 总分重算按钮：文字匹配（正则）
    pub recalc_label_pattern: String,
    /// 评语输入框
    pub comment_box: String,
    /// 评语提交按钮
    pub comment_submit: String,
    /// 评语保存成功的标志
    pub comment_saved_signal: String,
    /// 学生状态接口地址中的特征片段
    pub status_url_fragment: String,
}

impl Default for SurfaceSelectors {
    fn default() -> Self {
        Self {
            roster_item: "#students_selectmenu option".to_string(),
            ready_signal: "#speed_grader_comment_textarea".to_string(),
            not_submitted_marker: "#this_student_does_not_have_a_submission:not([style*='display: none'])"
                .to_string(),
            graded_marker: ".submission-graded-marker".to_string(),
            question_frame: "iframe#speedgrader_iframe".to_string(),
            question_needs_review: ".question_holder .question.needs_review".to_string(),
            file_upload_probe: ".file_upload_question, .file-upload-question-attachment".to_string(),
            attachment_link: ".file-upload-question-attachment a".to_string(),
            text_answer: ".quiz_response_text".to_string(),
            question_text: ".question_text".to_string(),
            question_points: ".question_points_holder .points".to_string(),
            numeric_score: vec![
                ".user_points input.question_input".to_string(),
                "input#grading-box-extended".to_string(),
            ],
            categorical_score: vec![
                ".user_points select".to_string(),
                "select#grading-box-extended".to_string(),
            ],
            recalc_primary: "button#update-scores".to_string(),
            recalc_common: vec![
                "button.update-scores".to_string(),
                "#update_scores_button".to_string(),
                "button.update_scores".to_string(),
            ],
            recalc_scan_scope: "button, input[type='submit'], a.btn".to_string(),
            recalc_label_pattern: r"(?i)update\s*scores|recalculate|更新分数|重新计算".to_string(),
            comment_box: "#speed_grader_comment_textarea".to_string(),
            comment_submit: "#comment_submit_button".to_string(),
            comment_saved_signal: ".comment_list .comment:last-child".to_string(),
            status_url_fragment: "/submissions".to_string(),
        }
    }
}

impl SurfaceSelectors {
    /// 从 TOML 文件加载，未出现的字段使用默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(ConfigError::SelectorFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        })?;
        toml::from_str(&content).map_err(|e| {
            AppError::Config(ConfigError::SelectorFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        })
    }
}

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 运行阶段
    pub phase: RunPhase,
    /// 作业模式
    pub assignment_mode: AssignmentMode,
    /// 作业 ID（单题模式下同时作为题目 ID）
    pub assignment_id: String,
    /// 学生提交文件目录
    pub submissions_dir: String,
    /// 评分标准目录
    pub rubric_dir: String,
    /// 成绩账本目录
    pub results_dir: String,
    /// 批处理临时文件目录
    pub batch_work_dir: String,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    /// 同步模式下同时在途的请求数
    pub oracle_concurrency: usize,
    pub oracle_mode: OracleMode,
    /// 批处理轮询间隔（秒）
    pub batch_poll_interval_secs: u64,
    /// 批处理总等待上限（秒）
    pub batch_ceiling_secs: u64,
    /// 账本写入者每收到多少条结果落盘一次
    pub ledger_flush_every: usize,
    // --- 评分页面配置 ---
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 评分页面地址，`{student_id}` 会被替换
    pub grading_url: String,
    /// 等待评语保存确认的时间（秒）
    pub comment_confirm_timeout_secs: u64,
    /// 选择器覆盖文件（可选）
    pub selectors_file: Option<String>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    pub comments: CommentTemplates,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            phase: RunPhase::All,
            assignment_mode: AssignmentMode::Grouped,
            assignment_id: "000000".to_string(),
            submissions_dir: "submissions".to_string(),
            rubric_dir: "rubrics".to_string(),
            results_dir: "results".to_string(),
            batch_work_dir: "batch_work".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_temperature: 0.2,
            llm_max_tokens: 1024,
            oracle_concurrency: 8,
            oracle_mode: OracleMode::Sync,
            batch_poll_interval_secs: 60,
            batch_ceiling_secs: 24 * 60 * 60,
            ledger_flush_every: 20,
            browser_debug_port: 9222,
            grading_url: "http://localhost/speed_grader?student_id={student_id}".to_string(),
            comment_confirm_timeout_secs: 10,
            selectors_file: None,
            verbose_logging: false,
            output_log_file: "grading_log.txt".to_string(),
            comments: CommentTemplates::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            phase: env_parsed("RUN_PHASE", RunPhase::parse).unwrap_or(default.phase),
            assignment_mode: env_parsed("ASSIGNMENT_MODE", AssignmentMode::parse)
                .unwrap_or(default.assignment_mode),
            assignment_id: std::env::var("ASSIGNMENT_ID").unwrap_or(default.assignment_id),
            submissions_dir: std::env::var("SUBMISSIONS_DIR").unwrap_or(default.submissions_dir),
            rubric_dir: std::env::var("RUBRIC_DIR").unwrap_or(default.rubric_dir),
            results_dir: std::env::var("RESULTS_DIR").unwrap_or(default.results_dir),
            batch_work_dir: std::env::var("BATCH_WORK_DIR").unwrap_or(default.batch_work_dir),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            llm_temperature: std::env::var("LLM_TEMPERATURE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_temperature),
            llm_max_tokens: std::env::var("LLM_MAX_TOKENS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_max_tokens),
            oracle_concurrency: std::env::var("ORACLE_CONCURRENCY").ok().and_then(|v| v.parse().ok()).filter(|n| *n > 0).unwrap_or(default.oracle_concurrency),
            oracle_mode: env_parsed("ORACLE_MODE", OracleMode::parse).unwrap_or(default.oracle_mode),
            batch_poll_interval_secs: std::env::var("BATCH_POLL_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.batch_poll_interval_secs),
            batch_ceiling_secs: std::env::var("BATCH_CEILING_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.batch_ceiling_secs),
            ledger_flush_every: std::env::var("LEDGER_FLUSH_EVERY").ok().and_then(|v| v.parse().ok()).filter(|n| *n > 0).unwrap_or(default.ledger_flush_every),
            browser_debug_port: std::env::var("BROWSER_DEBUG_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.browser_debug_port),
            grading_url: std::env::var("GRADING_URL").unwrap_or(default.grading_url),
            comment_confirm_timeout_secs: std::env::var("COMMENT_CONFIRM_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.comment_confirm_timeout_secs),
            selectors_file: std::env::var("SELECTORS_FILE").ok().or(default.selectors_file),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            comments: default.comments,
        }
    }

    /// 本次作业对应的账本文件：每个作业一个文件
    pub fn ledger_path(&self) -> PathBuf {
        Path::new(&self.results_dir).join(format!("grades_{}.json", self.assignment_id))
    }

    pub fn batch_poll_interval(&self) -> Duration {
        Duration::from_secs(self.batch_poll_interval_secs)
    }

    pub fn batch_ceiling(&self) -> Duration {
        Duration::from_secs(self.batch_ceiling_secs)
    }

    pub fn comment_confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.comment_confirm_timeout_secs)
    }

    /// 加载选择器配置：没有指定文件时使用默认值
    pub fn load_selectors(&self) -> AppResult<SurfaceSelectors> {
        match &self.selectors_file {
            Some(path) => SurfaceSelectors::from_toml_file(Path::new(path)),
            None => Ok(SurfaceSelectors::default()),
        }
    }

    /// 生成某个学生的评分页面地址
    pub fn grading_url_for(&self, student_id: &str) -> String {
        self.grading_url.replace("{student_id}", student_id)
    }
}

fn env_parsed<T>(name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        tracing::warn!("⚠️ 环境变量 {} 的值 '{}' 无法识别，使用默认值", name, raw);
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_path_is_per_assignment() {
        let config = Config {
            results_dir: "out".to_string(),
            assignment_id: "123456".to_string(),
            ..Default::default()
        };
        assert_eq!(config.ledger_path(), Path::new("out").join("grades_123456.json"));
    }

    #[test]
    fn test_grading_url_placeholder() {
        let config = Config {
            grading_url: "https://lms.example/grade?student_id={student_id}&a=1".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.grading_url_for("654321"),
            "https://lms.example/grade?student_id=654321&a=1"
        );
    }

    #[test]
    fn test_selectors_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selectors.toml");
        std::fs::write(&path, "comment_box = \"#my_comment\"\nrecalc_common = [\"#a\", \"#b\"]\n").unwrap();

        let selectors = SurfaceSelectors::from_toml_file(&path).unwrap();
        assert_eq!(selectors.comment_box, "#my_comment");
        assert_eq!(selectors.recalc_common, vec!["#a", "#b"]);
        assert_eq!(selectors.comment_submit, SurfaceSelectors::default().comment_submit);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(AssignmentMode::parse("Single"), Some(AssignmentMode::Single));
        assert_eq!(AssignmentMode::parse("group"), Some(AssignmentMode::Grouped));
        assert_eq!(RunPhase::parse("apply"), Some(RunPhase::Apply));
        assert_eq!(OracleMode::parse("batch"), Some(OracleMode::Batch));
        assert_eq!(OracleMode::parse("other"), None);
    }
}

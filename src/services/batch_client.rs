//! 批处理评分 - 业务能力层
//!
//! 把所有评分请求打包成一个批处理任务：
//! 写输入文件 → 上传并创建任务 → 定时轮询 → 下载输出 → 按关联标识拆回成绩
//!
//! 总等待时间超过上限时整个批次失败；轮询可以被外部取消。
//! 超时或取消时删除本地输入文件，任务状态保持最后一次观察到的值。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, BatchError, ParseError};
use crate::models::{BatchJob, BatchStatus, GradingResult};
use crate::services::oracle_client::{GradingRequest, OracleClient};

/// 批处理请求的目标接口
pub const CHAT_COMPLETIONS_URL: &str = "/v1/chat/completions";

/// 远端任务的一次状态快照
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteJobState {
    pub status: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
}

/// 批处理接口
#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// 上传输入文件，返回文件 ID
    async fn upload_input(&self, path: &Path) -> AppResult<String>;
    /// 用已上传的输入文件创建任务，返回任务 ID
    async fn create_job(&self, input_file_id: &str) -> AppResult<String>;
    async fn job_state(&self, job_id: &str) -> AppResult<RemoteJobState>;
    /// 下载文件内容
    async fn download(&self, file_id: &str) -> AppResult<String>;
}

/// OpenAI 兼容的批处理接口（`/files` + `/batches`）
pub struct OpenAiBatchBackend {
    http: reqwest::Client,
    api_base_url: String,
    api_key: String,
}

impl OpenAiBatchBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url: config.llm_api_base_url.trim_end_matches('/').to_string(),
            api_key: config.llm_api_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[async_trait]
impl BatchBackend for OpenAiBatchBackend {
    async fn upload_input(&self, path: &Path) -> AppResult<String> {
        let bytes = fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "batch_input.jsonl".to_string());

        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

        let uploaded: IdOnly = self
            .http
            .post(self.url("/files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("批处理输入文件已上传: {}", uploaded.id);
        Ok(uploaded.id)
    }

    async fn create_job(&self, input_file_id: &str) -> AppResult<String> {
        let created: IdOnly = self
            .http
            .post(self.url("/batches"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "input_file_id": input_file_id,
                "endpoint": CHAT_COMPLETIONS_URL,
                "completion_window": "24h",
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(created.id)
    }

    async fn job_state(&self, job_id: &str) -> AppResult<RemoteJobState> {
        let state: RemoteJobState = self
            .http
            .get(self.url(&format!("/batches/{}", job_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(state)
    }

    async fn download(&self, file_id: &str) -> AppResult<String> {
        let text = self
            .http
            .get(self.url(&format!("/files/{}/content", file_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }
}

/// 批处理参数
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub work_dir: PathBuf,
    pub poll_interval: Duration,
    pub ceiling: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl BatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            work_dir: PathBuf::from(&config.batch_work_dir),
            poll_interval: config.batch_poll_interval(),
            ceiling: config.batch_ceiling(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }
}

/// 批处理评分执行器
pub struct BatchRunner {
    backend: Arc<dyn BatchBackend>,
    client: Arc<OracleClient>,
    settings: BatchSettings,
}

impl BatchRunner {
    pub fn new(backend: Arc<dyn BatchBackend>, client: Arc<OracleClient>, settings: BatchSettings) -> Self {
        Self {
            backend,
            client,
            settings,
        }
    }

    /// 完整执行一个批次，返回任务和解析出的成绩
    pub async fn run(
        &self,
        requests: &[GradingRequest],
        cancel: &CancellationToken,
    ) -> AppResult<(BatchJob, Vec<GradingResult>)> {
        let max_points: HashMap<String, f64> = requests
            .iter()
            .map(|r| (r.correlation_token(), r.max_points))
            .collect();

        let mut job = self.submit(requests).await?;
        self.wait(&mut job, cancel).await?;
        let results = self.collect(&mut job, &max_points).await?;
        Ok((job, results))
    }

    /// 写输入文件，每行一个请求
    pub async fn write_input_artifact(&self, requests: &[GradingRequest]) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.settings.work_dir).await?;
        let path = self.settings.work_dir.join(format!(
            "batch_input_{}.jsonl",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));

        let mut lines = String::new();
        for request in requests {
            let line = json!({
                "custom_id": request.correlation_token(),
                "method": "POST",
                "url": CHAT_COMPLETIONS_URL,
                "body": self.client.chat_body(request, self.settings.temperature, self.settings.max_tokens),
            });
            lines.push_str(&serde_json::to_string(&line)?);
            lines.push('\n');
        }

        fs::write(&path, lines).await?;
        info!("📝 批处理输入文件: {} ({} 条请求)", path.display(), requests.len());
        Ok(path)
    }

    /// 写输入文件并提交任务
    pub async fn submit(&self, requests: &[GradingRequest]) -> AppResult<BatchJob> {
        let input_path = self.write_input_artifact(requests).await?;
        let file_id = self.backend.upload_input(&input_path).await?;
        let job_id = self.backend.create_job(&file_id).await?;
        info!("📤 批处理任务已提交: {}", job_id);
        Ok(BatchJob::submitted(job_id, input_path))
    }

    /// 轮询直到终止状态
    ///
    /// - 超过总等待上限：`BatchError::Timeout`
    /// - 外部取消：`BatchError::Cancelled`
    /// - 以非 `completed` 状态结束：`BatchError::NotCompleted`
    pub async fn wait(&self, job: &mut BatchJob, cancel: &CancellationToken) -> AppResult<()> {
        let started = Instant::now();
        let deadline = started + self.settings.ceiling;
        let mut output_file_id = None;
        let mut error_file_id = None;

        loop {
            if Instant::now() >= deadline {
                self.release_input(job).await;
                return Err(AppError::Batch(BatchError::Timeout {
                    job_id: job.job_id.clone(),
                    elapsed_secs: started.elapsed().as_secs(),
                    last_status: job.status.to_string(),
                }));
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => return Err(self.cancel_job(job).await),
                polled = self.backend.job_state(&job.job_id) => polled,
            };
            match polled {
                Ok(state) => match BatchStatus::from_remote(&state.status) {
                    Some(status) => {
                        if job.observe(status) {
                            info!("🔄 批处理任务 {} 状态: {}", job.job_id, job.status);
                        }
                        output_file_id = state.output_file_id.or(output_file_id);
                        error_file_id = state.error_file_id.or(error_file_id);
                    }
                    None => warn!("未知的批处理状态: {}", state.status),
                },
                Err(e) => warn!("⚠️ 查询批处理状态失败，稍后重试: {}", e),
            }

            if job.status.is_terminal() {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                _ = cancel.cancelled() => return Err(self.cancel_job(job).await),
                _ = tokio::time::sleep(self.settings.poll_interval.min(remaining)) => {}
            }
        }

        if job.status != BatchStatus::Completed {
            error!("❌ 批处理任务 {} 结束于 {}", job.job_id, job.status);
            return Err(AppError::Batch(BatchError::NotCompleted {
                job_id: job.job_id.clone(),
                status: job.status.to_string(),
            }));
        }

        let output_file_id = output_file_id.ok_or_else(|| {
            AppError::Batch(BatchError::MissingOutput {
                job_id: job.job_id.clone(),
            })
        })?;
        job.output_artifact_path = Some(self.download_artifact(&output_file_id, &job.job_id, "output").await?);
        if let Some(error_file_id) = error_file_id {
            job.error_artifact_path = Some(self.download_artifact(&error_file_id, &job.job_id, "error").await?);
        }

        info!("✅ 批处理任务 {} 已完成", job.job_id);
        Ok(())
    }

    /// 放弃等待：删除输入文件，返回取消错误
    async fn cancel_job(&self, job: &BatchJob) -> AppError {
        self.release_input(job).await;
        AppError::Batch(BatchError::Cancelled {
            job_id: job.job_id.clone(),
            last_status: job.status.to_string(),
        })
    }

    /// 解析已下载的输出文件（以及错误文件）
    pub async fn collect(
        &self,
        job: &mut BatchJob,
        max_points: &HashMap<String, f64>,
    ) -> AppResult<Vec<GradingResult>> {
        let output_path = job.output_artifact_path.clone().ok_or_else(|| {
            AppError::Batch(BatchError::MissingOutput {
                job_id: job.job_id.clone(),
            })
        })?;

        let output = fs::read_to_string(&output_path).await?;
        let mut results = self.parse_output(&output, max_points);

        if let Some(error_path) = &job.error_artifact_path {
            let errors = fs::read_to_string(error_path).await?;
            results.extend(self.parse_output(&errors, max_points));
        }

        info!("📥 批处理任务 {} 解析出 {} 条成绩", job.job_id, results.len());
        Ok(results)
    }

    /// 逐行解析输出，格式错误的行记录日志后跳过
    pub fn parse_output(&self, content: &str, max_points: &HashMap<String, f64>) -> Vec<GradingResult> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(no, line)| match self.parse_line(line, max_points) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("⚠️ 跳过第 {} 行: {}", no + 1, e);
                    None
                }
            })
            .collect()
    }

    fn parse_line(&self, line: &str, max_points: &HashMap<String, f64>) -> AppResult<GradingResult> {
        let bad_line = |reason: &str| AppError::Parse(ParseError::BatchLine {
            reason: reason.to_string(),
        });

        let value: JsonValue = serde_json::from_str(line).map_err(|e| bad_line(&e.to_string()))?;
        let token = value
            .get("custom_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| bad_line("缺少 custom_id"))?;
        let (student_id, question_id) = split_token(token).ok_or_else(|| bad_line(&format!("无法拆分关联标识 '{}'", token)))?;
        let max = *max_points
            .get(token)
            .ok_or_else(|| bad_line(&format!("关联标识 '{}' 不属于本批次", token)))?;

        if let Some(reason) = line_error(&value) {
            warn!("[学生 {}] 题目 {} 批处理请求失败: {}", student_id, question_id, reason);
            return Ok(GradingResult::degraded(student_id, question_id, reason));
        }

        let content = value
            .pointer("/response/body/choices/0/message/content")
            .and_then(|v| v.as_str());

        match content {
            Some(content) => {
                let parsed = self.client.parser().parse(content, max);
                Ok(GradingResult::new(student_id, question_id, parsed.score, parsed.feedback))
            }
            None => Ok(GradingResult::degraded(student_id, question_id, "评分服务返回内容为空")),
        }
    }

    async fn download_artifact(&self, file_id: &str, job_id: &str, kind: &str) -> AppResult<PathBuf> {
        let content = self.backend.download(file_id).await?;
        fs::create_dir_all(&self.settings.work_dir).await?;
        let path = self.settings.work_dir.join(format!("{}_{}.jsonl", job_id, kind));
        fs::write(&path, content).await?;
        debug!("已下载 {} 文件: {}", kind, path.display());
        Ok(path)
    }

    async fn release_input(&self, job: &BatchJob) {
        if let Err(e) = fs::remove_file(&job.input_artifact_path).await {
            warn!("删除批处理输入文件失败 {}: {}", job.input_artifact_path.display(), e);
        }
    }
}

/// `"{studentId}_{questionId}"` → `(studentId, questionId)`，以第一个 `_` 分割
pub fn split_token(token: &str) -> Option<(&str, &str)> {
    let (student_id, question_id) = token.split_once('_')?;
    if student_id.is_empty() || question_id.is_empty() {
        return None;
    }
    Some((student_id, question_id))
}

/// 某一行是否代表失败的请求，是则返回原因
fn line_error(value: &JsonValue) -> Option<String> {
    if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Some(message);
    }

    let status = value.pointer("/response/status_code").and_then(|v| v.as_u64());
    match status {
        Some(200) | None => None,
        Some(code) => {
            let message = value
                .pointer("/response/body/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("未知错误");
            Some(format!("HTTP {}: {}", code, message))
        }
    }
}

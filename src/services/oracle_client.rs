//! 评分服务客户端 - 业务能力层
//!
//! 只负责"给一份提交打分"，不关心页面和流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（自定义端点和模型）
//!
//! ## 降级策略
//! 网络错误、空回复、无法解析的回复都不会向上抛出，
//! 而是得到 0 分并附上原因，保证整个名单能处理完。

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, OracleError};
use crate::models::question::format_points;
use crate::models::GradingResult;
use crate::services::response_parser::{ParseMethod, ResponseParser};

const SYSTEM_MESSAGE: &str = "你是一名严谨的助教，负责根据评分标准给学生的作业打分。\
只返回一个 JSON 对象，格式为 {\"grade\": <数字>, \"comment\": \"<评语>\"}，不要返回任何其他内容。";

/// 一次评分请求
#[derive(Debug, Clone, PartialEq)]
pub struct GradingRequest {
    pub student_id: String,
    pub question_id: String,
    /// 学生提交的内容（已抽取为文本）
    pub content: String,
    pub question_text: String,
    /// 已替换满分占位符的评分标准
    pub rubric: String,
    pub max_points: f64,
}

impl GradingRequest {
    /// 批处理中用于关联结果的标识
    pub fn correlation_token(&self) -> String {
        format!("{}_{}", self.student_id, self.question_id)
    }
}

/// 评分服务（黑盒）
///
/// 只暴露"发一条消息，拿回一段文本"的能力。
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// 模型名称，仅用于日志和批处理请求体
    fn model_name(&self) -> &str;

    async fn complete(&self, system_message: &str, user_message: &str) -> AppResult<String>;
}

/// OpenAI 兼容的评分服务
pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiOracle {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }
}

#[async_trait]
impl ScoringOracle for OpenAiOracle {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, system_message: &str, user_message: &str) -> AppResult<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let build_err = |e: async_openai::error::OpenAIError| {
            AppError::Oracle(OracleError::RequestBuild(e.to_string()))
        };

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_message)
            .build()
            .map_err(build_err)?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(build_err)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(build_err)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            AppError::llm_api_failed(&self.model_name, e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                AppError::Oracle(OracleError::EmptyContent {
                    model: self.model_name.clone(),
                })
            })?;

        Ok(content.trim().to_string())
    }
}

/// 评分客户端
///
/// 职责：
/// - 构造评分提示词
/// - 调用评分服务并解析回复
/// - 失败时给出降级结果
pub struct OracleClient {
    oracle: Arc<dyn ScoringOracle>,
    parser: ResponseParser,
}

impl OracleClient {
    pub fn new(oracle: Arc<dyn ScoringOracle>, parse_failure_comment: &str) -> AppResult<Self> {
        Ok(Self {
            oracle,
            parser: ResponseParser::new(parse_failure_comment)?,
        })
    }

    pub fn parser(&self) -> &ResponseParser {
        &self.parser
    }

    pub fn model_name(&self) -> &str {
        self.oracle.model_name()
    }

    /// 构造 (system_message, user_message)
    pub fn build_messages(request: &GradingRequest) -> (String, String) {
        let user_message = format!(
            r#"请根据评分标准给下面的学生作业打分，满分 {max} 分。

【题目】
{question}

【评分标准】
{rubric}

【学生提交】
{content}

分数必须在 0 到 {max} 之间。只返回 {{"grade": <数字>, "comment": "<评语>"}}。"#,
            max = format_points(request.max_points),
            question = request.question_text,
            rubric = request.rubric,
            content = request.content,
        );
        (SYSTEM_MESSAGE.to_string(), user_message)
    }

    /// 批处理输入文件中每一行的请求体
    pub fn chat_body(&self, request: &GradingRequest, temperature: f32, max_tokens: u32) -> JsonValue {
        let (system_message, user_message) = Self::build_messages(request);
        json!({
            "model": self.oracle.model_name(),
            "messages": [
                {"role": "system", "content": system_message},
                {"role": "user", "content": user_message},
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        })
    }

    /// 同步评分一份提交，永不失败
    pub async fn grade(&self, request: &GradingRequest) -> GradingResult {
        let (system_message, user_message) = Self::build_messages(request);

        match self.oracle.complete(&system_message, &user_message).await {
            Ok(response) => {
                let parsed = self.parser.parse(&response, request.max_points);
                if parsed.method == ParseMethod::Degraded {
                    warn!(
                        "[学生 {}] 题目 {} 的评分回复无法解析",
                        request.student_id, request.question_id
                    );
                }
                GradingResult::new(
                    &request.student_id,
                    &request.question_id,
                    parsed.score,
                    parsed.feedback,
                )
            }
            Err(e) => {
                error!(
                    "[学生 {}] 题目 {} 评分失败，按 0 分处理: {}",
                    request.student_id, request.question_id, e
                );
                GradingResult::degraded(&request.student_id, &request.question_id, e.to_string())
            }
        }
    }

    /// 并发评分，同时在途的请求不超过 `concurrency`
    ///
    /// 结果通过 `sink` 交给唯一的账本写入者，返回成功送出的结果数。
    /// 写入者提前退出（账本落盘失败）时立即停止调度，错误由写入者返回。
    pub async fn grade_all(
        self: &Arc<Self>,
        requests: Vec<GradingRequest>,
        concurrency: usize,
        sink: mpsc::Sender<GradingResult>,
    ) -> AppResult<usize> {
        let total = requests.len();
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut handles = Vec::with_capacity(total);

        info!("🤖 开始同步评分: {} 份提交, 并发 {}", total, concurrency.max(1));

        for (idx, request) in requests.into_iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::Other(e.to_string()))?;
            // 写入者退出说明账本已失败，剩下的请求不再评分
            if sink.is_closed() {
                error!("账本写入者已关闭，停止评分 (剩余 {} 份)", total - idx);
                break;
            }
            let client = Arc::clone(self);
            let sink = sink.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                if sink.is_closed() {
                    return false;
                }
                let result = client.grade(&request).await;
                info!(
                    "[{}/{}] 学生 {} 题目 {}: {} 分",
                    idx + 1,
                    total,
                    result.student_id,
                    result.question_id,
                    format_points(result.score)
                );
                sink.send(result).await.is_ok()
            });
            handles.push(handle);
        }

        let mut delivered = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => delivered += 1,
                Ok(false) => debug!("账本写入者已关闭，结果未写入"),
                Err(e) => error!("评分任务执行失败: {}", e),
            }
        }

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CannedOracle {
        reply: AppResult<String>,
    }

    #[async_trait]
    impl ScoringOracle for CannedOracle {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _system: &str, _user: &str) -> AppResult<String> {
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(AppError::Other(e.to_string())),
            }
        }
    }

    /// 记录同时在途的最大请求数
    struct CountingOracle {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ScoringOracle for CountingOracle {
        fn model_name(&self) -> &str {
            "counting"
        }

        async fn complete(&self, _system: &str, _user: &str) -> AppResult<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(r#"{"grade": 1, "comment": "ok"}"#.to_string())
        }
    }

    fn request(student: &str, max: f64) -> GradingRequest {
        GradingRequest {
            student_id: student.to_string(),
            question_id: "Q1".to_string(),
            content: "print('hi')".to_string(),
            question_text: "输出 hi".to_string(),
            rubric: "正确输出得满分".to_string(),
            max_points: max,
        }
    }

    #[tokio::test]
    async fn test_grade_clamps_out_of_range_score() {
        let oracle = Arc::new(CannedOracle {
            reply: Ok(r#"{"grade": 42, "comment": "太棒了"}"#.to_string()),
        });
        let client = OracleClient::new(oracle, "解析失败").unwrap();
        let result = client.grade(&request("S1", 10.0)).await;
        assert_eq!(result.score, 10.0);
        assert_eq!(result.feedback, "太棒了");
    }

    #[tokio::test]
    async fn test_transport_failure_degrades() {
        let oracle = Arc::new(CannedOracle {
            reply: Err(AppError::Other("connection reset".to_string())),
        });
        let client = OracleClient::new(oracle, "解析失败").unwrap();
        let result = client.grade(&request("S1", 10.0)).await;
        assert_eq!(result.score, 0.0);
        assert!(result.feedback.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_grade_all_respects_concurrency() {
        let oracle = Arc::new(CountingOracle {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let client = Arc::new(OracleClient::new(oracle.clone(), "解析失败").unwrap());
        let (tx, mut rx) = mpsc::channel(64);

        let requests: Vec<_> = (0..12).map(|i| request(&format!("S{}", i), 5.0)).collect();
        let delivered = client.grade_all(requests, 3, tx).await.unwrap();

        assert_eq!(delivered, 12);
        assert!(oracle.peak.load(Ordering::SeqCst) <= 3);

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 12);
    }

    #[tokio::test]
    async fn test_grade_all_stops_when_writer_is_gone() {
        let oracle = Arc::new(CountingOracle {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let client = Arc::new(OracleClient::new(oracle.clone(), "解析失败").unwrap());
        let (tx, rx) = mpsc::channel(64);
        drop(rx);

        let requests: Vec<_> = (0..5).map(|i| request(&format!("S{}", i), 5.0)).collect();
        let delivered = client.grade_all(requests, 2, tx).await.unwrap();

        assert_eq!(delivered, 0);
        assert_eq!(oracle.peak.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_prompt_contains_rubric_and_max() {
        let (_, user) = OracleClient::build_messages(&request("S1", 7.0));
        assert!(user.contains("满分 7 分"));
        assert!(user.contains("正确输出得满分"));
        assert!(user.contains("print('hi')"));
    }

    #[test]
    fn test_correlation_token() {
        assert_eq!(request("123456", 1.0).correlation_token(), "123456_Q1");
    }
}

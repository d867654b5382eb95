use thiserror::Error;

/// 应用程序错误类型
///
/// 恢复策略："跳过受影响的最小单元并继续"。
/// 只有账本读写失败和批处理任务失败/超时会中止整个运行，见 [`AppError::is_fatal`]。
#[derive(Debug, Error)]
pub enum AppError {
    /// 文件名 / 评分标准解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
    /// 评分服务（LLM）错误
    #[error("评分服务错误: {0}")]
    Oracle(#[from] OracleError),
    /// 评分页面操作错误
    #[error("页面操作错误: {0}")]
    Surface(#[from] SurfaceError),
    /// 批处理任务错误
    #[error("批处理错误: {0}")]
    Batch(#[from] BatchError),
    /// 成绩账本读写错误
    #[error("账本错误: {0}")]
    Storage(#[from] StorageError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

impl AppError {
    /// 是否需要中止整个运行
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Storage(_) | AppError::Batch(_))
    }
}

/// 解析错误
#[derive(Debug, Error)]
pub enum ParseError {
    /// 文件名不符合任何提交命名规则
    #[error("文件名不符合命名规则 ({mode}): {filename}")]
    Filename { filename: String, mode: String },
    /// 评分标准文件格式错误
    #[error("评分标准解析失败 ({path}): {reason}")]
    Rubric { path: String, reason: String },
    /// 批处理输出行格式错误
    #[error("批处理输出行无法解析: {reason}")]
    BatchLine { reason: String },
}

/// 评分服务错误
#[derive(Debug, Error)]
pub enum OracleError {
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {source}")]
    ApiCallFailed {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 返回内容为空
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
    /// 请求构建失败
    #[error("LLM请求构建失败: {0}")]
    RequestBuild(String),
}

/// 页面操作错误
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// 导航失败
    #[error("导航到 {target} 失败: {reason}")]
    NavigationFailed { target: String, reason: String },
    /// 未找到控件
    #[error("未找到控件: {control}")]
    ControlNotFound { control: String },
    /// 页面拒绝操作
    #[error("页面操作被拒绝 ({action}): {reason}")]
    ActionRejected { action: String, reason: String },
    /// 执行脚本失败
    #[error("执行脚本失败: {source}")]
    ScriptExecutionFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {reason}")]
    ConnectionFailed { port: u16, reason: String },
}

/// 批处理任务错误
#[derive(Debug, Error)]
pub enum BatchError {
    /// 超过总等待时间
    #[error("批处理任务 {job_id} 超时 ({elapsed_secs}秒), 最后状态: {last_status}")]
    Timeout {
        job_id: String,
        elapsed_secs: u64,
        last_status: String,
    },
    /// 任务以非完成状态结束
    #[error("批处理任务 {job_id} 未完成, 最终状态: {status}")]
    NotCompleted { job_id: String, status: String },
    /// 用户取消
    #[error("批处理任务 {job_id} 已被取消, 最后状态: {last_status}")]
    Cancelled { job_id: String, last_status: String },
    /// 与批处理接口通信失败
    #[error("批处理接口请求失败 ({endpoint}): {reason}")]
    RequestFailed { endpoint: String, reason: String },
    /// 完成但缺少输出文件
    #[error("批处理任务 {job_id} 已完成但没有输出文件")]
    MissingOutput { job_id: String },
}

/// 成绩账本错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 读取失败
    #[error("读取账本失败 ({path}): {reason}")]
    ReadFailed { path: String, reason: String },
    /// 写入失败
    #[error("写入账本失败 ({path}): {reason}")]
    WriteFailed { path: String, reason: String },
    /// 内容损坏
    #[error("账本内容无法解析 ({path}): {reason}")]
    Corrupted { path: String, reason: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置值非法
    #[error("配置项 {name} 的值 '{value}' 无效: {expected}")]
    InvalidValue {
        name: String,
        value: String,
        expected: String,
    },
    /// 选择器文件读取失败
    #[error("选择器配置文件无法加载 ({path}): {reason}")]
    SelectorFile { path: String, reason: String },
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Surface(SurfaceError::ScriptExecutionFailed {
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(format!("JSON解析失败: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(ConfigError::SelectorFile {
            path: String::new(),
            reason: err.to_string(),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Other(format!("IO错误: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        AppError::Batch(BatchError::RequestFailed {
            endpoint,
            reason: err.to_string(),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建控件未找到错误
    pub fn control_not_found(control: impl Into<String>) -> Self {
        AppError::Surface(SurfaceError::ControlNotFound {
            control: control.into(),
        })
    }

    /// 创建页面操作被拒绝错误
    pub fn action_rejected(action: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Surface(SurfaceError::ActionRejected {
            action: action.into(),
            reason: reason.into(),
        })
    }

    /// 创建LLM API调用错误
    pub fn llm_api_failed(
        model: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Oracle(OracleError::ApiCallFailed {
            model: model.into(),
            source: Box::new(source),
        })
    }

    /// 创建账本读取错误
    pub fn storage_read(path: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Storage(StorageError::ReadFailed {
            path: path.into(),
            reason: reason.to_string(),
        })
    }

    /// 创建账本写入错误
    pub fn storage_write(path: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Storage(StorageError::WriteFailed {
            path: path.into(),
            reason: reason.to_string(),
        })
    }

    /// 创建批处理请求错误
    pub fn batch_request(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Batch(BatchError::RequestFailed {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

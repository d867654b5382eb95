//! # Grade Submit
//!
//! 自动评分并把成绩写回在线评分页面的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露能力
//! - `JsExecutor` - 唯一的 page owner，提供 eval() 能力
//! - `SurfaceDriver` - 评分页面的抽象动作（导航 / 查找 / 写值 / 点击 / 等待）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个学生或单个提交
//! - `SubmissionCorrelator` - 文件名 → 提交记录
//! - `OracleClient` / `BatchRunner` - 同步 / 批处理评分
//! - `ResultStore` / `ResultWriter` - 成绩账本与唯一写入者
//! - `StatusTracker` - 被动接收学生状态事件
//! - `GradingPage` / `ControlFinder` - 评分页面操作与多级控件查找
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个学生"的完整对账流程
//! - `ReconciliationState` - 上下文封装（学生 + 题目队列 + 评语）
//! - `StudentFlow` - 流程编排（状态 → 题型分发 → 写分 → 收尾）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/compute_run` - 计算阶段，可完全离线
//! - `orchestrator/apply_run` - 写回阶段，管理浏览器资源，逐个学生处理
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::connect_to_browser_and_page;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{JsExecutor, Surface, SurfaceDriver};
pub use models::{GradingResult, QuestionSpec, SubmissionRecord};
pub use orchestrator::{run_compute, ApplyRun};
pub use workflow::{StudentFlow, StudentOutcome};

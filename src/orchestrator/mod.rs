//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `compute_run` - 计算阶段
//! - 扫描提交、加载评分标准
//! - 同步（Semaphore 限制并发）或批处理调用评分服务
//! - 通过唯一的写入者更新账本
//!
//! ### `apply_run` - 写回阶段
//! - 管理浏览器资源（Browser、BrowserSurface）
//! - 订阅学生状态事件
//! - 按名单顺序逐个学生写回，输出统计信息
//!
//! ## 层次关系
//!
//! ```text
//! apply_run (处理整个名单)
//!     ↓
//! workflow::StudentFlow (处理单个学生)
//!     ↓
//! services (能力层：页面操作 / 评分服务 / 账本)
//!     ↓
//! infrastructure (基础设施：SurfaceDriver / JsExecutor)
//! ```

pub mod apply_run;
pub mod compute_run;

pub use apply_run::{apply_roster, ApplyRun, ApplyStats};
pub use compute_run::{compute_with, run_compute, ComputeStats};

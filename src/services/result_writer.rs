//! 账本单写入者
//!
//! 并发的评分任务只往通道里发送结果，由唯一的写入任务合并进账本并定期落盘

use crate::error::AppResult;
use crate::models::GradingResult;
use crate::services::result_store::ResultStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 账本写入者
pub struct ResultWriter {
    sender: mpsc::Sender<GradingResult>,
    handle: JoinHandle<AppResult<ResultStore>>,
}

impl ResultWriter {
    /// 启动写入任务，接管账本
    ///
    /// 每收到 `flush_every` 条结果落盘一次，通道关闭时再落盘一次。
    pub fn spawn(mut store: ResultStore, flush_every: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<GradingResult>(256);
        let flush_every = flush_every.max(1);

        let handle = tokio::spawn(async move {
            let mut pending = 0usize;
            let mut total = 0usize;

            while let Some(result) = receiver.recv().await {
                debug!(
                    "账本收到成绩: 学生 {} 题目 {} 分数 {}",
                    result.student_id, result.question_id, result.score
                );
                store.add(result);
                pending += 1;
                total += 1;

                if pending >= flush_every {
                    store.flush()?;
                    pending = 0;
                }
            }

            let path = store.flush()?;
            info!("💾 账本写入完成: {} (本次新增 {} 条)", path.display(), total);
            Ok(store)
        });

        Self { sender, handle }
    }

    /// 获取一个发送端，可以 clone 给多个任务
    pub fn sender(&self) -> mpsc::Sender<GradingResult> {
        self.sender.clone()
    }

    /// 关闭通道并等待最后一次落盘，返回账本
    pub async fn finish(self) -> AppResult<ResultStore> {
        drop(self.sender);
        self.handle
            .await
            .map_err(|e| crate::error::AppError::Other(format!("账本写入任务异常退出: {}", e)))?
    }
}

//! 学生处理上下文
//!
//! 封装"我正在处理哪个学生、还剩哪些题、已经写了哪些评语"

use std::collections::VecDeque;
use std::fmt::Display;

use crate::services::QuestionSlot;

/// 单个学生的对账状态
///
/// 轮到该学生时创建，处理完即丢弃。
#[derive(Debug, Clone)]
pub struct ReconciliationState {
    pub student_id: String,
    /// 名单中的位置（从 1 开始，仅用于日志）
    pub position: usize,
    pub total: usize,
    queue: VecDeque<QuestionSlot>,
    feedback: Vec<String>,
    /// 已写入的题目数
    pub applied: usize,
    /// 处理失败的题目数
    pub failed: usize,
    /// 本次新算出、尚未落盘的成绩数
    pub new_results: usize,
}

impl ReconciliationState {
    pub fn new(student_id: impl Into<String>, position: usize, total: usize) -> Self {
        Self {
            student_id: student_id.into(),
            position,
            total,
            queue: VecDeque::new(),
            feedback: Vec::new(),
            applied: 0,
            failed: 0,
            new_results: 0,
        }
    }

    pub fn enqueue(&mut self, slots: impl IntoIterator<Item = QuestionSlot>) {
        self.queue.extend(slots);
    }

    pub fn next_question(&mut self) -> Option<QuestionSlot> {
        self.queue.pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn push_feedback(&mut self, question_id: &str, feedback: &str) {
        let feedback = feedback.trim();
        if !feedback.is_empty() {
            self.feedback.push(format!("【题目 {}】{}", question_id, feedback));
        }
    }

    /// 汇总后的评语，每题一段
    pub fn aggregated_feedback(&self) -> String {
        self.feedback.join("\n\n")
    }
}

impl Display for ReconciliationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[学生 {} ({}/{})]", self.student_id, self.position, self.total)
    }
}

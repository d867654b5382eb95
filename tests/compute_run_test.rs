//! 计算阶段测试：脚本化的批处理接口与计数评分服务

use async_trait::async_trait;
use grade_submit::config::{AssignmentMode, Config, OracleMode};
use grade_submit::error::{AppError, AppResult, BatchError, StorageError};
use grade_submit::models::GradingResult;
use grade_submit::orchestrator::compute_with;
use grade_submit::services::{BatchBackend, RemoteJobState, ResultStore, ScoringOracle};
use serde_json::{json, Value as JsonValue};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

/// 按脚本返回状态的批处理接口
///
/// 输出文件按收到请求的相反顺序返回，并夹带一行无法解析的内容。
struct ScriptedBackend {
    statuses: Vec<&'static str>,
    polls: AtomicUsize,
    tokens: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(statuses: Vec<&'static str>) -> Self {
        Self {
            statuses,
            polls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BatchBackend for ScriptedBackend {
    async fn upload_input(&self, path: &Path) -> AppResult<String> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut tokens = self.tokens.lock().unwrap();
        for line in content.lines() {
            let value: JsonValue = serde_json::from_str(line)?;
            assert_eq!(value["method"], "POST");
            assert_eq!(value["body"]["model"], "scripted");
            tokens.push(value["custom_id"].as_str().unwrap_or_default().to_string());
        }
        Ok("file-input".to_string())
    }

    async fn create_job(&self, input_file_id: &str) -> AppResult<String> {
        assert_eq!(input_file_id, "file-input");
        Ok("batch_001".to_string())
    }

    async fn job_state(&self, _job_id: &str) -> AppResult<RemoteJobState> {
        let idx = self.polls.fetch_add(1, Ordering::SeqCst);
        let status = self.statuses[idx.min(self.statuses.len() - 1)];
        let completed = status == "completed";
        Ok(RemoteJobState {
            status: status.to_string(),
            output_file_id: completed.then(|| "file-output".to_string()),
            error_file_id: None,
        })
    }

    async fn download(&self, file_id: &str) -> AppResult<String> {
        assert_eq!(file_id, "file-output");
        let tokens = self.tokens.lock().unwrap();
        let mut lines: Vec<String> = tokens
            .iter()
            .rev()
            .map(|token| {
                json!({
                    "custom_id": token,
                    "response": {
                        "status_code": 200,
                        "body": {"choices": [{"message": {"content": "{\"grade\": 12, \"comment\": \"完成\"}"}}]}
                    },
                    "error": null
                })
                .to_string()
            })
            .collect();
        lines.insert(1, "{broken".to_string());
        Ok(lines.join("\n"))
    }
}

#[derive(Default)]
struct CountingOracle {
    calls: AtomicUsize,
}

#[async_trait]
impl ScoringOracle for CountingOracle {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _system: &str, user: &str) -> AppResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(user.contains("满分 10 分"));
        Ok("grade: 7 comment: \"good\"".to_string())
    }
}

/// 准备提交目录、评分标准和已有账本
///
/// - 123456 / 000001、123456 / 000002、654321 / 000002 需要评分
/// - 654321 / 000001 账本中已有
/// - 654321 / 000003 没有评分标准
fn workspace(root: &Path, mode: OracleMode) -> Config {
    let submissions = root.join("submissions");
    let rubrics = root.join("rubrics");
    std::fs::create_dir_all(&submissions).unwrap();
    std::fs::create_dir_all(&rubrics).unwrap();

    for name in [
        "1234567123456_question_000001_0000001_main.py",
        "1234567123456_question_000001_0000001_util.py",
        "1234567123456_question_000002_0000002_answer.txt",
        "7654321654321_question_000001_0000003_main.py",
        "7654321654321_question_000002_0000004_answer.txt",
        "7654321654321_question_000003_0000005_answer.txt",
        "notes.txt",
    ] {
        std::fs::write(submissions.join(name), "print('hello')").unwrap();
    }
    for id in ["000001", "000002"] {
        std::fs::write(
            rubrics.join(format!("{}.txt", id)),
            "#Question\n实现一个函数\n#Rubric\n满分 {maxPoints} 分，正确即可\n#MaxPoint\n10\n",
        )
        .unwrap();
    }

    let config = Config {
        assignment_mode: AssignmentMode::Grouped,
        assignment_id: "900001".to_string(),
        submissions_dir: submissions.display().to_string(),
        rubric_dir: rubrics.display().to_string(),
        results_dir: root.join("results").display().to_string(),
        batch_work_dir: root.join("batch").display().to_string(),
        oracle_mode: mode,
        oracle_concurrency: 2,
        batch_poll_interval_secs: 0,
        batch_ceiling_secs: 30,
        ledger_flush_every: 1,
        ..Default::default()
    };

    let mut store = ResultStore::new(config.ledger_path());
    store.add(GradingResult::new("654321", "000001", 4.0, "上次的成绩"));
    store.flush().unwrap();

    config
}

fn batch_inputs(config: &Config) -> usize {
    std::fs::read_dir(&config.batch_work_dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with("batch_input_"))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn test_sync_mode_reuses_ledger_and_skips_missing_rubric() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path(), OracleMode::Sync);
    let oracle = Arc::new(CountingOracle::default());

    let stats = assert_ok!(
        compute_with(
            &config,
            oracle.clone(),
            Arc::new(ScriptedBackend::new(vec!["completed"])),
            &CancellationToken::new(),
        )
        .await
    );

    assert_eq!(stats.submissions, 5);
    assert_eq!(stats.reused, 1);
    assert_eq!(stats.missing_rubric, 1);
    assert_eq!(stats.graded, 3);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);

    let store = ResultStore::open(config.ledger_path()).unwrap();
    assert_eq!(store.len(), 4);
    assert_eq!(store.get("654321", "000001").unwrap().feedback, "上次的成绩");
    let fresh = store.get("123456", "000001").unwrap();
    assert_eq!((fresh.score, fresh.feedback.as_str()), (7.0, "good"));
}

#[tokio::test]
async fn test_batch_mode_completed_job_is_correlated_and_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path(), OracleMode::Batch);
    let oracle = Arc::new(CountingOracle::default());
    let backend = Arc::new(ScriptedBackend::new(vec!["validating", "in_progress", "finalizing", "completed"]));

    let stats = assert_ok!(
        compute_with(&config, oracle.clone(), backend.clone(), &CancellationToken::new()).await
    );

    assert_eq!(stats.graded, 3);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.polls.load(Ordering::SeqCst), 4);

    let store = ResultStore::open(config.ledger_path()).unwrap();
    assert_eq!(store.len(), 4);
    for (student, question) in [("123456", "000001"), ("123456", "000002"), ("654321", "000002")] {
        let result = store.get(student, question).unwrap();
        assert_eq!(result.score, 10.0);
        assert_eq!(result.feedback, "完成");
    }
    assert!(Path::new(&config.batch_work_dir).join("batch_001_output.jsonl").exists());
}

#[tokio::test]
async fn test_batch_cancellation_releases_input_and_keeps_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = workspace(dir.path(), OracleMode::Batch);
    config.batch_poll_interval_secs = 60;
    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let err = assert_err!(
        compute_with(
            &config,
            Arc::new(CountingOracle::default()),
            Arc::new(ScriptedBackend::new(vec!["in_progress"])),
            &cancel,
        )
        .await
    );
    canceller.await.unwrap();

    match &err {
        AppError::Batch(BatchError::Cancelled { job_id, last_status }) => {
            assert_eq!(job_id, "batch_001");
            assert_eq!(last_status, "running");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.is_fatal());
    assert_eq!(batch_inputs(&config), 0);
    assert_eq!(ResultStore::open(config.ledger_path()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_batch_failed_job_reports_last_status() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path(), OracleMode::Batch);

    let err = assert_err!(
        compute_with(
            &config,
            Arc::new(CountingOracle::default()),
            Arc::new(ScriptedBackend::new(vec!["in_progress", "failed"])),
            &CancellationToken::new(),
        )
        .await
    );

    assert!(matches!(
        err,
        AppError::Batch(BatchError::NotCompleted { ref status, .. }) if status == "failed"
    ));
    assert_eq!(ResultStore::open(config.ledger_path()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_unpreviewable_submission_is_left_for_manual_grading() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path(), OracleMode::Sync);
    std::fs::write(
        Path::new(&config.submissions_dir).join("2222222333333_question_000001_0000009_report.docx"),
        "PK",
    )
    .unwrap();
    let oracle = Arc::new(CountingOracle::default());

    let stats = assert_ok!(
        compute_with(
            &config,
            oracle.clone(),
            Arc::new(ScriptedBackend::new(vec!["completed"])),
            &CancellationToken::new(),
        )
        .await
    );

    assert_eq!(stats.submissions, 6);
    assert_eq!(stats.manual_grading, 1);
    assert_eq!(stats.graded, 3);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);

    let store = ResultStore::open(config.ledger_path()).unwrap();
    assert!(!store.exists("333333", "000001"));
    assert_eq!(store.len(), 4);
}

#[tokio::test]
async fn test_ledger_failure_stops_sync_grading() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = workspace(dir.path(), OracleMode::Sync);
    for i in 0..7 {
        std::fs::write(
            Path::new(&config.submissions_dir)
                .join(format!("11111112{:05}_question_000002_00100{:02}_answer.txt", i, i)),
            "print('hello')",
        )
        .unwrap();
    }
    // 账本目录的父路径是普通文件，第一次落盘就会失败
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    config.results_dir = blocker.join("results").display().to_string();
    config.oracle_concurrency = 1;
    let oracle = Arc::new(CountingOracle::default());

    let err = assert_err!(
        compute_with(
            &config,
            oracle.clone(),
            Arc::new(ScriptedBackend::new(vec!["completed"])),
            &CancellationToken::new(),
        )
        .await
    );

    assert!(matches!(err, AppError::Storage(StorageError::WriteFailed { .. })));
    assert!(err.is_fatal());
    assert!(oracle.calls.load(Ordering::SeqCst) <= config.oracle_concurrency + 1);
}

//! 提交内容抽取 - 业务能力层
//!
//! 只处理可以直接当作文本预览的文件，其他格式交给人工评分。

use async_trait::async_trait;
use phf::phf_set;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::infrastructure::{ControlHandle, SurfaceDriver};
use crate::models::SubmissionRecord;

/// 支持预览的文件扩展名（小写）
static PREVIEW_EXTENSIONS: phf::Set<&'static str> = phf_set! {
    "txt", "md", "py", "java", "c", "h", "cpp", "hpp", "cc", "cs", "js", "ts",
    "rs", "go", "rb", "php", "sql", "html", "css", "json", "xml", "yaml", "yml",
    "csv", "sh", "r", "m", "kt", "swift", "scala", "ipynb",
};

/// 文件名（或地址）的扩展名是否支持预览
pub fn is_preview_supported(name: &str) -> bool {
    let name = name.split(['?', '#']).next().unwrap_or(name);
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| PREVIEW_EXTENSIONS.contains(ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 评分页面上的一个附件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

impl Attachment {
    /// 从附件链接控件构造，链接没有地址时返回 `None`
    pub fn from_handle(handle: &ControlHandle) -> Option<Self> {
        let url = handle.ident.clone()?;
        let name = if handle.label.trim().is_empty() {
            url.rsplit('/').next().unwrap_or(&url).to_string()
        } else {
            handle.label.trim().to_string()
        };
        Some(Self { name, url })
    }
}

/// 抽取结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    /// 不支持预览，需要人工评分
    Unsupported { name: String },
}

/// 附件内容抽取
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, driver: &dyn SurfaceDriver, attachment: &Attachment) -> AppResult<Extraction>;
}

/// 通过页面会话下载附件文本
#[derive(Debug, Clone, Default)]
pub struct PreviewExtractor;

#[async_trait]
impl ContentExtractor for PreviewExtractor {
    async fn extract(&self, driver: &dyn SurfaceDriver, attachment: &Attachment) -> AppResult<Extraction> {
        if !is_preview_supported(&attachment.name) && !is_preview_supported(&attachment.url) {
            return Ok(Extraction::Unsupported {
                name: attachment.name.clone(),
            });
        }
        debug!("下载附件: {}", attachment.url);
        let text = driver.fetch_text(&attachment.url).await?;
        Ok(Extraction::Text(text))
    }
}

/// 本地提交文件的文本抽取（计算阶段使用）
#[derive(Debug, Clone, Default)]
pub struct LocalContentExtractor;

impl LocalContentExtractor {
    /// 拼接一条提交记录中所有可预览文件的文本
    ///
    /// 不支持的文件只在内容中注明，不会中断。
    /// 没有任何文件读出文本时返回 `None`，这条提交需要人工评分。
    pub async fn extract_record(&self, record: &SubmissionRecord) -> AppResult<Option<String>> {
        let mut sections = Vec::with_capacity(record.files.len());
        let mut readable = 0;

        for path in &record.files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());

            if !is_preview_supported(&name) {
                sections.push(format!("=== {} ===\n[该文件格式不支持自动预览]", name));
                continue;
            }

            match tokio::fs::read(path).await {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        readable += 1;
                        sections.push(format!("=== {} ===\n{}", name, text));
                    }
                    Err(_) => sections.push(format!("=== {} ===\n[文件不是 UTF-8 文本]", name)),
                },
                Err(e) => {
                    warn!("[学生 {}] ⚠️ 读取文件失败 {}: {}", record.student_id, path.display(), e);
                    sections.push(format!("=== {} ===\n[文件读取失败]", name));
                }
            }
        }

        if readable == 0 {
            return Ok(None);
        }
        Ok(Some(sections.join("\n\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::Surface;
    use std::path::PathBuf;

    #[test]
    fn test_preview_supported_extensions() {
        assert!(is_preview_supported("main.py"));
        assert!(is_preview_supported("README.MD"));
        assert!(is_preview_supported("https://lms.example/files/12/a.java?download=1"));
        assert!(!is_preview_supported("report.docx"));
        assert!(!is_preview_supported("archive.zip"));
        assert!(!is_preview_supported("Makefile"));
    }

    #[test]
    fn test_attachment_from_handle() {
        let handle = ControlHandle {
            surface: Surface::top(),
            selector: "a".to_string(),
            index: 0,
            label: "  ".to_string(),
            ident: Some("https://lms.example/files/hw1.py".to_string()),
        };
        let attachment = Attachment::from_handle(&handle).unwrap();
        assert_eq!(attachment.name, "hw1.py");

        let no_link = ControlHandle { ident: None, ..handle };
        assert!(Attachment::from_handle(&no_link).is_none());
    }

    #[tokio::test]
    async fn test_local_extract_notes_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let code = dir.path().join("a.py");
        let doc = dir.path().join("b.docx");
        std::fs::write(&code, "print('hi')").unwrap();
        std::fs::write(&doc, [0u8, 159, 146, 150]).unwrap();

        let record = SubmissionRecord {
            student_number: "1234567".to_string(),
            student_id: "123456".to_string(),
            question_id: "000001".to_string(),
            submission_id: "0001234".to_string(),
            files: vec![code, doc, PathBuf::from("missing.txt")],
        };

        let content = LocalContentExtractor
            .extract_record(&record)
            .await
            .unwrap()
            .expect("a.py is readable");
        assert!(content.contains("=== a.py ===\nprint('hi')"));
        assert!(content.contains("=== b.docx ===\n[该文件格式不支持自动预览]"));
        assert!(content.contains("=== missing.txt ===\n[文件读取失败]"));
    }

    #[tokio::test]
    async fn test_local_extract_without_readable_file_needs_manual_grading() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("report.docx");
        let binary = dir.path().join("notes.txt");
        std::fs::write(&doc, "PK").unwrap();
        std::fs::write(&binary, [0u8, 159, 146, 150]).unwrap();

        let record = SubmissionRecord {
            student_number: "1234567".to_string(),
            student_id: "123456".to_string(),
            question_id: "000001".to_string(),
            submission_id: "0001234".to_string(),
            files: vec![doc, binary, PathBuf::from("missing.py")],
        };

        let content = LocalContentExtractor.extract_record(&record).await.unwrap();
        assert_eq!(content, None);
    }
}

use crate::error::{AppError, AppResult, ParseError};
use crate::models::question::QuestionSpec;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Section {
    Question,
    Rubric,
    MaxPoint,
}

fn section_header(line: &str) -> Option<Section> {
    let header = line.trim().strip_prefix('#')?.trim().to_ascii_lowercase();
    match header.as_str() {
        "question" => Some(Section::Question),
        "rubric" => Some(Section::Rubric),
        "maxpoint" | "maxpoints" => Some(Section::MaxPoint),
        _ => None,
    }
}

/// 解析评分标准文本
///
/// 文件由 `#Question` / `#Rubric` / `#MaxPoint` 三个可选段组成；
/// 没有 `#Rubric` 段时整个文件作为评分标准。
pub fn parse_rubric(question_id: &str, content: &str, source: &str) -> AppResult<QuestionSpec> {
    let mut sections: HashMap<Section, Vec<&str>> = HashMap::new();
    let mut current: Option<Section> = None;

    for line in content.lines() {
        if let Some(section) = section_header(line) {
            current = Some(section);
            sections.entry(section).or_default();
            continue;
        }
        if let Some(section) = current {
            sections.entry(section).or_default().push(line);
        }
    }

    let joined = |section: Section| -> Option<String> {
        sections
            .get(&section)
            .map(|lines| lines.join("\n").trim().to_string())
            .filter(|text| !text.is_empty())
    };

    let max_points = match joined(Section::MaxPoint) {
        Some(raw) => {
            if !raw.chars().all(|c| c.is_ascii_digit()) {
                return Err(AppError::Parse(ParseError::Rubric {
                    path: source.to_string(),
                    reason: format!("#MaxPoint 只能是数字, 实际为 '{}'", raw),
                }));
            }
            Some(raw.parse::<f64>().map_err(|e| {
                AppError::Parse(ParseError::Rubric {
                    path: source.to_string(),
                    reason: e.to_string(),
                })
            })?)
        }
        None => None,
    };

    Ok(QuestionSpec {
        question_id: question_id.to_string(),
        description: joined(Section::Question),
        rubric_template: joined(Section::Rubric).unwrap_or_else(|| content.trim().to_string()),
        max_points,
    })
}

/// 加载单个评分标准文件，文件名（不含扩展名）作为题目 ID
pub async fn load_rubric_file(path: &Path) -> AppResult<QuestionSpec> {
    let content = fs::read_to_string(path).await.map_err(|e| {
        AppError::Parse(ParseError::Rubric {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    })?;

    let question_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    parse_rubric(&question_id, &content, &path.display().to_string())
}

/// 加载目录下所有评分标准，按题目 ID 索引
///
/// 单个文件解析失败只记录日志并跳过。
pub async fn load_rubric_dir(folder_path: &str) -> AppResult<HashMap<String, QuestionSpec>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        tracing::warn!("⚠️ 评分标准目录不存在: {}", folder_path);
        return Ok(HashMap::new());
    }

    let mut specs = HashMap::new();
    let mut entries = fs::read_dir(&folder).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        match load_rubric_file(&path).await {
            Ok(spec) => {
                tracing::info!(
                    "✓ 加载评分标准: {} (满分: {:?})",
                    spec.question_id,
                    spec.max_points
                );
                specs.insert(spec.question_id.clone(), spec);
            }
            Err(e) => {
                tracing::warn!("加载评分标准失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_sections() {
        let content = "#Question\n写一个冒泡排序\n#Rubric\n正确性 {maxPoints} 分\n#MaxPoint\n10\n";
        let spec = parse_rubric("000001", content, "r.txt").unwrap();
        assert_eq!(spec.description.as_deref(), Some("写一个冒泡排序"));
        assert_eq!(spec.rubric_template, "正确性 {maxPoints} 分");
        assert_eq!(spec.max_points, Some(10.0));
    }

    #[test]
    fn test_repeated_section_header_appends() {
        let content = "#rubric\n正确性 5 分\n#MaxPoint\n10\n# Rubric \n风格 5 分\n";
        let spec = parse_rubric("000004", content, "r.txt").unwrap();
        assert_eq!(spec.rubric_template, "正确性 5 分\n风格 5 分");
        assert_eq!(spec.max_points, Some(10.0));
    }

    #[test]
    fn test_missing_sections_fall_back_to_whole_file() {
        let content = "按照代码风格和正确性评分";
        let spec = parse_rubric("000002", content, "r.txt").unwrap();
        assert_eq!(spec.rubric_template, content);
        assert_eq!(spec.description, None);
        assert_eq!(spec.max_points, None);
    }

    #[test]
    fn test_non_digit_max_point_is_parse_error() {
        let content = "#Rubric\nx\n#MaxPoint\nten\n";
        let err = parse_rubric("000003", content, "r.txt").unwrap_err();
        assert!(matches!(err, AppError::Parse(ParseError::Rubric { .. })));
    }

    #[tokio::test]
    async fn test_load_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("000001.txt"), "#Rubric\nok\n#MaxPoint\n5").unwrap();
        std::fs::write(dir.path().join("000002.txt"), "#MaxPoint\nabc").unwrap();

        let specs = load_rubric_dir(dir.path().to_str().unwrap()).await.unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs["000001"].max_points, Some(5.0));
    }
}

// ==========================================
// 客户档案导入系统 - 列分析器实现
// ==========================================
// 职责: 对预览行做逐列画像(类型推断 + 结构特征)
// 红线: 纯函数,无 I/O;输入为已解析的预览行
// ==========================================

use crate::domain::import::ColumnProfile;
use crate::domain::types::InferredType;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::collections::HashSet;

/// 类型推断使用的日期格式(ISO / 美式 / 欧式)
const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%m-%d-%Y", "%d.%m.%Y",
];

/// 布尔 token 集(小写比较)
const BOOLEAN_TOKENS: [&str; 8] = ["true", "false", "yes", "no", "y", "n", "1", "0"];

/// 对全部列生成画像
///
/// # 参数
/// - columns: 列名(有序)
/// - rows: 预览行(列名 → 值)
/// - sample_limit: 每列采样的非空值数量上限
pub fn analyze_columns(
    columns: &[String],
    rows: &[HashMap<String, String>],
    sample_limit: usize,
) -> Vec<ColumnProfile> {
    columns
        .iter()
        .map(|name| analyze_column(name, rows, sample_limit))
        .collect()
}

/// 单列画像
pub fn analyze_column(
    name: &str,
    rows: &[HashMap<String, String>],
    sample_limit: usize,
) -> ColumnProfile {
    let mut samples = Vec::new();
    let mut unique = HashSet::new();
    let mut null_count = 0usize;

    for row in rows {
        let value = row.get(name).map(|v| v.trim()).unwrap_or("");
        if value.is_empty() {
            null_count += 1;
            continue;
        }

        unique.insert(value.to_string());
        if samples.len() < sample_limit {
            samples.push(value.to_string());
        }
    }

    ColumnProfile {
        name: name.to_string(),
        inferred_type: infer_type(&samples),
        fixed_length: fixed_length(&samples),
        common_prefix: common_prefix(&samples),
        unique_count: unique.len(),
        null_count,
        samples,
    }
}

/// 类型推断: 依次尝试 email → phone → ssn → boolean → date → number,全不中则 text
///
/// # 规则
/// - 所有采样值都满足某个模式,该列才判为该类型
fn infer_type(samples: &[String]) -> InferredType {
    if samples.is_empty() {
        return InferredType::Text;
    }

    let all = |pred: fn(&str) -> bool| samples.iter().all(|s| pred(s));

    if all(looks_like_email) {
        InferredType::Email
    } else if all(looks_like_phone) {
        InferredType::Phone
    } else if all(looks_like_ssn) {
        InferredType::Ssn
    } else if all(looks_like_boolean) {
        InferredType::Boolean
    } else if all(looks_like_date) {
        InferredType::Date
    } else if all(looks_like_number) {
        InferredType::Number
    } else {
        InferredType::Text
    }
}

fn looks_like_email(value: &str) -> bool {
    let mut parts = value.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && domain.contains('.') && !value.contains(char::is_whitespace)
        }
        _ => false,
    }
}

fn digit_count(value: &str) -> usize {
    value.chars().filter(|c| c.is_ascii_digit()).count()
}

fn looks_like_phone(value: &str) -> bool {
    let digits = digit_count(value);
    (10..=11).contains(&digits)
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || " ()-+.".contains(c))
}

fn looks_like_ssn(value: &str) -> bool {
    digit_count(value) == 9
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || c == '-' || c == ' ')
}

fn looks_like_boolean(value: &str) -> bool {
    BOOLEAN_TOKENS.contains(&value.to_lowercase().as_str())
}

fn looks_like_date(value: &str) -> bool {
    DATE_FORMATS
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(value, fmt).is_ok())
}

fn looks_like_number(value: &str) -> bool {
    value.replace(',', "").parse::<f64>().is_ok()
}

/// 样本定长: 全部采样值等长时返回该长度
fn fixed_length(samples: &[String]) -> Option<usize> {
    let first = samples.first()?.chars().count();
    samples
        .iter()
        .all(|s| s.chars().count() == first)
        .then_some(first)
}

/// 最长公共字面前缀: 仅在长度 > 2 时报告
fn common_prefix(samples: &[String]) -> Option<String> {
    let mut prefix = samples.first()?.clone();

    for sample in &samples[1..] {
        let shared = prefix
            .chars()
            .zip(sample.chars())
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(
            prefix
                .char_indices()
                .nth(shared)
                .map(|(i, _)| i)
                .unwrap_or(prefix.len()),
        );
        if prefix.is_empty() {
            return None;
        }
    }

    (prefix.chars().count() > 2).then_some(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_of(column: &str, values: &[&str]) -> Vec<HashMap<String, String>> {
        values
            .iter()
            .map(|v| {
                let mut row = HashMap::new();
                row.insert(column.to_string(), v.to_string());
                row
            })
            .collect()
    }

    #[test]
    fn test_infers_email() {
        let rows = rows_of("contact", &["ana@example.com", "bo@test.org"]);
        let profile = analyze_column("contact", &rows, 5);
        assert_eq!(profile.inferred_type, InferredType::Email);
    }

    #[test]
    fn test_infers_phone_before_number() {
        let rows = rows_of("tel", &["(555) 123-4567", "555.987.6543"]);
        let profile = analyze_column("tel", &rows, 5);
        assert_eq!(profile.inferred_type, InferredType::Phone);
    }

    #[test]
    fn test_infers_ssn() {
        let rows = rows_of("ssn", &["123-45-6789", "987654321"]);
        let profile = analyze_column("ssn", &rows, 5);
        assert_eq!(profile.inferred_type, InferredType::Ssn);
    }

    #[test]
    fn test_infers_boolean() {
        let rows = rows_of("flag", &["Yes", "no", "YES"]);
        let profile = analyze_column("flag", &rows, 5);
        assert_eq!(profile.inferred_type, InferredType::Boolean);
    }

    #[test]
    fn test_infers_date_iso_us_eu() {
        let rows = rows_of("dob", &["1990-04-12", "04/12/1990", "12/04/1990"]);
        let profile = analyze_column("dob", &rows, 5);
        assert_eq!(profile.inferred_type, InferredType::Date);
    }

    #[test]
    fn test_infers_number_and_falls_back_to_text() {
        let numbers = rows_of("amount", &["1200", "3.5"]);
        assert_eq!(
            analyze_column("amount", &numbers, 5).inferred_type,
            InferredType::Number
        );

        let mixed = rows_of("note", &["1200", "hello"]);
        assert_eq!(
            analyze_column("note", &mixed, 5).inferred_type,
            InferredType::Text
        );
    }

    #[test]
    fn test_counts_nulls_and_uniques() {
        let mut rows = rows_of("city", &["Austin", "Austin", "Dallas"]);
        rows.push(HashMap::new()); // 缺失值按空计

        let profile = analyze_column("city", &rows, 5);
        assert_eq!(profile.unique_count, 2);
        assert_eq!(profile.null_count, 1);
    }

    #[test]
    fn test_sample_limit_is_honored() {
        let rows = rows_of("id", &["a1", "a2", "a3", "a4", "a5", "a6", "a7"]);
        let profile = analyze_column("id", &rows, 5);
        assert_eq!(profile.samples.len(), 5);
    }

    #[test]
    fn test_fixed_length_and_common_prefix() {
        let rows = rows_of("code", &["CLI-001", "CLI-002", "CLI-003"]);
        let profile = analyze_column("code", &rows, 5);

        assert_eq!(profile.fixed_length, Some(7));
        assert_eq!(profile.common_prefix.as_deref(), Some("CLI-00"));
    }

    #[test]
    fn test_short_prefix_not_reported() {
        let rows = rows_of("code", &["AB1", "AB2"]);
        let profile = analyze_column("code", &rows, 5);
        assert_eq!(profile.common_prefix, None);
    }
}

// ==========================================
// 客户档案导入系统 - 字段映射器实现
// ==========================================
// 职责: 源列 → 目标字段映射(AI 主路径 + 规则降级) + 值转换
// 红线: AI 输出中的未知目标字段一律丢弃(拦截幻觉字段)
// 红线: 降级是静默的一等路径,只进 notes,不报硬错误
// ==========================================

use crate::domain::import::{ColumnProfile, FieldMapping, MappingOutcome, MappingSuggestion};
use crate::domain::types::{InferredType, TargetField};
use crate::importer::client_importer_trait::TextGenerator;
use crate::importer::error::{ImportError, ImportResult};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

// ==========================================
// 列名别名字典(规则映射路径)
// ==========================================
// 比较前列名经 normalize: 小写 + 剥离非字母数字
const FIELD_ALIASES: &[(TargetField, &[&str])] = &[
    (
        TargetField::FirstName,
        &["firstname", "fname", "givenname", "first"],
    ),
    (
        TargetField::LastName,
        &["lastname", "lname", "surname", "familyname", "last"],
    ),
    (TargetField::Email, &["email", "emailaddress", "mail"]),
    (
        TargetField::Phone,
        &[
            "phone",
            "phonenumber",
            "mobile",
            "cell",
            "cellphone",
            "telephone",
            "tel",
        ],
    ),
    (
        TargetField::DateOfBirth,
        &["dateofbirth", "dob", "birthdate", "birthday"],
    ),
    (
        TargetField::Ssn,
        &["ssn", "socialsecuritynumber", "socialsecurity"],
    ),
    (TargetField::Gender, &["gender", "sex"]),
    (
        TargetField::ExternalId,
        &["externalid", "clientid", "recordid", "memberid", "id"],
    ),
    (
        TargetField::AddressStreet,
        &["street", "streetaddress", "address", "address1", "addressline1"],
    ),
    (TargetField::AddressCity, &["city", "town"]),
    (TargetField::AddressState, &["state", "province", "region"]),
    (
        TargetField::AddressZip,
        &["zip", "zipcode", "postalcode", "postcode"],
    ),
    (TargetField::Notes, &["notes", "comments", "memo", "remarks"]),
];

// 缩写 → 目标字段(建议模式的第四个信号)
const ABBREVIATIONS: &[(&str, TargetField)] = &[
    ("fname", TargetField::FirstName),
    ("lname", TargetField::LastName),
    ("dob", TargetField::DateOfBirth),
    ("ssn", TargetField::Ssn),
    ("tel", TargetField::Phone),
    ("addr", TargetField::AddressStreet),
    ("st", TargetField::AddressState),
    ("zip", TargetField::AddressZip),
];

// ===== 建议模式加分项(封顶 1.0)=====
const SCORE_EXACT_NAME: f64 = 0.6;
const SCORE_PARTIAL_NAME: f64 = 0.3;
const SCORE_TYPE_MATCH: f64 = 0.25;
const SCORE_ABBREVIATION: f64 = 0.4;

/// 值转换使用的固定日期格式(ISO / 美式 / 欧式)
const TRANSFORM_DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%m-%d-%Y", "%d.%m.%Y",
];

// ==========================================
// AI 响应结构(JSON,允许围栏包裹)
// ==========================================
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AiMappingResponse {
    #[serde(default)]
    mappings: Vec<AiMappingEntry>,
    #[serde(default)]
    unmapped_columns: Vec<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AiMappingEntry {
    source_column: String,
    target_field: String,
    confidence: f64,
    #[serde(default)]
    #[allow(dead_code)]
    reason: Option<String>,
}

// ==========================================
// FieldMapper - 字段映射器
// ==========================================
pub struct FieldMapper {
    generator: Option<Arc<dyn TextGenerator>>,
    rule_confidence: f64,
}

impl FieldMapper {
    /// 创建新的 FieldMapper 实例
    ///
    /// # 参数
    /// - generator: 文本生成服务(None = 只走规则映射)
    /// - rule_confidence: 规则映射的固定置信度
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, rule_confidence: f64) -> Self {
        Self {
            generator,
            rule_confidence,
        }
    }

    /// 生成列 → 目标字段映射
    ///
    /// # 路径
    /// - 主路径: AI 辅助(结构化提示词 + JSON 响应)
    /// - 降级: AI 调用失败或响应不可解析时,静默切换规则映射并记入 notes
    pub async fn map_columns(
        &self,
        columns: &[String],
        profiles: &[ColumnProfile],
        source_system_hint: Option<&str>,
    ) -> MappingOutcome {
        if let Some(generator) = &self.generator {
            let prompt = build_prompt(columns, profiles, source_system_hint);

            match generator.generate(&prompt).await {
                Ok(text) => match self.accept_ai_response(columns, &text) {
                    Ok(outcome) => return outcome,
                    Err(e) => {
                        warn!(error = %e, "AI 映射响应不可解析,降级为规则映射");
                        let mut outcome = self.map_columns_rule_based(columns);
                        outcome.notes.push(format!("AI 响应不可解析,已降级为规则映射: {}", e));
                        return outcome;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "AI 映射调用失败,降级为规则映射");
                    let mut outcome = self.map_columns_rule_based(columns);
                    outcome.notes.push(format!("AI 调用失败,已降级为规则映射: {}", e));
                    return outcome;
                }
            }
        }

        self.map_columns_rule_based(columns)
    }

    /// 规则映射(确定性降级路径)
    ///
    /// # 规则
    /// - 列名 normalize 后查别名字典,首个命中即胜出
    /// - 同一目标字段至多一个映射(先到先得)
    pub fn map_columns_rule_based(&self, columns: &[String]) -> MappingOutcome {
        let mut mappings = Vec::new();
        let mut unmapped = Vec::new();
        let mut claimed: HashSet<TargetField> = HashSet::new();

        for column in columns {
            let normalized = normalize_column_name(column);
            let hit = FIELD_ALIASES.iter().find(|(field, aliases)| {
                !claimed.contains(field) && aliases.contains(&normalized.as_str())
            });

            match hit {
                Some((field, _)) => {
                    claimed.insert(*field);
                    mappings.push(FieldMapping {
                        source_column: column.clone(),
                        target_field: *field,
                        transform: default_transform(*field),
                        required: field.is_required(),
                        confidence: self.rule_confidence,
                        ai_suggested: false,
                    });
                }
                None => unmapped.push(column.clone()),
            }
        }

        let overall_confidence = mean_confidence(&mappings);
        debug!(
            mapped = mappings.len(),
            unmapped = unmapped.len(),
            "规则映射完成"
        );

        MappingOutcome {
            mappings,
            unmapped_columns: unmapped,
            overall_confidence,
            notes: Vec::new(),
        }
    }

    /// 校验并接受 AI 响应
    ///
    /// # 过滤
    /// - targetField 不在目标字段集合内 → 丢弃(幻觉字段)
    /// - sourceColumn 不在实际列集合内 → 丢弃
    /// - 同一目标字段多个声明 → 保留置信度最高者
    fn accept_ai_response(&self, columns: &[String], text: &str) -> ImportResult<MappingOutcome> {
        let stripped = strip_code_fences(text);
        let response: AiMappingResponse = serde_json::from_str(stripped)
            .map_err(|e| ImportError::AiResponseError(e.to_string()))?;

        let known_columns: HashSet<&str> = columns.iter().map(|c| c.as_str()).collect();
        let mut best: HashMap<TargetField, FieldMapping> = HashMap::new();
        let mut dropped = 0usize;

        for entry in response.mappings {
            let field = match TargetField::from_path(&entry.target_field) {
                Some(field) => field,
                None => {
                    dropped += 1;
                    continue;
                }
            };
            if !known_columns.contains(entry.source_column.as_str()) {
                dropped += 1;
                continue;
            }

            let mapping = FieldMapping {
                source_column: entry.source_column,
                target_field: field,
                transform: default_transform(field),
                required: field.is_required(),
                confidence: entry.confidence.clamp(0.0, 1.0),
                ai_suggested: true,
            };

            match best.get(&field) {
                Some(existing) if existing.confidence >= mapping.confidence => {}
                _ => {
                    best.insert(field, mapping);
                }
            }
        }

        let mapped_columns: HashSet<String> =
            best.values().map(|m| m.source_column.clone()).collect();
        let mut mappings: Vec<FieldMapping> = best.into_values().collect();
        mappings.sort_by(|a, b| a.target_field.cmp(&b.target_field));

        let mut unmapped: Vec<String> = columns
            .iter()
            .filter(|c| !mapped_columns.contains(*c))
            .cloned()
            .collect();
        for column in response.unmapped_columns {
            if known_columns.contains(column.as_str()) && !unmapped.contains(&column) {
                unmapped.push(column);
            }
        }

        let overall_confidence = mean_confidence(&mappings);
        let mut notes = Vec::new();
        if let Some(note) = response.notes {
            if !note.trim().is_empty() {
                notes.push(note);
            }
        }
        if dropped > 0 {
            notes.push(format!("已丢弃 {} 条非法映射声明", dropped));
        }

        debug!(
            mapped = mappings.len(),
            dropped = dropped,
            confidence = overall_confidence,
            "AI 映射已接受"
        );

        Ok(MappingOutcome {
            mappings,
            unmapped_columns: unmapped,
            overall_confidence,
            notes,
        })
    }

    /// 建议模式: 逐列对全部目标字段独立打分,返回每列前 3 名
    ///
    /// # 信号(加分制,封顶 1.0)
    /// - 精确名称命中 / 部分子串命中 / 推断类型吻合 / 已知缩写命中
    pub fn suggest_mappings(
        &self,
        columns: &[String],
        profiles: &[ColumnProfile],
    ) -> HashMap<String, Vec<MappingSuggestion>> {
        let profile_by_name: HashMap<&str, &ColumnProfile> =
            profiles.iter().map(|p| (p.name.as_str(), p)).collect();

        let mut result = HashMap::new();

        for column in columns {
            let normalized = normalize_column_name(column);
            let inferred = profile_by_name.get(column.as_str()).map(|p| p.inferred_type);

            let mut suggestions: Vec<MappingSuggestion> = TargetField::ALL
                .iter()
                .filter_map(|field| {
                    let score = score_candidate(*field, &normalized, inferred);
                    (score > 0.0).then_some(MappingSuggestion {
                        target_field: *field,
                        confidence: score,
                    })
                })
                .collect();

            suggestions.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            suggestions.truncate(3);

            result.insert(column.clone(), suggestions);
        }

        result
    }
}

/// 列名标准化: 小写 + 剥离非字母数字
pub fn normalize_column_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// 目标字段的默认值转换标签
fn default_transform(field: TargetField) -> Option<String> {
    match field {
        TargetField::DateOfBirth => Some("date".to_string()),
        TargetField::Phone => Some("phone".to_string()),
        TargetField::Ssn => Some("ssn".to_string()),
        _ => None,
    }
}

fn mean_confidence(mappings: &[FieldMapping]) -> f64 {
    if mappings.is_empty() {
        return 0.0;
    }
    mappings.iter().map(|m| m.confidence).sum::<f64>() / mappings.len() as f64
}

fn score_candidate(field: TargetField, normalized: &str, inferred: Option<InferredType>) -> f64 {
    let aliases = FIELD_ALIASES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[]);

    let mut score = 0.0;

    // 精确命中别名集
    if aliases.contains(&normalized) {
        score += SCORE_EXACT_NAME;
    } else if normalized.len() >= 3
        && aliases
            .iter()
            .any(|a| a.contains(normalized) || normalized.contains(a))
    {
        // 部分子串命中(限长避免噪声)
        score += SCORE_PARTIAL_NAME;
    }

    // 推断类型吻合
    if let (Some(inferred), Some(expected)) = (inferred, expected_type(field)) {
        if inferred == expected {
            score += SCORE_TYPE_MATCH;
        }
    }

    // 已知缩写命中
    if ABBREVIATIONS
        .iter()
        .any(|(abbr, f)| *f == field && *abbr == normalized)
    {
        score += SCORE_ABBREVIATION;
    }

    score.min(1.0)
}

/// 目标字段的期望推断类型(无强类型语义的字段返回 None)
fn expected_type(field: TargetField) -> Option<InferredType> {
    match field {
        TargetField::Email => Some(InferredType::Email),
        TargetField::Phone => Some(InferredType::Phone),
        TargetField::Ssn => Some(InferredType::Ssn),
        TargetField::DateOfBirth => Some(InferredType::Date),
        TargetField::AddressZip => Some(InferredType::Number),
        _ => None,
    }
}

/// 构造 AI 映射提示词(目标字段目录 + 逐列类型/样本)
fn build_prompt(
    columns: &[String],
    profiles: &[ColumnProfile],
    source_system_hint: Option<&str>,
) -> String {
    let profile_by_name: HashMap<&str, &ColumnProfile> =
        profiles.iter().map(|p| (p.name.as_str(), p)).collect();

    let mut prompt = String::from(
        "You map source spreadsheet columns onto a fixed client record schema.\n\nTarget fields:\n",
    );
    for field in TargetField::ALL {
        prompt.push_str(&format!("- {}: {}\n", field.as_path(), field.description()));
    }

    prompt.push_str("\nSource columns:\n");
    for column in columns {
        match profile_by_name.get(column.as_str()) {
            Some(profile) => {
                let samples = profile
                    .samples
                    .iter()
                    .map(|s| format!("\"{}\"", s))
                    .collect::<Vec<_>>()
                    .join(", ");
                prompt.push_str(&format!(
                    "- \"{}\" (type: {}, samples: [{}])\n",
                    column, profile.inferred_type, samples
                ));
            }
            None => prompt.push_str(&format!("- \"{}\"\n", column)),
        }
    }

    if let Some(hint) = source_system_hint {
        prompt.push_str(&format!("\nSource system: {}\n", hint));
    }

    prompt.push_str(
        "\nRespond with a single JSON object, no surrounding prose:\n\
         {\"mappings\":[{\"sourceColumn\":\"...\",\"targetField\":\"client.firstName\",\
         \"confidence\":0.0,\"reason\":\"...\"}],\"unmappedColumns\":[\"...\"],\"notes\":\"...\"}\n\
         Only use target fields from the catalog above. Confidence is a number in [0,1].\n",
    );

    prompt
}

/// 剥离围栏包裹(```json ... ``` 或 ``` ... ```)
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // 去掉围栏语言标记行
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };

    rest.rsplit_once("```")
        .map(|(body, _)| body.trim())
        .unwrap_or(trimmed)
}

// ==========================================
// 值转换(读取时应用,映射时只记录标签)
// ==========================================

/// 按转换标签处理单个值(纯函数)
///
/// # 标签
/// - date: 归一为 YYYY-MM-DD(依次尝试 ISO/美式/欧式,再做通用解析)
/// - phone: 剥离非数字,11 位且以 1 开头时去掉美国国家码
/// - ssn: 剥离非数字
/// - uppercase / lowercase / trim / number
/// - 未知标签: 仅 trim
pub fn apply_transform(tag: &str, value: &str) -> String {
    let trimmed = value.trim();

    match tag.split(':').next().unwrap_or(tag) {
        "date" => transform_date(trimmed),
        "phone" => {
            let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() == 11 && digits.starts_with('1') {
                digits[1..].to_string()
            } else {
                digits
            }
        }
        "ssn" => trimmed.chars().filter(|c| c.is_ascii_digit()).collect(),
        "uppercase" => trimmed.to_uppercase(),
        "lowercase" => trimmed.to_lowercase(),
        "number" => {
            let cleaned = trimmed.replace(',', "");
            if cleaned.parse::<f64>().is_ok() {
                cleaned
            } else {
                trimmed.to_string()
            }
        }
        _ => trimmed.to_string(),
    }
}

fn transform_date(value: &str) -> String {
    for fmt in TRANSFORM_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return date.format("%Y-%m-%d").to_string();
        }
    }

    // 通用解析兜底: 常见日期时间格式截取日期部分
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, fmt) {
            return dt.date().format("%Y-%m-%d").to_string();
        }
    }

    // 解析失败: 保留原值,由必填校验/人工复核兜底
    value.to_string()
}

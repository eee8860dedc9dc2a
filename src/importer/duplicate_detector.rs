// ==========================================
// 客户档案导入系统 - 重复检测器实现
// ==========================================
// 职责: 行映射值 vs 存量客户的加权多字段匹配 + 三档决策
// 红线: 检测只读取快照,不触发任何写入
// ==========================================
// 决策三档:
// - top ≥ 0.95           → 默认动作,免复核(近确定命中自动处置)
// - 0.80 ≤ top < 0.95    → 默认动作,标记复核(含糊命中保留审计入口)
// - 阈值 ≤ top < 0.80    → CREATE_NEW,标记复核(弱命中不得静默覆盖)
// ==========================================

use crate::domain::client::ClientRecord;
use crate::domain::import::{
    DuplicateDecision, DuplicateMatch, DuplicateSettings, FieldMatchDetail, MappedValues,
};
use crate::domain::types::{ImportAction, MatchType};
use tracing::trace;

// ==========================================
// 基础算法(纯函数,公开供测试与复用)
// ==========================================

/// Levenshtein 编辑距离(完整 O(m·n) 动态规划矩阵)
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let len_a = a_chars.len();
    let len_b = b_chars.len();

    if len_a == 0 {
        return len_b;
    }
    if len_b == 0 {
        return len_a;
    }

    let mut matrix = vec![vec![0usize; len_b + 1]; len_a + 1];

    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=len_b {
        matrix[0][j] = j;
    }

    for i in 1..=len_a {
        for j in 1..=len_b {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
        }
    }

    matrix[len_a][len_b]
}

/// 模糊相似度: 1 − 编辑距离 / max(len)
///
/// # 性质
/// - 值域 [0,1];两串相同时为 1;完全不同趋近 0
pub fn fuzzy_score(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein_distance(a, b) as f64 / max_len as f64)
}

/// Soundex 语音编码(首字母 + 至多 3 位辅音类数字,右补零至 4 位)
///
/// # 规则
/// - 相邻同类辅音折叠;H/W 不隔断折叠,元音隔断
/// - 大小写不敏感;无字母输入返回空串
pub fn soundex(value: &str) -> String {
    let letters: Vec<char> = value
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let Some(&first) = letters.first() else {
        return String::new();
    };

    let mut code = String::new();
    code.push(first);
    let mut prev = soundex_class(first);

    for &c in &letters[1..] {
        match soundex_class(c) {
            Some(digit) => {
                if prev != Some(digit) {
                    code.push(digit);
                    if code.len() == 4 {
                        break;
                    }
                }
                prev = Some(digit);
            }
            None => {
                // H/W 不隔断相邻同类辅音,元音隔断
                if c != 'H' && c != 'W' {
                    prev = None;
                }
            }
        }
    }

    while code.len() < 4 {
        code.push('0');
    }
    code
}

fn soundex_class(c: char) -> Option<char> {
    match c {
        'B' | 'F' | 'P' | 'V' => Some('1'),
        'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => Some('2'),
        'D' | 'T' => Some('3'),
        'L' => Some('4'),
        'M' | 'N' => Some('5'),
        'R' => Some('6'),
        _ => None,
    }
}

/// 语音相似度: 编码全等为 1,否则按 4 位中逐位相同的占比给部分分
pub fn phonetic_score(a: &str, b: &str) -> f64 {
    let code_a = soundex(a);
    let code_b = soundex(b);
    if code_a.is_empty() || code_b.is_empty() {
        return 0.0;
    }
    if code_a == code_b {
        return 1.0;
    }

    let matching = code_a
        .chars()
        .zip(code_b.chars())
        .filter(|(x, y)| x == y)
        .count();
    matching as f64 / 4.0
}

/// 剥离非字母数字 + 小写
fn normalize_alnum(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// 单字段相似度(按规则的比较策略)
fn field_score(match_type: MatchType, case_sensitive: bool, a: &str, b: &str) -> f64 {
    match match_type {
        MatchType::Exact => {
            let equal = if case_sensitive {
                a == b
            } else {
                a.to_lowercase() == b.to_lowercase()
            };
            if equal {
                1.0
            } else {
                0.0
            }
        }
        MatchType::Normalized => {
            if normalize_alnum(a) == normalize_alnum(b) {
                1.0
            } else {
                0.0
            }
        }
        MatchType::Fuzzy => {
            if case_sensitive {
                fuzzy_score(a, b)
            } else {
                fuzzy_score(&a.to_lowercase(), &b.to_lowercase())
            }
        }
        MatchType::Phonetic => phonetic_score(a, b),
    }
}

// ==========================================
// DuplicateDetector - 重复检测器
// ==========================================
pub struct DuplicateDetector {
    max_candidates: usize,       // 候选数量上限
    auto_apply_threshold: f64,   // 免复核阈值
    review_threshold: f64,       // 复核档下界
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            auto_apply_threshold: 0.95,
            review_threshold: 0.80,
        }
    }
}

impl DuplicateDetector {
    pub fn new(max_candidates: usize, auto_apply_threshold: f64, review_threshold: f64) -> Self {
        Self {
            max_candidates,
            auto_apply_threshold,
            review_threshold,
        }
    }

    /// 对一行映射值在存量快照中检索候选并给出决策
    ///
    /// # 参数
    /// - mapped: 行映射值
    /// - population: 存量活动客户快照(阶段开始时取一次)
    /// - settings: 批次级去重设置
    pub fn detect(
        &self,
        mapped: &MappedValues,
        population: &[ClientRecord],
        settings: &DuplicateSettings,
    ) -> DuplicateDecision {
        if !settings.enabled || mapped.is_empty() {
            return DuplicateDecision {
                matches: Vec::new(),
                action: ImportAction::CreateNew,
                requires_review: false,
            };
        }

        let mut matches: Vec<DuplicateMatch> = population
            .iter()
            .filter_map(|client| self.score_candidate(mapped, client, settings))
            .filter(|m| m.score >= settings.threshold)
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(self.max_candidates);

        let (action, requires_review) =
            self.decide(matches.first().map(|m| m.score), settings.default_action);

        trace!(
            candidates = matches.len(),
            action = %action,
            requires_review,
            "重复检测完成"
        );

        DuplicateDecision {
            matches,
            action,
            requires_review,
        }
    }

    /// 单候选打分: Σ(字段分 × 权重) / Σ(实际参与规则的权重)
    ///
    /// # 规则跳过
    /// - 任一侧为空的规则不参与,也不计入权重分母
    fn score_candidate(
        &self,
        mapped: &MappedValues,
        client: &ClientRecord,
        settings: &DuplicateSettings,
    ) -> Option<DuplicateMatch> {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut details = Vec::new();

        for rule in &settings.match_fields {
            if rule.weight <= 0.0 {
                continue;
            }

            let import_value = match mapped.get(rule.field) {
                Some(v) if !v.is_empty() => v.to_string(),
                _ => continue,
            };
            let existing_value = match client.value_of(rule.field) {
                Some(v) if !v.trim().is_empty() => v,
                _ => continue,
            };

            let score = field_score(
                rule.match_type,
                rule.case_sensitive,
                &import_value,
                &existing_value,
            );

            weighted_sum += score * rule.weight;
            weight_total += rule.weight;
            details.push(FieldMatchDetail {
                field: rule.field,
                import_value,
                existing_value,
                score,
            });
        }

        if weight_total <= 0.0 {
            return None;
        }

        Some(DuplicateMatch {
            client_id: client.client_id.clone(),
            display_name: client.display_name(),
            score: weighted_sum / weight_total,
            field_details: details,
        })
    }

    /// 三档决策(对最高候选分)
    pub fn decide(
        &self,
        top_score: Option<f64>,
        default_action: ImportAction,
    ) -> (ImportAction, bool) {
        match top_score {
            None => (ImportAction::CreateNew, false),
            Some(score) if score >= self.auto_apply_threshold => (default_action, false),
            Some(score) if score >= self.review_threshold => (default_action, true),
            Some(_) => (ImportAction::CreateNew, true),
        }
    }
}

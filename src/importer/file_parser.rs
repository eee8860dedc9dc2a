// ==========================================
// 客户档案导入系统 - 文件解析器实现
// ==========================================
// 支持: CSV (.csv) / Excel (.xlsx/.xls) / JSON (.json)
// 输入: 已拉取的字节缓冲 + 声明文件名(对象存储由调用方负责)
// 语义: 行级失败记 warning 并跳过该行;文件级失败直接报错,零行可用
// ==========================================

use crate::domain::import::{ParseDiagnostic, ParseOptions, ParsedFile};
use crate::domain::types::ParseSeverity;
use crate::importer::client_importer_trait::FileParser;
use crate::importer::error::{ImportError, ImportResult};
use calamine::{Reader, Xlsx};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::io::Cursor;

/// 预览样本行数
pub const PREVIEW_ROW_COUNT: usize = 10;

/// 无表头时合成的列名: Column 1, Column 2, ...
fn synthesize_columns(width: usize) -> Vec<String> {
    (1..=width).map(|i| format!("Column {}", i)).collect()
}

/// 按列名装配一行(超出列数的值忽略,缺失的列不写入)
fn build_row(columns: &[String], values: &[String]) -> HashMap<String, String> {
    let mut row = HashMap::new();
    for (idx, value) in values.iter().enumerate() {
        if let Some(column) = columns.get(idx) {
            row.insert(column.clone(), value.trim().to_string());
        }
    }
    row
}

fn is_blank_row(row: &HashMap<String, String>) -> bool {
    row.values().all(|v| v.is_empty())
}

fn assemble(
    columns: Vec<String>,
    rows: Vec<HashMap<String, String>>,
    diagnostics: Vec<ParseDiagnostic>,
) -> ParsedFile {
    let preview = rows.iter().take(PREVIEW_ROW_COUNT).cloned().collect();
    ParsedFile {
        total_rows: rows.len(),
        preview,
        columns,
        rows,
        diagnostics,
    }
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl FileParser for CsvParser {
    fn parse_bytes(&self, bytes: &[u8], options: &ParseOptions) -> ImportResult<ParsedFile> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ImportError::EmptyFile);
        }
        if !options.delimiter.is_ascii() {
            return Err(ImportError::CsvParseError(format!(
                "分隔符必须是 ASCII 字符: {:?}",
                options.delimiter
            )));
        }

        // 统一按 UTF-8(lossy)读取
        let text = String::from_utf8_lossy(bytes).into_owned();

        let mut reader = ReaderBuilder::new()
            .delimiter(options.delimiter as u8)
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .from_reader(text.as_bytes());

        let mut records = reader.records();

        // 表头前跳过指定行数
        for _ in 0..options.skip_rows {
            if records.next().is_none() {
                return Err(ImportError::EmptyFile);
            }
        }

        // 读取表头(或延迟到首行数据合成)
        let mut columns: Vec<String> = if options.has_headers {
            match records.next() {
                Some(Ok(record)) => record.iter().map(|h| h.trim().to_string()).collect(),
                Some(Err(e)) => {
                    return Err(ImportError::CsvParseError(format!("表头解析失败: {}", e)))
                }
                None => return Err(ImportError::EmptyFile),
            }
        } else {
            Vec::new()
        };

        // 读取数据行
        let mut rows = Vec::new();
        let mut diagnostics = Vec::new();
        let mut row_number = 0usize; // 1 起,不含表头

        for result in records {
            row_number += 1;

            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    // 行级失败: 记 warning,跳过该行,批次继续
                    diagnostics.push(ParseDiagnostic {
                        row: Some(row_number),
                        column: None,
                        message: format!("行解析失败: {}", e),
                        severity: ParseSeverity::Warning,
                    });
                    continue;
                }
            };

            let values: Vec<String> = record.iter().map(|v| v.to_string()).collect();

            if columns.is_empty() {
                columns = synthesize_columns(values.len());
            }

            let row = build_row(&columns, &values);

            // 跳过完全空白的行
            if is_blank_row(&row) {
                continue;
            }

            rows.push(row);

            if let Some(max) = options.max_rows {
                if rows.len() >= max {
                    break;
                }
            }
        }

        Ok(assemble(columns, rows, diagnostics))
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser;

impl FileParser for ExcelParser {
    fn parse_bytes(&self, bytes: &[u8], options: &ParseOptions) -> ImportResult<ParsedFile> {
        if bytes.is_empty() {
            return Err(ImportError::EmptyFile);
        }

        // 打开工作簿(损坏文件在此报文件级错误,而非 panic)
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
            .map_err(|e: calamine::XlsxError| ImportError::ExcelParseError(e.to_string()))?;

        // 按名称选择工作表,未指定则取第一个
        let sheet_names = workbook.sheet_names();
        if sheet_names.is_empty() {
            return Err(ImportError::ExcelParseError("Excel 文件无工作表".to_string()));
        }

        let sheet_name = match &options.sheet_name {
            Some(name) => {
                if !sheet_names.iter().any(|n| n == name) {
                    return Err(ImportError::ExcelParseError(format!(
                        "工作表不存在: {}",
                        name
                    )));
                }
                name.clone()
            }
            None => sheet_names[0].clone(),
        };

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| ImportError::ExcelParseError(e.to_string()))?;

        let mut sheet_rows = range.rows().skip(options.skip_rows);

        // 提取表头(公式单元格由 calamine 解包为缓存结果值)
        let mut columns: Vec<String> = if options.has_headers {
            let header_row = sheet_rows
                .next()
                .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无数据行".to_string()))?;
            header_row
                .iter()
                .map(|cell| cell.to_string().trim().to_string())
                .collect()
        } else {
            Vec::new()
        };

        // 读取数据行
        let mut rows = Vec::new();
        let diagnostics = Vec::new();

        for data_row in sheet_rows {
            let values: Vec<String> = data_row
                .iter()
                .map(|cell| cell.to_string().trim().to_string())
                .collect();

            if columns.is_empty() {
                columns = synthesize_columns(values.len());
            }

            let row = build_row(&columns, &values);

            // 跳过完全空白的行
            if is_blank_row(&row) {
                continue;
            }

            rows.push(row);

            if let Some(max) = options.max_rows {
                if rows.len() >= max {
                    break;
                }
            }
        }

        Ok(assemble(columns, rows, diagnostics))
    }
}

// ==========================================
// JSON Parser 实现
// ==========================================
// 约束: 顶层必须是对象数组;列集取首个元素的键集
pub struct JsonParser;

impl JsonParser {
    fn stringify(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        }
    }
}

impl FileParser for JsonParser {
    fn parse_bytes(&self, bytes: &[u8], options: &ParseOptions) -> ImportResult<ParsedFile> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ImportError::EmptyFile);
        }

        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ImportError::JsonParseError(e.to_string()))?;

        let items = match value {
            serde_json::Value::Array(items) => items,
            _ => {
                return Err(ImportError::JsonParseError(
                    "顶层必须是对象数组".to_string(),
                ))
            }
        };

        if items.is_empty() {
            // 空数组: 警告诊断,零行,不阻断
            return Ok(assemble(
                Vec::new(),
                Vec::new(),
                vec![ParseDiagnostic {
                    row: None,
                    column: None,
                    message: "JSON 数组为空".to_string(),
                    severity: ParseSeverity::Warning,
                }],
            ));
        }

        // 列集 = 首个对象元素的键集
        let columns: Vec<String> = match items.iter().find_map(|v| v.as_object()) {
            Some(first) => first.keys().cloned().collect(),
            None => {
                return Err(ImportError::JsonParseError(
                    "数组元素必须是对象".to_string(),
                ))
            }
        };

        let mut rows = Vec::new();
        let mut diagnostics = Vec::new();

        for (idx, item) in items.iter().enumerate().skip(options.skip_rows) {
            let row_number = idx + 1;

            let object = match item.as_object() {
                Some(object) => object,
                None => {
                    diagnostics.push(ParseDiagnostic {
                        row: Some(row_number),
                        column: None,
                        message: "数组元素不是对象,已跳过".to_string(),
                        severity: ParseSeverity::Warning,
                    });
                    continue;
                }
            };

            let mut row = HashMap::new();
            for column in &columns {
                if let Some(v) = object.get(column) {
                    row.insert(column.clone(), Self::stringify(v));
                }
            }

            if is_blank_row(&row) {
                continue;
            }

            rows.push(row);

            if let Some(max) = options.max_rows {
                if rows.len() >= max {
                    break;
                }
            }
        }

        Ok(assemble(columns, rows, diagnostics))
    }
}

// ==========================================
// 通用文件解析器(根据扩展名自动选择)
// ==========================================
pub struct UniversalFileParser;

impl UniversalFileParser {
    pub fn parse(
        &self,
        bytes: &[u8],
        file_name: &str,
        options: &ParseOptions,
    ) -> ImportResult<ParsedFile> {
        let ext = file_name
            .rsplit('.')
            .next()
            .filter(|ext| *ext != file_name)
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "csv" => CsvParser.parse_bytes(bytes, options),
            "xlsx" | "xls" => ExcelParser.parse_bytes(bytes, options),
            "json" => JsonParser.parse_bytes(bytes, options),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_parser_basic() {
        let csv = "first,last,email\nAna,Silva,ana@example.com\nBo,Chan,bo@example.com\n";

        let parsed = CsvParser
            .parse_bytes(csv.as_bytes(), &ParseOptions::default())
            .unwrap();

        assert_eq!(parsed.columns, vec!["first", "last", "email"]);
        assert_eq!(parsed.total_rows, 2);
        assert_eq!(
            parsed.rows[0].get("email"),
            Some(&"ana@example.com".to_string())
        );
    }

    #[test]
    fn test_csv_quote_aware_round_trip() {
        // 内嵌逗号 + 转义引号的字段应原样解析
        let original = r#"He said "hi", ok"#;
        let csv = "name,quote\nAna,\"He said \"\"hi\"\", ok\"\n";

        let parsed = CsvParser
            .parse_bytes(csv.as_bytes(), &ParseOptions::default())
            .unwrap();

        assert_eq!(parsed.rows[0].get("quote"), Some(&original.to_string()));
    }

    #[test]
    fn test_csv_headerless_synthesizes_columns() {
        let csv = "Ana,Silva\nBo,Chan\n";
        let options = ParseOptions {
            has_headers: false,
            ..ParseOptions::default()
        };

        let parsed = CsvParser.parse_bytes(csv.as_bytes(), &options).unwrap();

        assert_eq!(parsed.columns, vec!["Column 1", "Column 2"]);
        assert_eq!(parsed.total_rows, 2);
        assert_eq!(parsed.rows[0].get("Column 1"), Some(&"Ana".to_string()));
    }

    #[test]
    fn test_csv_skips_blank_rows() {
        let csv = "first,last\nAna,Silva\n,\nBo,Chan\n";

        let parsed = CsvParser
            .parse_bytes(csv.as_bytes(), &ParseOptions::default())
            .unwrap();

        assert_eq!(parsed.total_rows, 2);
    }

    #[test]
    fn test_csv_empty_file_is_fatal() {
        let result = CsvParser.parse_bytes(b"", &ParseOptions::default());
        assert!(matches!(result, Err(ImportError::EmptyFile)));
    }

    #[test]
    fn test_csv_custom_delimiter_and_skip_rows() {
        let csv = "exported 2026-01-05\nfirst;last\nAna;Silva\n";
        let options = ParseOptions {
            delimiter: ';',
            skip_rows: 1,
            ..ParseOptions::default()
        };

        let parsed = CsvParser.parse_bytes(csv.as_bytes(), &options).unwrap();

        assert_eq!(parsed.columns, vec!["first", "last"]);
        assert_eq!(parsed.total_rows, 1);
    }

    #[test]
    fn test_csv_max_rows_truncates() {
        let csv = "first\nA\nB\nC\nD\n";
        let options = ParseOptions {
            max_rows: Some(2),
            ..ParseOptions::default()
        };

        let parsed = CsvParser.parse_bytes(csv.as_bytes(), &options).unwrap();
        assert_eq!(parsed.total_rows, 2);
    }

    #[test]
    fn test_excel_corrupt_bytes_is_fatal_error() {
        let result = ExcelParser.parse_bytes(b"not an xlsx workbook", &ParseOptions::default());
        assert!(matches!(result, Err(ImportError::ExcelParseError(_))));
    }

    #[test]
    fn test_json_array_of_objects() {
        let json = r#"[
            {"first": "Ana", "last": "Silva"},
            {"first": "Bo", "last": "Chan"}
        ]"#;

        let parsed = JsonParser
            .parse_bytes(json.as_bytes(), &ParseOptions::default())
            .unwrap();

        assert_eq!(parsed.total_rows, 2);
        assert!(parsed.columns.contains(&"first".to_string()));
        assert_eq!(parsed.rows[1].get("first"), Some(&"Bo".to_string()));
    }

    #[test]
    fn test_json_non_array_is_fatal() {
        let result = JsonParser.parse_bytes(br#"{"first": "Ana"}"#, &ParseOptions::default());
        assert!(matches!(result, Err(ImportError::JsonParseError(_))));
    }

    #[test]
    fn test_json_empty_array_is_warning_with_zero_rows() {
        let parsed = JsonParser
            .parse_bytes(b"[]", &ParseOptions::default())
            .unwrap();

        assert_eq!(parsed.total_rows, 0);
        assert_eq!(parsed.diagnostics.len(), 1);
        assert_eq!(parsed.diagnostics[0].severity, ParseSeverity::Warning);
    }

    #[test]
    fn test_json_non_object_element_is_row_warning() {
        let json = r#"[{"first": "Ana"}, 42, {"first": "Bo"}]"#;

        let parsed = JsonParser
            .parse_bytes(json.as_bytes(), &ParseOptions::default())
            .unwrap();

        assert_eq!(parsed.total_rows, 2);
        assert_eq!(parsed.diagnostics.len(), 1);
    }

    #[test]
    fn test_universal_parser_dispatch_by_extension() {
        let parser = UniversalFileParser;

        let csv = parser.parse(b"first\nAna\n", "clients.csv", &ParseOptions::default());
        assert!(csv.is_ok());

        let unknown = parser.parse(b"first\nAna\n", "clients.docx", &ParseOptions::default());
        assert!(matches!(unknown, Err(ImportError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_preview_is_bounded() {
        let mut csv = String::from("first\n");
        for i in 0..25 {
            csv.push_str(&format!("P{}\n", i));
        }

        let parsed = CsvParser
            .parse_bytes(csv.as_bytes(), &ParseOptions::default())
            .unwrap();

        assert_eq!(parsed.total_rows, 25);
        assert_eq!(parsed.preview.len(), PREVIEW_ROW_COUNT);
    }
}

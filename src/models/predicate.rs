use crate::error::BillingError;
use crate::models::{CanonicalField, FieldKind, UsageRecord};

/// 自由文本搜索覆盖的字段
pub const SEARCH_FIELDS: [CanonicalField; 4] = [
    CanonicalField::CustomerName,
    CanonicalField::CustomerDomainName,
    CanonicalField::ProductName,
    CanonicalField::MeterName,
];

/// 单个等值条件, 比较值已做 trim + 小写
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqualityFilter {
    pub field: CanonicalField,
    pub value: String,
}

/// 过滤谓词: 等值条件 AND, 再 AND 上跨 SEARCH_FIELDS 的 OR 子串搜索
///
/// 查询、汇总、发票都通过同一个谓词求值, 保证合计与当前过滤视图一致。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPredicate {
    equals: Vec<EqualityFilter>,
    search: Option<String>,
}

impl FilterPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 增加等值条件 (仅文本字段)
    pub fn try_equals(
        mut self,
        field: CanonicalField,
        value: impl AsRef<str>,
    ) -> Result<Self, BillingError> {
        if field.kind() != FieldKind::Text {
            return Err(BillingError::InvalidRequest(format!(
                "equality filter is only supported on text columns, not {}",
                field
            )));
        }
        self.equals.push(EqualityFilter {
            field,
            value: normalize(value.as_ref()),
        });
        Ok(self)
    }

    /// 可选的等值条件, 空值忽略
    pub fn try_equals_opt(
        self,
        field: CanonicalField,
        value: Option<&str>,
    ) -> Result<Self, BillingError> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => self.try_equals(field, v),
            None => Ok(self),
        }
    }

    /// 设置搜索词, 空白搜索词视为无搜索
    pub fn with_search(mut self, term: Option<&str>) -> Self {
        self.search = term.map(normalize).filter(|t| !t.is_empty());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.search.is_none()
    }

    pub fn equals(&self) -> &[EqualityFilter] {
        &self.equals
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    /// 内存中判断一条记录是否匹配
    pub fn matches(&self, record: &UsageRecord) -> bool {
        let equals_ok = self.equals.iter().all(|f| {
            record
                .text(f.field)
                .map_or(false, |cell| equality_matches(&f.value, cell))
        });
        if !equals_ok {
            return false;
        }
        match &self.search {
            None => true,
            Some(needle) => SEARCH_FIELDS.iter().any(|field| {
                record
                    .text(*field)
                    .map_or(false, |cell| search_matches(needle, cell))
            }),
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// 等值比较: 忽略大小写与首尾空白, `expected` 已规范化
pub fn equality_matches(expected: &str, cell: &str) -> bool {
    let cell = cell.trim();
    if cell.is_ascii() && expected.is_ascii() {
        return cell.eq_ignore_ascii_case(expected);
    }
    cell.to_lowercase() == expected
}

/// 子串搜索: 忽略大小写, `needle` 已规范化
pub fn search_matches(needle: &str, cell: &str) -> bool {
    cell.to_lowercase().contains(needle)
}

/// 结果排序方式, 默认按导入顺序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ingestion,
    Ascending(CanonicalField),
    Descending(CanonicalField),
}

/// 返回窗口: 分页或全部记录 (受上限约束)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordWindow {
    /// page 从 1 开始
    Page { page: usize, page_size: usize },
    All,
}

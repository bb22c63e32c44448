//! Typed description of a remote table query.
//!
//! Descriptors are validated once, in [`QueryBuilder::build`], so backends can
//! translate them without re-checking identifiers.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::DescriptorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
  /// Return matching rows
  Select,
  /// Return the number of matching rows
  Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
  Eq,
  Neq,
  Gt,
  Gte,
  Lt,
  Lte,
  Like,
  Ilike,
  In,
  Is,
}

impl FilterOp {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Eq => "eq",
      Self::Neq => "neq",
      Self::Gt => "gt",
      Self::Gte => "gte",
      Self::Lt => "lt",
      Self::Lte => "lte",
      Self::Like => "like",
      Self::Ilike => "ilike",
      Self::In => "in",
      Self::Is => "is",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
  Null,
  Bool(bool),
  Int(i64),
  Text(String),
  List(Vec<String>),
}

impl From<&str> for FilterValue {
  fn from(v: &str) -> Self {
    Self::Text(v.to_string())
  }
}

impl From<String> for FilterValue {
  fn from(v: String) -> Self {
    Self::Text(v)
  }
}

impl From<i64> for FilterValue {
  fn from(v: i64) -> Self {
    Self::Int(v)
  }
}

impl From<bool> for FilterValue {
  fn from(v: bool) -> Self {
    Self::Bool(v)
  }
}

/// One `{field, operator, value}` predicate. All filters are ANDed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Filter {
  pub field: String,
  pub op: FilterOp,
  pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  Asc,
  Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
  pub field: String,
  pub direction: Direction,
}

/// Inclusive row range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
  pub from: u64,
  pub to: u64,
}

impl Page {
  /// 1-based page number of `size` rows. Page 0 is treated as page 1.
  ///
  /// Fails when the row range does not fit in `u64`.
  pub fn numbered(page: u64, size: u64) -> Result<Self, DescriptorError> {
    let size = size.max(1);
    let out_of_range = DescriptorError::PageOutOfRange { page, size };
    let from = page
      .saturating_sub(1)
      .checked_mul(size)
      .ok_or(out_of_range.clone())?;
    let to = from.checked_add(size - 1).ok_or(out_of_range)?;
    Ok(Self { from, to })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryDescriptor {
  pub kind: QueryKind,
  pub table: String,
  /// Empty means all columns
  pub columns: Vec<String>,
  pub filters: Vec<Filter>,
  pub order: Vec<OrderBy>,
  pub page: Option<Page>,
}

impl QueryDescriptor {
  pub fn select(table: impl Into<String>) -> QueryBuilder {
    QueryBuilder::new(QueryKind::Select, table.into())
  }

  pub fn count(table: impl Into<String>) -> QueryBuilder {
    QueryBuilder::new(QueryKind::Count, table.into())
  }

  /// Stable cache key: `<table>:<sha256 of the canonical descriptor>`.
  ///
  /// Filter order does not matter; everything else does. Keys of one table
  /// share the `<table>:` prefix for bulk invalidation.
  pub fn cache_key(&self) -> String {
    let mut canonical = self.clone();
    canonical.filters.sort();

    // Serializing plain data to a string cannot fail
    let input = serde_json::to_string(&canonical).unwrap_or_default();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{}:{}", self.table, hex::encode(hasher.finalize()))
  }
}

/// Builder for [`QueryDescriptor`].
#[derive(Debug, Clone)]
pub struct QueryBuilder {
  inner: QueryDescriptor,
}

impl QueryBuilder {
  fn new(kind: QueryKind, table: String) -> Self {
    Self {
      inner: QueryDescriptor {
        kind,
        table,
        columns: Vec::new(),
        filters: Vec::new(),
        order: Vec::new(),
        page: None,
      },
    }
  }

  pub fn columns(mut self, columns: &[&str]) -> Self {
    self.inner.columns = columns.iter().map(|c| c.to_string()).collect();
    self
  }

  pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<FilterValue>) -> Self {
    self.inner.filters.push(Filter {
      field: field.to_string(),
      op,
      value: value.into(),
    });
    self
  }

  pub fn eq(self, field: &str, value: impl Into<FilterValue>) -> Self {
    self.filter(field, FilterOp::Eq, value)
  }

  pub fn one_of(self, field: &str, values: &[&str]) -> Self {
    let values = values.iter().map(|v| v.to_string()).collect();
    self.filter(field, FilterOp::In, FilterValue::List(values))
  }

  pub fn order(mut self, field: &str, direction: Direction) -> Self {
    self.inner.order.push(OrderBy {
      field: field.to_string(),
      direction,
    });
    self
  }

  pub fn page(mut self, page: Page) -> Self {
    self.inner.page = Some(page);
    self
  }

  pub fn build(self) -> Result<QueryDescriptor, DescriptorError> {
    let d = self.inner;

    check_identifier(&d.table)?;
    for column in &d.columns {
      check_identifier(column)?;
    }
    for order in &d.order {
      check_identifier(&order.field)?;
    }
    for filter in &d.filters {
      check_identifier(&filter.field)?;
      match (&filter.op, &filter.value) {
        (FilterOp::In, FilterValue::List(values)) if values.is_empty() => {
          return Err(DescriptorError::EmptyInList(filter.field.clone()));
        }
        (FilterOp::In, FilterValue::List(_)) => {}
        (FilterOp::In, _) | (_, FilterValue::List(_)) => {
          return Err(DescriptorError::MismatchedValue(filter.field.clone()));
        }
        (FilterOp::Is, FilterValue::Null | FilterValue::Bool(_)) => {}
        (FilterOp::Is, _) => {
          return Err(DescriptorError::MismatchedValue(filter.field.clone()));
        }
        _ => {}
      }
    }
    if let Some(page) = d.page {
      if page.from > page.to {
        return Err(DescriptorError::InvalidPage {
          from: page.from,
          to: page.to,
        });
      }
    }

    Ok(d)
  }
}

fn check_identifier(name: &str) -> Result<(), DescriptorError> {
  let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
  if valid {
    Ok(())
  } else {
    Err(DescriptorError::InvalidIdentifier(name.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_build_valid_descriptor() {
    let d = QueryDescriptor::select("schools")
      .columns(&["id", "name"])
      .eq("sector_id", "s-1")
      .filter("student_count", FilterOp::Gte, 100i64)
      .order("name", Direction::Asc)
      .page(Page::numbered(2, 25).unwrap())
      .build()
      .unwrap();

    assert_eq!(d.kind, QueryKind::Select);
    assert_eq!(d.filters.len(), 2);
    assert_eq!(d.page, Some(Page { from: 25, to: 49 }));
  }

  #[test]
  fn test_rejects_bad_identifiers() {
    let err = QueryDescriptor::select("regions; drop table users")
      .build()
      .unwrap_err();
    assert!(matches!(err, DescriptorError::InvalidIdentifier(_)));

    let err = QueryDescriptor::select("regions").eq("", 1i64).build().unwrap_err();
    assert_eq!(err, DescriptorError::InvalidIdentifier(String::new()));
  }

  #[test]
  fn test_rejects_mismatched_values() {
    let err = QueryDescriptor::select("users").one_of("role", &[]).build().unwrap_err();
    assert_eq!(err, DescriptorError::EmptyInList("role".into()));

    let err = QueryDescriptor::select("users")
      .filter("role", FilterOp::In, "admin")
      .build()
      .unwrap_err();
    assert_eq!(err, DescriptorError::MismatchedValue("role".into()));

    let err = QueryDescriptor::select("users")
      .filter("deleted_at", FilterOp::Is, "yesterday")
      .build()
      .unwrap_err();
    assert_eq!(err, DescriptorError::MismatchedValue("deleted_at".into()));
  }

  #[test]
  fn test_rejects_inverted_page() {
    let err = QueryDescriptor::select("regions")
      .page(Page { from: 10, to: 5 })
      .build()
      .unwrap_err();
    assert_eq!(err, DescriptorError::InvalidPage { from: 10, to: 5 });
  }

  #[test]
  fn test_numbered_page_bounds() {
    assert_eq!(Page::numbered(0, 20).unwrap(), Page { from: 0, to: 19 });
    assert_eq!(Page::numbered(3, 0).unwrap(), Page { from: 2, to: 2 });

    let err = Page::numbered(u64::MAX, 20).unwrap_err();
    assert_eq!(
      err,
      DescriptorError::PageOutOfRange {
        page: u64::MAX,
        size: 20
      }
    );
    assert!(Page::numbered(2, u64::MAX).is_err());
    assert_eq!(
      Page::numbered(1, u64::MAX).unwrap(),
      Page {
        from: 0,
        to: u64::MAX - 1
      }
    );
  }

  #[test]
  fn test_cache_key_ignores_filter_order() {
    let a = QueryDescriptor::select("schools")
      .eq("sector_id", "s-1")
      .eq("status", "active")
      .build()
      .unwrap();
    let b = QueryDescriptor::select("schools")
      .eq("status", "active")
      .eq("sector_id", "s-1")
      .build()
      .unwrap();
    let c = QueryDescriptor::select("schools")
      .eq("status", "active")
      .eq("sector_id", "s-2")
      .build()
      .unwrap();

    assert_eq!(a.cache_key(), b.cache_key());
    assert_ne!(a.cache_key(), c.cache_key());
    assert!(a.cache_key().starts_with("schools:"));
  }

  #[test]
  fn test_cache_key_distinguishes_pages_and_kind() {
    let p1 = QueryDescriptor::select("regions")
      .page(Page::numbered(1, 10).unwrap())
      .build()
      .unwrap();
    let p2 = QueryDescriptor::select("regions")
      .page(Page::numbered(2, 10).unwrap())
      .build()
      .unwrap();
    let count = QueryDescriptor::count("regions").build().unwrap();
    let all = QueryDescriptor::select("regions").build().unwrap();

    assert_ne!(p1.cache_key(), p2.cache_key());
    assert_ne!(count.cache_key(), all.cache_key());
  }
}

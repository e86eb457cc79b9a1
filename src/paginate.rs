//! # Filter / paginate helper
//! Shared by every listing operation.
//!
//! Items expose named fields through [`Filterable`]; a [`ListQuery`] applies
//! equality/range predicates (all must hold), an optional descending sort on a
//! numeric field, then cuts the page `[(page-1)*size, page*size)`.
//! Sorting is stable, so ties keep input order and equal inputs always yield
//! the same page.

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::{CoreError, Result};

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// A field value as seen by predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

/// Records that can be listed expose their filterable fields by name.
pub trait Filterable {
    fn field(&self, name: &str) -> Option<FieldValue>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(&'static str, FieldValue),
    Gte(&'static str, f64),
    Lte(&'static str, f64),
}

impl Predicate {
    /// A missing field never matches.
    pub fn matches<T: Filterable>(&self, item: &T) -> bool {
        match self {
            Predicate::Eq(name, want) => item.field(name).as_ref() == Some(want),
            Predicate::Gte(name, min) => {
                matches!(item.field(name), Some(FieldValue::Number(n)) if n >= *min)
            }
            Predicate::Lte(name, max) => {
                matches!(item.field(name), Some(FieldValue::Number(n)) if n <= *max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Absent values fall back to defaults; present values must be >= 1.
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Result<Self> {
        let page = check_positive("page", page, DEFAULT_PAGE)?;
        let page_size = check_positive("pageSize", page_size, DEFAULT_PAGE_SIZE)?;
        Ok(Self { page, page_size })
    }

    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

fn check_positive(name: &str, raw: Option<i64>, default: usize) -> Result<usize> {
    match raw {
        None => Ok(default),
        Some(v) if v >= 1 => Ok(v as usize),
        Some(v) => Err(CoreError::validation(
            "INVALID_PAGINATION",
            format!("{name} must be >= 1 (got {v})"),
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    predicates: Vec<Predicate>,
    sort_desc_by: Option<&'static str>,
    page: PageRequest,
}

impl ListQuery {
    pub fn new(page: PageRequest) -> Self {
        Self {
            predicates: Vec::new(),
            sort_desc_by: None,
            page,
        }
    }

    pub fn filter(mut self, p: Predicate) -> Self {
        self.predicates.push(p);
        self
    }

    /// Add an equality predicate only when a value is given.
    pub fn filter_eq_opt(self, name: &'static str, value: Option<impl Into<FieldValue>>) -> Self {
        match value {
            Some(v) => self.filter(Predicate::Eq(name, v.into())),
            None => self,
        }
    }

    pub fn sort_desc_by(mut self, field: &'static str) -> Self {
        self.sort_desc_by = Some(field);
        self
    }

    pub fn apply<T: Filterable + Clone>(&self, items: &[T]) -> Page<T> {
        let mut matched: Vec<&T> = items
            .iter()
            .filter(|it| self.predicates.iter().all(|p| p.matches(*it)))
            .collect();

        if let Some(field) = self.sort_desc_by {
            // stable: ties keep input order; items without the field go last
            matched.sort_by(|a, b| match (number(*a, field), number(*b, field)) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }

        let total_count = matched.len();
        let start = self.page.offset().min(total_count);
        let end = start.saturating_add(self.page.page_size).min(total_count);
        let items = matched[start..end].iter().map(|t| (*t).clone()).collect();

        Page {
            items,
            meta: PageMeta {
                total_count,
                page: self.page.page,
                page_size: self.page.page_size,
                has_more: self.page.page.saturating_mul(self.page.page_size) < total_count,
            },
        }
    }
}

fn number<T: Filterable>(item: &T, field: &str) -> Option<f64> {
    match item.field(field) {
        Some(FieldValue::Number(n)) => Some(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        idx: usize,
        kind: &'static str,
        scope: &'static str,
        score: f64,
    }

    impl Filterable for Row {
        fn field(&self, name: &str) -> Option<FieldValue> {
            match name {
                "kind" => Some(self.kind.into()),
                "scope" => Some(self.scope.into()),
                "score" => Some(self.score.into()),
                _ => None,
            }
        }
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|idx| Row {
                idx,
                kind: if idx % 2 == 0 { "rule" } else { "pattern" },
                scope: if idx % 3 == 0 { "universe" } else { "target" },
                score: 0.0,
            })
            .collect()
    }

    #[test]
    fn default_page_of_25_has_more() {
        let page = ListQuery::new(PageRequest::default()).apply(&rows(25));
        assert_eq!(page.items.len(), 20);
        assert_eq!(page.meta.total_count, 25);
        assert!(page.meta.has_more);
    }

    #[test]
    fn second_page_of_30_returns_items_10_to_19() {
        let req = PageRequest::new(Some(2), Some(10)).unwrap();
        let page = ListQuery::new(req).apply(&rows(30));
        let idx: Vec<usize> = page.items.iter().map(|r| r.idx).collect();
        assert_eq!(idx, (10..20).collect::<Vec<_>>());
        assert!(page.meta.has_more);
    }

    #[test]
    fn last_partial_page_has_no_more() {
        let req = PageRequest::new(Some(3), Some(10)).unwrap();
        let page = ListQuery::new(req).apply(&rows(25));
        assert_eq!(page.items.len(), 5);
        assert!(!page.meta.has_more);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let req = PageRequest::new(Some(9), Some(10)).unwrap();
        let page = ListQuery::new(req).apply(&rows(25));
        assert!(page.items.is_empty());
        assert_eq!(page.meta.total_count, 25);
        assert!(!page.meta.has_more);
    }

    #[test]
    fn predicates_intersect() {
        let q = ListQuery::new(PageRequest::new(Some(1), Some(100)).unwrap())
            .filter(Predicate::Eq("scope", "universe".into()))
            .filter(Predicate::Eq("kind", "rule".into()));
        let page = q.apply(&rows(12));
        let idx: Vec<usize> = page.items.iter().map(|r| r.idx).collect();
        // idx % 3 == 0 AND idx % 2 == 0
        assert_eq!(idx, vec![0, 6]);
    }

    #[test]
    fn sort_desc_is_stable_on_ties() {
        let mut data = rows(4);
        let scores = [0.5, 0.9, 0.7, 0.9];
        for (r, s) in data.iter_mut().zip(scores) {
            r.score = s;
        }
        let page = ListQuery::default().sort_desc_by("score").apply(&data);
        let idx: Vec<usize> = page.items.iter().map(|r| r.idx).collect();
        assert_eq!(idx, vec![1, 3, 2, 0]);
    }

    #[test]
    fn range_predicates() {
        let mut data = rows(3);
        data[0].score = 0.2;
        data[1].score = 0.6;
        data[2].score = 0.9;
        let page = ListQuery::default()
            .filter(Predicate::Gte("score", 0.5))
            .filter(Predicate::Lte("score", 0.8))
            .apply(&data);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].idx, 1);
    }

    #[test]
    fn zero_page_is_rejected() {
        let err = PageRequest::new(Some(0), None).unwrap_err();
        assert_eq!(err.code(), "INVALID_PAGINATION");
        assert!(PageRequest::new(None, Some(-3)).is_err());
    }
}

//! Filter / sort / paginate query primitive.

use crate::document::{compare_values, project, sort_order, Document};
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a property filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl FilterOp {
    /// Returns true if a comparison result satisfies this operator.
    ///
    /// Incomparable values (`None`) only satisfy `!=`.
    #[must_use]
    pub fn accepts(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (FilterOp::Ne, None) => true,
            (_, None) => false,
            (FilterOp::Eq, Some(o)) => o == Ordering::Equal,
            (FilterOp::Ne, Some(o)) => o != Ordering::Equal,
            (FilterOp::Lt, Some(o)) => o == Ordering::Less,
            (FilterOp::Le, Some(o)) => o != Ordering::Greater,
            (FilterOp::Gt, Some(o)) => o == Ordering::Greater,
            (FilterOp::Ge, Some(o)) => o != Ordering::Less,
        }
    }
}

impl FromStr for FilterOp {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" => Ok(FilterOp::Eq),
            "!=" => Ok(FilterOp::Ne),
            "<" => Ok(FilterOp::Lt),
            "<=" => Ok(FilterOp::Le),
            ">" => Ok(FilterOp::Gt),
            ">=" => Ok(FilterOp::Ge),
            other => Err(StoreError::invalid_query(format!("unknown operator {other:?}"))),
        }
    }
}

/// A single query predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Compare a top-level property against a value.
    Property {
        /// Property name.
        field: String,
        /// Operator.
        op: FilterOp,
        /// Right-hand operand.
        value: Value,
    },
    /// Match exactly one key.
    Key(Key),
}

impl Filter {
    fn matches(&self, key: &Key, document: &Document) -> bool {
        match self {
            Filter::Property { field, op, value } => match document.get(field) {
                Some(actual) => op.accepts(compare_values(actual, value)),
                None => false,
            },
            Filter::Key(wanted) => wanted == key,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Sort order on one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Property name.
    pub field: String,
    /// Direction.
    pub direction: Direction,
}

/// Opaque continuation token returned by a query page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    fn at(position: usize) -> Self {
        Self(format!("pos:{position}"))
    }

    fn position(&self) -> StoreResult<usize> {
        self.0
            .strip_prefix("pos:")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| StoreError::invalid_query(format!("malformed cursor {:?}", self.0)))
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A query over one kind.
///
/// Built fluently:
///
/// ```rust
/// use keylock_store::{FilterOp, Query};
///
/// let query = Query::new("Persons")
///     .filter("balance", FilterOp::Ge, 100)
///     .descend("balance")
///     .limit(10);
/// assert_eq!(query.kind(), "Persons");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    kind: String,
    namespace: Option<String>,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    offset: usize,
    limit: Option<usize>,
    projection: Vec<String>,
    start: Option<Cursor>,
}

impl Query {
    /// Creates a query matching every document of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: None,
            filters: Vec::new(),
            orders: Vec::new(),
            offset: 0,
            limit: None,
            projection: Vec::new(),
            start: None,
        }
    }

    /// Restricts the query to a namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Adds a property filter.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Property {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Adds a key equality filter.
    #[must_use]
    pub fn filter_key(mut self, key: Key) -> Self {
        self.filters.push(Filter::Key(key));
        self
    }

    /// Sorts ascending on `field`. Later orders break ties of earlier ones.
    #[must_use]
    pub fn ascend(mut self, field: impl Into<String>) -> Self {
        self.orders.push(Order {
            field: field.into(),
            direction: Direction::Ascending,
        });
        self
    }

    /// Sorts descending on `field`.
    #[must_use]
    pub fn descend(mut self, field: impl Into<String>) -> Self {
        self.orders.push(Order {
            field: field.into(),
            direction: Direction::Descending,
        });
        self
    }

    /// Skips `offset` matches (after the start cursor, if any).
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Caps the number of returned documents.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Projects returned documents onto `fields`.
    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Resumes from a continuation token of a previous page.
    #[must_use]
    pub fn start(mut self, cursor: Cursor) -> Self {
        self.start = Some(cursor);
        self
    }

    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the filters.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Returns true if a document belongs to the result set.
    #[must_use]
    pub fn matches(&self, key: &Key, document: &Document) -> bool {
        key.kind() == self.kind
            && key.namespace() == self.namespace.as_deref()
            && self.filters.iter().all(|f| f.matches(key, document))
    }

    /// Evaluates the query over candidate documents.
    ///
    /// Stores without a native query engine can hand their committed
    /// documents to this function.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidQuery`] for a malformed start cursor.
    pub fn evaluate<'a, I>(&self, candidates: I) -> StoreResult<QueryPage>
    where
        I: IntoIterator<Item = (&'a Key, &'a Document)>,
    {
        let mut matched: Vec<(&Key, &Document)> = candidates
            .into_iter()
            .filter(|(key, doc)| self.matches(key, doc))
            .collect();
        matched.sort_by(|a, b| self.compare(a, b));

        let begin = match &self.start {
            Some(cursor) => cursor.position()?,
            None => 0,
        }
        .saturating_add(self.offset);

        let end = match self.limit {
            Some(limit) => begin.saturating_add(limit).min(matched.len()),
            None => matched.len(),
        };

        let entities = matched
            .get(begin..end)
            .unwrap_or_default()
            .iter()
            .map(|(key, doc)| ((*key).clone(), project(doc, &self.projection)))
            .collect();

        let end_cursor = (end < matched.len()).then(|| Cursor::at(end));
        Ok(QueryPage {
            entities,
            end_cursor,
        })
    }

    fn compare(&self, a: &(&Key, &Document), b: &(&Key, &Document)) -> Ordering {
        for order in &self.orders {
            let left = a.1.get(&order.field).unwrap_or(&Value::Null);
            let right = b.1.get(&order.field).unwrap_or(&Value::Null);
            let ord = sort_order(left, right);
            let ord = match order.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.0.cmp(b.0)
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    /// Matching documents with their keys.
    pub entities: Vec<(Key, Document)>,
    /// Token for the next page; `None` when there are no more results.
    pub end_cursor: Option<Cursor>,
}

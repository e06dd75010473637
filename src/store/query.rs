use crate::core::{Attributes, DbError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest page a single select may return.
pub const MAX_SELECT_LIMIT: usize = 2_500;

/// Attribute predicate. Values compare lexicographically, so numbers and
/// timestamps must be stored in a sortable format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Predicate {
    Eq { attribute: String, value: String },
    Lt { attribute: String, value: String },
    Le { attribute: String, value: String },
    Gt { attribute: String, value: String },
    Ge { attribute: String, value: String },
    In { attribute: String, values: Vec<String> },
}

impl Predicate {
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn lt(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Lt {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn le(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Le {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn gt(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Gt {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn ge(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Ge {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn is_in<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::In {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn attribute(&self) -> &str {
        match self {
            Self::Eq { attribute, .. }
            | Self::Lt { attribute, .. }
            | Self::Le { attribute, .. }
            | Self::Gt { attribute, .. }
            | Self::Ge { attribute, .. }
            | Self::In { attribute, .. } => attribute,
        }
    }

    /// An item lacking the attribute never matches.
    pub fn matches(&self, attributes: &Attributes) -> bool {
        let Some(actual) = attributes.get(self.attribute()) else {
            return false;
        };

        match self {
            Self::Eq { value, .. } => actual == value,
            Self::Lt { value, .. } => actual < value,
            Self::Le { value, .. } => actual <= value,
            Self::Gt { value, .. } => actual > value,
            Self::Ge { value, .. } => actual >= value,
            Self::In { values, .. } => values.iter().any(|value| value == actual),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq { attribute, value } => write!(f, "{} = {}", attribute, quote(value)),
            Self::Lt { attribute, value } => write!(f, "{} < {}", attribute, quote(value)),
            Self::Le { attribute, value } => write!(f, "{} <= {}", attribute, quote(value)),
            Self::Gt { attribute, value } => write!(f, "{} > {}", attribute, quote(value)),
            Self::Ge { attribute, value } => write!(f, "{} >= {}", attribute, quote(value)),
            Self::In { attribute, values } => {
                let rendered = values.iter().map(|v| quote(v)).collect::<Vec<_>>();
                write!(f, "{} in ({})", attribute, rendered.join(", "))
            }
        }
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderBy {
    pub attribute: String,
    pub order: SortOrder,
}

/// Declarative select over one domain.
///
/// Predicates are AND-ed. With `order_by` set, items lacking the sort
/// attribute are excluded, as the remote store does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectQuery {
    pub domain: String,
    pub predicates: Vec<Predicate>,
    pub order_by: Option<OrderBy>,
    pub limit: usize,
    pub next_token: Option<String>,
}

impl SelectQuery {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            predicates: Vec::new(),
            order_by: None,
            limit: 100,
            next_token: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_by(mut self, attribute: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some(OrderBy {
            attribute: attribute.into(),
            order,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Resumes after a previous page.
    pub fn after(mut self, next_token: Option<String>) -> Self {
        self.next_token = next_token;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(DbError::InvalidArgument(
                "select domain must not be empty".to_string(),
            ));
        }
        if self.limit == 0 || self.limit > MAX_SELECT_LIMIT {
            return Err(DbError::InvalidArgument(format!(
                "select limit must be within 1..={}, got {}",
                MAX_SELECT_LIMIT, self.limit
            )));
        }
        Ok(())
    }

    pub fn matches(&self, attributes: &Attributes) -> bool {
        if let Some(order_by) = &self.order_by {
            if !attributes.contains_key(&order_by.attribute) {
                return false;
            }
        }
        self.predicates
            .iter()
            .all(|predicate| predicate.matches(attributes))
    }
}

impl fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "select * from `{}`", self.domain)?;
        if !self.predicates.is_empty() {
            let clauses = self
                .predicates
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            write!(f, " where {}", clauses.join(" and "))?;
        }
        if let Some(order_by) = &self.order_by {
            let direction = match order_by.order {
                SortOrder::Asc => "asc",
                SortOrder::Desc => "desc",
            };
            write!(f, " order by {} {}", order_by.attribute, direction)?;
        }
        write!(f, " limit {}", self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    pub item_name: String,
    pub attributes: Attributes,
}

/// One page of select results. `next_token` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectPage {
    pub items: Vec<SelectItem>,
    pub next_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn predicates_compare_lexicographically() {
        let item = attrs(&[("Version", "2024-01-02T00:00:00.000000Z")]);
        assert!(Predicate::le("Version", "2024-01-02T00:00:00.000000Z").matches(&item));
        assert!(!Predicate::lt("Version", "2024-01-02T00:00:00.000000Z").matches(&item));
        assert!(Predicate::gt("Version", "2023-12-31T23:59:59.999999Z").matches(&item));
    }

    #[test]
    fn missing_attribute_never_matches() {
        let item = attrs(&[("type", "WriteStep")]);
        assert!(!Predicate::eq("MachineId", "m-1").matches(&item));
        assert!(!Predicate::is_in("MachineId", ["m-1", "m-2"]).matches(&item));
    }

    #[test]
    fn order_by_excludes_items_without_sort_attribute() {
        let query = SelectQuery::new("d").order_by("Version", SortOrder::Asc);
        assert!(!query.matches(&attrs(&[("type", "WriteStep")])));
        assert!(query.matches(&attrs(&[("Version", "1")])));
    }

    #[test]
    fn renders_declarative_expression() {
        let query = SelectQuery::new("ReliableWrites")
            .filter(Predicate::eq("type", "WriteStep"))
            .filter(Predicate::eq("MachineId", "m-1"))
            .filter(Predicate::le("Version", "2024"))
            .order_by("Version", SortOrder::Asc)
            .limit(100);
        assert_eq!(
            query.to_string(),
            "select * from `ReliableWrites` where type = 'WriteStep' and MachineId = 'm-1' \
             and Version <= '2024' order by Version asc limit 100"
        );
    }

    #[test]
    fn rejects_out_of_range_limit() {
        assert!(SelectQuery::new("d").limit(0).validate().is_err());
        assert!(SelectQuery::new("d").limit(MAX_SELECT_LIMIT + 1).validate().is_err());
        assert!(SelectQuery::new("d").limit(MAX_SELECT_LIMIT).validate().is_ok());
    }
}

use time::OffsetDateTime;

use crate::models::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOperator {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl SearchOperator {
    pub fn sql(&self) -> &'static str {
        match self {
            SearchOperator::Equals => "=",
            SearchOperator::NotEquals => "<>",
            SearchOperator::LessThan => "<",
            SearchOperator::LessThanOrEqual => "<=",
            SearchOperator::GreaterThan => ">",
            SearchOperator::GreaterThanOrEqual => ">=",
        }
    }
}

/// The temporal system columns a search can compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeColumn {
    Instant,
    Start,
    End,
}

/// A search predicate. A list of terms is an implicit AND.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchTerm {
    Attribute {
        name: String,
        operator: SearchOperator,
        value: Value,
    },
    Id(i64),
    Container(i64),
    Time {
        column: TimeColumn,
        operator: SearchOperator,
        instant: OffsetDateTime,
    },
    And(Vec<SearchTerm>),
    Or(Vec<SearchTerm>),
}

impl SearchTerm {
    pub fn attribute(name: &str, operator: SearchOperator, value: impl Into<Value>) -> Self {
        SearchTerm::Attribute {
            name: name.to_string(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(name: &str, value: impl Into<Value>) -> Self {
        Self::attribute(name, SearchOperator::Equals, value)
    }

    pub fn time(column: TimeColumn, operator: SearchOperator, instant: OffsetDateTime) -> Self {
        SearchTerm::Time {
            column,
            operator,
            instant,
        }
    }

    pub fn or(terms: impl IntoIterator<Item = SearchTerm>) -> Self {
        SearchTerm::Or(terms.into_iter().collect())
    }

    pub fn and(terms: impl IntoIterator<Item = SearchTerm>) -> Self {
        SearchTerm::And(terms.into_iter().collect())
    }
}

//! Time-bucketed, prefix-summed reports over instant records.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use time::{Date, Duration, Month, OffsetDateTime};

use crate::{
    models::{Attributes, Value},
    search::SearchTerm,
    storage::StorageError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportGranularity {
    Year,
    Month,
    Day,
}

/// Parameters of a report over one instant record type.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportQuery {
    pub record_type: String,
    /// First year reported (inclusive).
    pub start_year: i32,
    /// First year not reported (exclusive).
    pub end_year: i32,
    pub granularity: ReportGranularity,
    pub terms: Vec<SearchTerm>,
    /// Name under which the container id is reported as a dimension.
    pub container_dimension: Option<String>,
    pub dimensions: Vec<String>,
    pub measures: Vec<String>,
}

impl ReportQuery {
    pub fn new(
        record_type: &str,
        start_year: i32,
        end_year: i32,
        granularity: ReportGranularity,
    ) -> Self {
        ReportQuery {
            record_type: record_type.to_string(),
            start_year,
            end_year,
            granularity,
            terms: Vec::new(),
            container_dimension: None,
            dimensions: Vec::new(),
            measures: Vec::new(),
        }
    }

    pub fn filter(mut self, term: SearchTerm) -> Self {
        self.terms.push(term);
        self
    }

    pub fn group_by_container(mut self, name: &str) -> Self {
        self.container_dimension = Some(name.to_string());
        self
    }

    pub fn dimension(mut self, name: &str) -> Self {
        self.dimensions.push(name.to_string());
        self
    }

    pub fn measure(mut self, name: &str) -> Self {
        self.measures.push(name.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DimensionValue {
    Container(i64),
    Attribute(Value),
}

pub type DimensionKey = BTreeMap<String, DimensionValue>;

fn calendar_date(year: i32, month: Month, day: u8) -> Result<Date, StorageError> {
    Date::from_calendar_date(year, month, day)
        .map_err(|e| StorageError::Validation(format!("invalid report date: {}", e)))
}

/// Last representable millisecond of the day before `date`.
fn end_before(date: Date) -> OffsetDateTime {
    date.midnight().assume_utc() - Duration::milliseconds(1)
}

pub fn end_of_year(year: i32) -> Result<OffsetDateTime, StorageError> {
    Ok(end_before(calendar_date(year + 1, Month::January, 1)?))
}

fn next_period(date: Date, granularity: ReportGranularity) -> Result<Date, StorageError> {
    match granularity {
        ReportGranularity::Year => calendar_date(date.year() + 1, Month::January, 1),
        ReportGranularity::Month => match date.month() {
            Month::December => calendar_date(date.year() + 1, Month::January, 1),
            month => calendar_date(date.year(), month.next(), 1),
        },
        ReportGranularity::Day => date.next_day().ok_or_else(|| {
            StorageError::Validation(format!("no day after {}", date))
        }),
    }
}

/// End of `start_year - 1`, then the end of every period up to `end_year`.
pub fn report_boundaries(
    granularity: ReportGranularity,
    start_year: i32,
    end_year: i32,
) -> Result<Vec<OffsetDateTime>, StorageError> {
    if end_year < start_year {
        return Err(StorageError::Validation(format!(
            "report end year {} is before start year {}",
            end_year, start_year
        )));
    }
    let mut boundaries = vec![end_of_year(start_year - 1)?];
    let last = calendar_date(end_year, Month::January, 1)?;
    let mut cursor = calendar_date(start_year, Month::January, 1)?;
    while cursor < last {
        let next = next_period(cursor, granularity)?;
        boundaries.push(end_before(next));
        cursor = next;
    }
    Ok(boundaries)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    instant: OffsetDateTime,
    measures: BTreeMap<String, Decimal>,
}

impl ReportEntry {
    pub fn instant(&self) -> OffsetDateTime {
        self.instant
    }

    pub fn measure(&self, name: &str) -> Decimal {
        self.measures.get(name).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn measures(&self) -> &BTreeMap<String, Decimal> {
        &self.measures
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    dimensions: DimensionKey,
    entries: Vec<ReportEntry>,
}

impl ReportRow {
    pub fn dimensions(&self) -> &DimensionKey {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionValue> {
        self.dimensions.get(name)
    }

    /// One entry per boundary, in boundary order.
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    boundaries: Vec<OffsetDateTime>,
    rows: Vec<ReportRow>,
}

impl Report {
    pub fn boundaries(&self) -> &[OffsetDateTime] {
        &self.boundaries
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn row(&self, dimensions: &DimensionKey) -> Option<&ReportRow> {
        self.rows.iter().find(|row| &row.dimensions == dimensions)
    }
}

struct Group {
    key: DimensionKey,
    buckets: Vec<BTreeMap<String, Decimal>>,
}

/// Accumulates rows into buckets, then prefix-sums them into a [`Report`].
pub struct ReportBuilder {
    boundaries: Vec<OffsetDateTime>,
    container_dimension: Option<String>,
    dimensions: Vec<String>,
    measures: Vec<String>,
    index: HashMap<DimensionKey, usize>,
    groups: Vec<Group>,
}

impl ReportBuilder {
    pub fn new(query: &ReportQuery) -> Result<Self, StorageError> {
        Ok(ReportBuilder {
            boundaries: report_boundaries(query.granularity, query.start_year, query.end_year)?,
            container_dimension: query.container_dimension.clone(),
            dimensions: query.dimensions.clone(),
            measures: query.measures.clone(),
            index: HashMap::new(),
            groups: Vec::new(),
        })
    }

    pub fn boundaries(&self) -> &[OffsetDateTime] {
        &self.boundaries
    }

    pub fn last_boundary(&self) -> Option<OffsetDateTime> {
        self.boundaries.last().copied()
    }

    /// Adds one row to the earliest boundary at or after `instant`.
    ///
    /// Rows after the last boundary are ignored. Missing measures count as zero.
    pub fn aggregate(
        &mut self,
        instant: OffsetDateTime,
        container_id: Option<i64>,
        attributes: &Attributes,
    ) -> Result<(), StorageError> {
        let bucket = self.boundaries.partition_point(|boundary| *boundary < instant);
        if bucket == self.boundaries.len() {
            return Ok(());
        }

        let mut key = DimensionKey::new();
        for dimension in &self.dimensions {
            if let Some(value) = attributes.get(dimension) {
                key.insert(dimension.clone(), DimensionValue::Attribute(value.clone()));
            }
        }
        if let (Some(name), Some(id)) = (&self.container_dimension, container_id) {
            key.insert(name.clone(), DimensionValue::Container(id));
        }

        let mut contributions = Vec::with_capacity(self.measures.len());
        for measure in &self.measures {
            let amount = match attributes.get(measure) {
                None => Decimal::ZERO,
                Some(Value::Decimal(d)) => *d,
                Some(Value::Integer(i)) => Decimal::from(*i),
                Some(other) => {
                    return Err(StorageError::Validation(format!(
                        "measure {} is not numeric: {}",
                        measure, other
                    )))
                }
            };
            contributions.push((measure, amount));
        }

        let group = match self.index.get(&key) {
            Some(index) => *index,
            None => {
                let zero: BTreeMap<String, Decimal> =
                    self.measures.iter().map(|m| (m.clone(), Decimal::ZERO)).collect();
                self.groups.push(Group {
                    key: key.clone(),
                    buckets: vec![zero; self.boundaries.len()],
                });
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        let totals = &mut self.groups[group].buckets[bucket];
        for (measure, amount) in contributions {
            if let Some(total) = totals.get_mut(measure.as_str()) {
                *total += amount;
            }
        }
        Ok(())
    }

    pub fn build(self) -> Report {
        let boundaries = self.boundaries;
        let rows = self
            .groups
            .into_iter()
            .map(|group| {
                let mut running: BTreeMap<String, Decimal> = BTreeMap::new();
                let entries = group
                    .buckets
                    .into_iter()
                    .zip(boundaries.iter())
                    .map(|(bucket, instant)| {
                        for (measure, amount) in bucket {
                            *running.entry(measure).or_insert(Decimal::ZERO) += amount;
                        }
                        ReportEntry {
                            instant: *instant,
                            measures: running.clone(),
                        }
                    })
                    .collect();
                ReportRow {
                    dimensions: group.key,
                    entries,
                }
            })
            .collect();
        Report { boundaries, rows }
    }
}

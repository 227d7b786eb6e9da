//! Interval timelines: non-overlapping `[start, end)` entries ordered by start.
//!
//! [`plan_update`] computes the edits an update needs from the entries around the
//! new range. [`IntervalTimeline`] applies them in memory; the store applies the same
//! plan as statements against the backend.

use std::collections::BTreeMap;

use crate::storage::StorageError;

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry<T, A> {
    pub id: i64,
    pub start: T,
    pub end: T,
    pub attributes: A,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEdit<T, A> {
    /// Copy of entry `source` covering `[start, end)`, with its attributes.
    Split {
        source: i64,
        start: T,
        end: T,
        attributes: A,
    },
    /// Shorten the entry starting at `start` so that it ends at `end`.
    Truncate { id: i64, start: T, end: T },
    Remove { id: i64, start: T },
    Insert { start: T, end: T, attributes: A },
}

pub fn check_range<T: Ord>(start: &T, end: &T) -> Result<(), StorageError> {
    if start >= end {
        return Err(StorageError::Validation(
            "interval start must be before its end".to_string(),
        ));
    }
    Ok(())
}

/// Plans `update(start, end, attributes)`.
///
/// `preceding` is the entry with the greatest start before `start`. `within` are the
/// entries whose start lies in `[start, end)`, in ascending start order. The final edit
/// is always the `Insert` of the new entry.
pub fn plan_update<'e, T, A, I>(
    start: T,
    end: T,
    attributes: A,
    preceding: Option<&'e TimelineEntry<T, A>>,
    within: I,
) -> Result<Vec<TimelineEdit<T, A>>, StorageError>
where
    T: Ord + Copy + 'e,
    A: Clone + 'e,
    I: IntoIterator<Item = &'e TimelineEntry<T, A>>,
{
    check_range(&start, &end)?;
    let mut edits = Vec::new();

    if let Some(previous) = preceding {
        if previous.end > end {
            edits.push(TimelineEdit::Split {
                source: previous.id,
                start: end,
                end: previous.end,
                attributes: previous.attributes.clone(),
            });
            edits.push(TimelineEdit::Truncate {
                id: previous.id,
                start: previous.start,
                end: start,
            });
            edits.push(TimelineEdit::Insert {
                start,
                end,
                attributes,
            });
            return Ok(edits);
        }
        if previous.end > start {
            edits.push(TimelineEdit::Truncate {
                id: previous.id,
                start: previous.start,
                end: start,
            });
        }
    }

    let mut removals = Vec::new();
    let mut last = None;
    for entry in within {
        removals.push(TimelineEdit::Remove {
            id: entry.id,
            start: entry.start,
        });
        last = Some(entry);
    }
    if let Some(last) = last.filter(|e| e.end > end) {
        edits.push(TimelineEdit::Split {
            source: last.id,
            start: end,
            end: last.end,
            attributes: last.attributes.clone(),
        });
    }
    edits.extend(removals);
    edits.push(TimelineEdit::Insert {
        start,
        end,
        attributes,
    });
    Ok(edits)
}

/// In-memory timeline for one (container, record type).
#[derive(Debug, Clone)]
pub struct IntervalTimeline<T, A> {
    entries: BTreeMap<T, TimelineEntry<T, A>>,
    next_id: i64,
}

impl<T: Ord + Copy, A: Clone> Default for IntervalTimeline<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Copy, A: Clone> IntervalTimeline<T, A> {
    pub fn new() -> Self {
        IntervalTimeline {
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TimelineEntry<T, A>> {
        self.entries.values()
    }

    /// The entry whose `[start, end)` contains `instant`.
    pub fn at(&self, instant: T) -> Option<&TimelineEntry<T, A>> {
        self.entries
            .range(..=instant)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.end > instant)
    }

    /// Entries overlapping `[start, end)`, in start order.
    pub fn range(&self, start: T, end: T) -> Vec<&TimelineEntry<T, A>> {
        let mut found: Vec<&TimelineEntry<T, A>> = self
            .entries
            .range(..start)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.end > start)
            .into_iter()
            .collect();
        if start < end {
            found.extend(self.entries.range(start..end).map(|(_, entry)| entry));
        }
        found
    }

    /// Sets `[start, end)` to `attributes`, returning the id of the new entry.
    pub fn update(&mut self, start: T, end: T, attributes: A) -> Result<i64, StorageError> {
        check_range(&start, &end)?;
        let disjoint = match (self.entries.values().next(), self.entries.values().next_back()) {
            (Some(first), Some(last)) => start >= last.end || end <= first.start,
            _ => true,
        };
        if disjoint {
            return Ok(self.push(start, end, attributes));
        }

        let preceding = self.entries.range(..start).next_back().map(|(_, e)| e);
        let within = self.entries.range(start..end).map(|(_, e)| e);
        let edits = plan_update(start, end, attributes, preceding, within)?;
        Ok(self.apply(edits))
    }

    fn push(&mut self, start: T, end: T, attributes: A) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            start,
            TimelineEntry {
                id,
                start,
                end,
                attributes,
            },
        );
        id
    }

    fn apply(&mut self, edits: Vec<TimelineEdit<T, A>>) -> i64 {
        let mut inserted = 0;
        for edit in edits {
            match edit {
                TimelineEdit::Split {
                    start,
                    end,
                    attributes,
                    ..
                } => {
                    self.push(start, end, attributes);
                }
                TimelineEdit::Truncate { start, end, .. } => {
                    if let Some(entry) = self.entries.get_mut(&start) {
                        entry.end = end;
                    }
                }
                TimelineEdit::Remove { start, .. } => {
                    self.entries.remove(&start);
                }
                TimelineEdit::Insert {
                    start,
                    end,
                    attributes,
                } => {
                    inserted = self.push(start, end, attributes);
                }
            }
        }
        inserted
    }
}

//! Turn Boundary Calculation
//!
//! A turn starts at a real (non-synthetic) user record and runs until the
//! next one. [`decide`] turns a record sequence plus the session limits into
//! a compaction decision; it is pure so it can be re-run after the store
//! changed underneath a pending summary.

use super::record::Record;

/// Outcome of a boundary calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Within limits, nothing to do
    Keep,
    /// Records before `boundary` should be summarized
    Compact { boundary: usize },
}

impl Decision {
    pub fn needs_compaction(&self) -> bool {
        matches!(self, Decision::Compact { .. })
    }

    /// Cut point, if compaction is needed
    pub fn boundary(&self) -> Option<usize> {
        match self {
            Decision::Keep => None,
            Decision::Compact { boundary } => Some(*boundary),
        }
    }
}

/// Indices of records that start a real user turn
pub fn turn_starts<'a, I>(records: I) -> Vec<usize>
where
    I: IntoIterator<Item = &'a Record>,
{
    records
        .into_iter()
        .enumerate()
        .filter(|(_, record)| record.is_turn_start())
        .map(|(index, _)| index)
        .collect()
}

/// Decide whether `records` exceed `context_limit` real turns and where to cut.
///
/// The retained suffix starts at the earliest of the last `keep_last_n_turns`
/// turns; with `keep_last_n_turns == 0` the whole store is the prefix.
pub fn decide<'a, I>(records: I, keep_last_n_turns: usize, context_limit: usize) -> Decision
where
    I: IntoIterator<Item = &'a Record>,
    I::IntoIter: ExactSizeIterator,
{
    let records = records.into_iter();
    let len = records.len();
    let starts = turn_starts(records);
    let real_turns = starts.len();

    if real_turns <= context_limit {
        return Decision::Keep;
    }

    if keep_last_n_turns == 0 {
        return Decision::Compact { boundary: len };
    }

    // keep_last_n_turns <= context_limit < real_turns, so the index is in range
    let boundary = match real_turns
        .checked_sub(keep_last_n_turns)
        .and_then(|i| starts.get(i))
    {
        Some(&boundary) => boundary,
        None => return Decision::Keep,
    };

    if boundary == 0 {
        return Decision::Keep;
    }

    Decision::Compact { boundary }
}

//! Timeline expansion
//!
//! Turns sparse, dated policy events for one territory into one
//! [`DailyIndicatorRow`] per calendar day. Each indicator keeps a current
//! state; an event on a day replaces that state, absence carries it forward.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::{AnalysisWindow, IndicatorConfigTable};
use crate::error::IndexError;
use crate::scorer::{score_targeting, ScoringTable};
use crate::types::{DailyIndicatorRow, IndicatorValue, PolicyEvent};

/// Day-by-day forward scan over a territory's events
pub struct TimelineExpander<'a> {
    indicators: &'a IndicatorConfigTable,
    scoring: &'a ScoringTable,
}

impl<'a> TimelineExpander<'a> {
    pub fn new(indicators: &'a IndicatorConfigTable, scoring: &'a ScoringTable) -> Self {
        Self {
            indicators,
            scoring,
        }
    }

    /// Expand `events` (already filtered to one territory) over `window`.
    ///
    /// Returns exactly `window.len()` rows. When several events of one
    /// indicator fall on the same day only the first in input order is used.
    /// Events before the window are replayed to seed the first row; events
    /// after it and events for unconfigured indicators are ignored.
    pub fn expand(
        &self,
        events: &[PolicyEvent],
        window: AnalysisWindow,
    ) -> Result<Vec<DailyIndicatorRow>, IndexError> {
        let by_date = group_by_date(events, window.end);

        let mut state: Vec<IndicatorValue> =
            self.indicators.codes().map(IndicatorValue::blank).collect();
        for day_events in by_date.range(..window.start).map(|(_, v)| v) {
            self.apply_day(&mut state, day_events)?;
        }

        let mut rows = Vec::with_capacity(window.len());
        for date in window.days() {
            if let Some(day_events) = by_date.get(&date) {
                self.apply_day(&mut state, day_events)?;
            }

            rows.push(DailyIndicatorRow {
                date,
                values: state.clone(),
            });
        }

        debug!(
            days = rows.len(),
            event_days = by_date.len(),
            "expanded policy timeline"
        );

        Ok(rows)
    }

    fn apply_day(
        &self,
        state: &mut [IndicatorValue],
        day_events: &[&PolicyEvent],
    ) -> Result<(), IndexError> {
        for slot in state.iter_mut() {
            let first = day_events.iter().find(|e| e.code == slot.code);
            if let Some(event) = first {
                *slot = self.apply(event)?;
            }
        }
        Ok(())
    }

    /// New indicator state from an event: scored when the restriction is
    /// active, cleared when it is lifted
    fn apply(&self, event: &PolicyEvent) -> Result<IndicatorValue, IndexError> {
        if !event.restriction_active {
            return Ok(IndicatorValue::blank(event.code));
        }
        let level = self.scoring.score(event.code, &event.value)?;
        Ok(IndicatorValue {
            code: event.code,
            level,
            targeted_flag: score_targeting(&event.fine_grained_location()),
            note: Arc::from(event.note()),
        })
    }
}

/// Index events up to `end` by day, preserving input order within a day
fn group_by_date(
    events: &[PolicyEvent],
    end: NaiveDate,
) -> BTreeMap<NaiveDate, Vec<&PolicyEvent>> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&PolicyEvent>> = BTreeMap::new();
    for event in events {
        if event.date > end {
            continue;
        }
        by_date.entry(event.date).or_default().push(event);
    }
    by_date
}

//! Per-chart lifecycle state machine
//!
//! ```text
//! Initial ──► New ──► Created ◄─────────────────────────┐
//!              ▲         │ misses == chart_cleanup       │
//!              │         ▼                               │
//!   Rebuilt ───┤    MarkedObsolete ──► Obsoleted ──(data)┘ via New
//!   Recovered ─┘
//!
//! MarkedRemove ──► MarkedDelete (terminal)
//! ```
//!
//! Exactly one transition happens per reconciliation, so a chart spends one tick in
//! `New` announcing its definition before it settles in `Created`.

use crate::Snapshot;
use crate::context::PriorityRegistry;

use super::Chart;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChartState {
    #[default]
    Initial,
    New,
    Created,
    Rebuilt,
    Recovered,
    MarkedObsolete,
    Obsoleted,
    MarkedRemove,
    MarkedDelete,
}

/// What the job has to write for a chart on this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Write the chart definition, then its values
    Announce,
    /// Write its values
    Update,
    /// Write the obsolescence marker and nothing else
    Obsolete,
    /// Write nothing
    Skip,
}

/// Where a chart stands in its lifecycle, kept to undo a tick whose output was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Progress {
    state: ChartState,
    misses: u32,
}

impl Step {
    pub fn writes_values(&self) -> bool {
        matches!(self, Step::Announce | Step::Update)
    }
}

impl Chart {
    /// Apply this tick's transition
    pub(crate) fn advance(&mut self, snapshot: &Snapshot, priorities: &PriorityRegistry) -> Step {
        match self.state {
            ChartState::Initial => {
                if self.priority.is_none() {
                    self.priority = Some(priorities.next_priority());
                }
                self.state = ChartState::New;
                Step::Announce
            }
            ChartState::New => {
                self.state = ChartState::Created;
                Step::Update
            }
            ChartState::Created => Step::Update,
            ChartState::Rebuilt | ChartState::Recovered => {
                self.misses = 0;
                self.state = ChartState::New;
                Step::Announce
            }
            ChartState::MarkedObsolete => {
                self.state = ChartState::Obsoleted;
                Step::Obsolete
            }
            ChartState::Obsoleted => {
                if self.has_data(snapshot) {
                    self.misses = 0;
                    self.state = ChartState::New;
                    Step::Announce
                } else {
                    Step::Skip
                }
            }
            ChartState::MarkedRemove => {
                self.state = ChartState::MarkedDelete;
                Step::Obsolete
            }
            ChartState::MarkedDelete => Step::Skip,
        }
    }

    pub(crate) fn progress(&self) -> Progress {
        Progress { state: self.state, misses: self.misses }
    }

    /// Return to an earlier position; the priority is kept
    pub(crate) fn rewind(&mut self, progress: Progress) {
        self.state = progress.state;
        self.misses = progress.misses;
    }

    /// Whether the snapshot carries a value for at least one dimension
    pub(crate) fn has_data(&self, snapshot: &Snapshot) -> bool {
        self.dims.iter().any(|dim| snapshot.contains_key(&dim.id))
    }

    /// Update the miss counter after values were written; `cleanup_after == 0` never
    /// obsoletes
    pub(crate) fn record_update(&mut self, updated: bool, cleanup_after: u32) {
        if updated {
            self.misses = 0;
            return;
        }

        self.misses = self.misses.saturating_add(1);

        // A chart still in `New` settles in `Created` first.
        if cleanup_after > 0 && self.misses >= cleanup_after && self.state == ChartState::Created {
            self.state = ChartState::MarkedObsolete;
        }
    }
}

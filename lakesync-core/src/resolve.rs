//! Column-level last-writer-wins resolution
//!
//! The winner of a column conflict is the write with the higher HLC; on equal
//! HLCs the lexicographically greater client id wins, so every replica picks
//! the same winner regardless of arrival order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::delta::{ColumnValue, DeltaOp, RowDelta};
use crate::hlc::Hlc;

/// The winning write for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnState {
    pub value: ColumnValue,
    pub hlc: Hlc,
    pub client_id: String,
}

impl ColumnState {
    pub fn new(value: impl Into<ColumnValue>, hlc: Hlc, client_id: impl Into<String>) -> Self {
        Self { value: value.into(), hlc, client_id: client_id.into() }
    }

    /// Does an incoming `(hlc, client_id)` write beat this state?
    pub fn loses_to(&self, hlc: Hlc, client_id: &str) -> bool {
        hlc > self.hlc || (hlc == self.hlc && client_id > self.client_id.as_str())
    }
}

/// Pick the winning column state between the current one and an incoming write
pub fn resolve(current: Option<ColumnState>, incoming: ColumnState) -> ColumnState {
    match current {
        None => incoming,
        Some(current) if current.loses_to(incoming.hlc, &incoming.client_id) => incoming,
        Some(current) => current,
    }
}

/// Replay a row's delta history into its current state
///
/// `history` must be sorted ascending by `(hlc, client_id)`. A DELETE clears
/// accumulated columns; a later INSERT resurrects the row with only its own
/// columns. Returns `None` iff the last surviving operation is a DELETE.
pub fn project_row_state(history: &[RowDelta]) -> Option<HashMap<String, ColumnValue>> {
    let mut state: Option<HashMap<String, ColumnValue>> = None;
    for delta in history {
        match delta.op {
            DeltaOp::Delete => {
                state = None;
            }
            DeltaOp::Insert | DeltaOp::Update => {
                let row = state.get_or_insert_with(HashMap::new);
                for col in &delta.columns {
                    row.insert(col.column.clone(), col.value.clone());
                }
            }
        }
    }
    state
}

/// Sort deltas into canonical replay order: ascending `(hlc, client_id)`
pub fn sort_for_replay(deltas: &mut [RowDelta]) {
    deltas.sort_by(|a, b| {
        a.hlc
            .cmp(&b.hlc)
            .then_with(|| a.client_id.cmp(&b.client_id))
            .then_with(|| a.delta_id.cmp(&b.delta_id))
    });
}

//! patchctl engines — encapsulation, snapshot serialize/restore, signal
//! safety, and checkpoint storage

pub mod checkpoint;
pub mod encapsulate;
pub mod safety;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use checkpoint::{CheckpointMeta, CheckpointStore};
pub use encapsulate::{EncapsulateReport, encapsulate};
pub use safety::{SafetyReport, SafetyWarning, WarningKind, check_signal_safety};
pub use snapshot::{
    BoxRecord, LineRecord, RestoreCounters, RestorePhase, RestoreProgress, RestoreState,
    Snapshot, capture, restore_all, restore_step,
};

//! Fleet command surface: one-shot operations run by operators and peers

pub mod reconcile;
pub mod report;
pub mod update;

pub use reconcile::reconcile_host;
pub use report::{backlog_report, format_timestamp, renew_now, BacklogReport};
pub use update::{apply_update, UpdateOutcome};

//! Scheduled and on-demand maintenance jobs

pub mod cleanup;

pub use cleanup::{
    CleanupError, CleanupOutcome, CleanupService, JobStats, PgRetentionStore, RetentionStore,
    CLEANUP_JOB_NAME,
};

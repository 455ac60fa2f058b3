//! Admin routes
//!
//! - `cleanup`: retention dry run, trigger and job statistics
//! - `users`: password regeneration and deactivation for staff accounts
//!
//! Every handler checks the admin role itself; the router only guarantees an
//! authenticated caller.

pub mod cleanup;
pub mod users;

/// Account entity and balance arithmetic. The single-account invariant
/// (balance never below zero) is enforced here.
pub mod account;

/// Account registry: id assignment, name uniqueness, and one exclusive lock
/// slot per account.
pub mod store;

/// Append-only audit trail of completed transfers, plus "in memory"
/// implementation. The trait is the seam for swapping in durable storage
/// without touching the engine.
pub mod ledger;

/// The transfer engine: ordered two-account locking, atomic
/// debit+credit+append with rollback, and the facade the presentation
/// layer consumes.
pub mod engine;

/// Ideally, this module would be a separate bootstrap crate next to the
/// binary, but the integration tests drive the full pipeline through it,
/// so it lives here.
pub mod bin_utils;

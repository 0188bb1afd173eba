//! The external value-commit collaborator: the moral equivalent of the
//! surrounding device object's `updateElementValues`/`postElementValues`
//! calls (explicitly out of scope per the crate's Non-goals — this trait
//! is the seam, not an implementation).
//!
//! `set_value`/`set_data_value` invoke `post_element_values` synchronously
//! and roll the element back to its previous value if it returns `Err`.
//! `get_value`/`get_data_value` invoke `update_element_values` only when
//! the caller opts in via [`crate::tree::GetValueOptions::UPDATE_ELEMENT_VALUES`].

use crate::element::Cookie;

/// Opaque synchronous transaction with whatever owns live hardware state.
/// Never called concurrently with itself by this crate (§5's single
/// logical mutator).
pub trait ElementValueCommit {
    /// Refresh `cookies`' values from the device before a read. A status
    /// of `Err` is logged by the caller; the stale in-memory value is
    /// still returned (mirrors `getValue`'s best-effort read).
    fn update_element_values(&mut self, cookies: &[Cookie]) -> Result<(), i32>;

    /// Push `cookies`' current values to the device. `Err` causes the
    /// caller to roll the written element back to its previous value.
    fn post_element_values(&mut self, cookies: &[Cookie]) -> Result<(), i32>;
}

/// A commit collaborator that always succeeds without doing anything —
/// useful for tests and for callers with no live device underneath the
/// tree (e.g. decoding captured reports offline).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCommit;

impl ElementValueCommit for NullCommit {
    fn update_element_values(&mut self, _cookies: &[Cookie]) -> Result<(), i32> {
        Ok(())
    }

    fn post_element_values(&mut self, _cookies: &[Cookie]) -> Result<(), i32> {
        Ok(())
    }
}

//! Structural self-checks for the attribute store and committed meshes.
//!
//! Debug builds (and release builds with `check-invariants`) run these
//! after every mutation that could break them; wire decoding runs the
//! fallible half unconditionally on anything it receives.

use crate::mesh_error::CmeshError;

/// Invariant checks for a data structure.
pub trait DebugInvariants {
    /// Panic on a violated invariant when invariant checking is compiled in.
    fn debug_assert_invariants(&self);
    /// Return the first violated invariant, if any.
    fn validate_invariants(&self) -> Result<(), CmeshError>;
}

/// Validate every item, stopping at the first failure.
pub fn validate_all<'a, T, I>(items: I) -> Result<(), CmeshError>
where
    T: DebugInvariants + 'a,
    I: IntoIterator<Item = &'a T>,
{
    items.into_iter().try_for_each(|item| item.validate_invariants())
}

/// Run a fallible check and panic with context when invariant checking is
/// compiled in; expands to nothing otherwise.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        {
            if let Err(e) = $expr {
                panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
            }
        }
    };
}

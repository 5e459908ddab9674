//! Runtime invariants with contract-test bookkeeping
//!
//! Production code states its invariants with [`assert_invariant!`]; each
//! checked message is recorded per thread so tests can prove, via
//! [`contract_test`], that the paths they drove actually exercised them.
//!
//! ```rust,ignore
//! use duocam::assert_invariant;
//!
//! assert_invariant!(
//!     admitted + dropped == offered,
//!     "Admitted plus dropped tuples equal tuples offered",
//!     "accounting"
//! );
//!
//! #[test]
//! fn contract_accounting() {
//!     // ...drive a session...
//!     duocam::invariant_ppt::contract_test("accounting", &[
//!         "Admitted plus dropped tuples equal tuples offered",
//!     ]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashSet;

thread_local! {
    static CHECKED: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
}

/// Check an invariant, recording that it was evaluated
///
/// Panics with the message (and optional context) when the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::check_invariant($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::check_invariant($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn check_invariant(condition: bool, message: &'static str, context: Option<&str>) {
    CHECKED.with(|checked| {
        checked.borrow_mut().insert(message);
    });
    if !condition {
        panic!("INVARIANT VIOLATION [{}]: {}", context.unwrap_or("duocam"), message);
    }
}

/// Whether `message` has been checked on this thread
pub fn was_checked(message: &str) -> bool {
    CHECKED.with(|checked| checked.borrow().contains(message))
}

/// Panic unless every listed invariant was checked on this thread
pub fn contract_test(name: &str, required: &[&str]) {
    let missing: Vec<&str> = required.iter().copied().filter(|m| !was_checked(m)).collect();
    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: invariants never checked:\n  - {}",
            name,
            missing.join("\n  - ")
        );
    }
}

/// Forget every recorded check on this thread
pub fn clear_invariant_log() {
    CHECKED.with(|checked| checked.borrow_mut().clear());
}

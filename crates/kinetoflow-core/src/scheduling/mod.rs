//! Appointments, time blocks, working hours and session reconciliation.
//!
//! All interval checks use half-open `[start, end)` semantics, so events that
//! merely touch (one ends exactly when the other starts) do not conflict.

mod appointments;
mod calendar;
mod reconciliation;
mod working_hours;

pub use appointments::*;
pub use calendar::*;
pub use reconciliation::*;
pub use working_hours::*;

use crate::db::Database;

/// Whether `[a_start, a_end)` and `[b_start, b_end)` intersect.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// Scheduling engine over one database handle.
pub struct Scheduler<'a> {
    db: &'a Database,
}

impl<'a> Scheduler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_touching_intervals_do_not_overlap() {
        assert!(!overlaps(10, 11, 11, 12));
        assert!(!overlaps(11, 12, 10, 11));
        assert!(overlaps(10, 12, 11, 13));
        assert!(overlaps(10, 13, 11, 12));
    }

    proptest! {
        #[test]
        fn prop_overlap_is_symmetric(a in 0i64..100, la in 1i64..50, b in 0i64..100, lb in 1i64..50) {
            prop_assert_eq!(
                overlaps(a, a + la, b, b + lb),
                overlaps(b, b + lb, a, a + la)
            );
        }

        #[test]
        fn prop_overlap_matches_shared_point(a in 0i64..60, la in 1i64..20, b in 0i64..60, lb in 1i64..20) {
            let shared = (a..a + la).any(|t| (b..b + lb).contains(&t));
            prop_assert_eq!(overlaps(a, a + la, b, b + lb), shared);
        }
    }
}

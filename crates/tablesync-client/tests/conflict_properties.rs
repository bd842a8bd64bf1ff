//! Property tests for the three-tier LWW comparator: it must be a total
//! order over `(millis, micros-if-both-present, id)` regardless of input.

use proptest::prelude::*;
use std::cmp::Ordering;

use tablesync_client::{compare_lww, ServerTimestamp, TimestampedSide};

fn side<'a>(millis: u64, micros: Option<u32>, id: &'a str) -> TimestampedSide<'a> {
    TimestampedSide {
        timestamp: if let Some(m) = micros {
            ServerTimestamp::with_micros(millis, m)
        } else {
            ServerTimestamp::new(millis)
        },
        id,
    }
}

fn reverse(o: Ordering) -> Ordering {
    match o {
        Ordering::Less => Ordering::Greater,
        Ordering::Greater => Ordering::Less,
        Ordering::Equal => Ordering::Equal,
    }
}

proptest! {
    /// Swapping the two sides always yields the reversed ordering.
    #[test]
    fn compare_is_antisymmetric(
        a_millis in any::<u64>(), a_micros in prop::option::of(any::<u32>()), a_id in "[a-z]{1,8}",
        b_millis in any::<u64>(), b_micros in prop::option::of(any::<u32>()), b_id in "[a-z]{1,8}",
    ) {
        let a = side(a_millis, a_micros, &a_id);
        let b = side(b_millis, b_micros, &b_id);
        prop_assert_eq!(compare_lww(a, b), reverse(compare_lww(b, a)));
    }

    /// A side compared with an identical clone is always `Equal`.
    #[test]
    fn compare_is_reflexive(
        millis in any::<u64>(), micros in prop::option::of(any::<u32>()), id in "[a-z]{1,8}",
    ) {
        let a = side(millis, micros, &id);
        let b = side(millis, micros, &id);
        prop_assert_eq!(compare_lww(a, b), Ordering::Equal);
    }

    /// A strictly later millis value always wins regardless of micros or id.
    #[test]
    fn later_millis_always_wins(
        lo in 0u64..1_000_000, delta in 1u64..1_000_000,
        a_micros in prop::option::of(any::<u32>()), a_id in "[a-z]{1,8}",
        b_micros in prop::option::of(any::<u32>()), b_id in "[a-z]{1,8}",
    ) {
        let earlier = side(lo, a_micros, &a_id);
        let later = side(lo + delta, b_micros, &b_id);
        prop_assert_eq!(compare_lww(earlier, later), Ordering::Less);
        prop_assert_eq!(compare_lww(later, earlier), Ordering::Greater);
    }

    /// When millis tie and at least one side lacks micros, the id is the
    /// sole tiebreak -- micros never silently resolves the tie as `Equal`.
    #[test]
    fn missing_micros_falls_through_to_id(
        millis in any::<u64>(), micros in any::<u32>(), a_id in "[a-z]{1,8}", b_id in "[a-z]{1,8}",
    ) {
        prop_assume!(a_id != b_id);
        let a = side(millis, Some(micros), &a_id);
        let b = side(millis, None, &b_id);
        prop_assert_eq!(compare_lww(a, b), a_id.cmp(&b_id));
    }
}

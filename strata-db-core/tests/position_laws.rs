//! Property tests for the position algebra: total-order laws and the
//! query/table reversal bijection.

use proptest::prelude::*;
use std::cmp::Ordering;
use strata_db_core::{BoundWeight, DomainCmp, Position};

fn arb_position() -> impl Strategy<Value = Position> {
    prop_oneof![
        Just(Position::before_all_rows()),
        Just(Position::after_all_rows()),
        (proptest::collection::vec(any::<u8>(), 0..4), 0..3u8).prop_map(|(key, w)| {
            let weight = match w {
                0 => BoundWeight::Before,
                1 => BoundWeight::At,
                _ => BoundWeight::After,
            };
            Position::Key {
                key: key.as_slice().into(),
                weight,
            }
        }),
    ]
}

proptest! {
    #[test]
    fn reversal_is_an_involution(p in arb_position()) {
        prop_assert_eq!(p.reversed().reversed(), p);
    }

    #[test]
    fn table_order_is_total_and_antisymmetric(a in arb_position(), b in arb_position()) {
        match a.cmp(&b) {
            Ordering::Less => prop_assert_eq!(b.cmp(&a), Ordering::Greater),
            Ordering::Greater => prop_assert_eq!(b.cmp(&a), Ordering::Less),
            Ordering::Equal => prop_assert_eq!(&a, &b),
        }
    }

    #[test]
    fn table_order_is_transitive(a in arb_position(), b in arb_position(), c in arb_position()) {
        let mut v = [a, b, c];
        v.sort();
        prop_assert!(v[0] <= v[1] && v[1] <= v[2] && v[0] <= v[2]);
    }

    #[test]
    fn reversed_query_order_mirrors_table_order(a in arb_position(), b in arb_position()) {
        let cmp = DomainCmp::new(true);
        prop_assert_eq!(cmp.cmp(&a, &b), b.reversed().cmp(&a.reversed()));
    }

    #[test]
    fn forward_query_order_is_table_order(a in arb_position(), b in arb_position()) {
        let cmp = DomainCmp::new(false);
        prop_assert_eq!(cmp.cmp(&a, &b), a.cmp(&b));
    }

    #[test]
    fn to_table_roundtrips(p in arb_position(), reversed in any::<bool>()) {
        let cmp = DomainCmp::new(reversed);
        prop_assert_eq!(cmp.to_table(&cmp.to_table(&p)), p);
    }

    #[test]
    fn before_floors_rows_and_fixes_bounds(p in arb_position()) {
        if p.is_clustering_row() {
            prop_assert!(!p.before().is_clustering_row());
            prop_assert!(p.before() < p);
        } else {
            prop_assert_eq!(p.before(), p);
        }
    }
}

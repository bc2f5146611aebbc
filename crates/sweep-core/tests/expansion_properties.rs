use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use sweep_core::{expand, ParameterVector, Scalar, ScalarType, Schema, SlotDef, VaryingSlot};

const SLOTS: [&str; 4] = ["p1", "p2", "p3", "p4"];

fn base() -> ParameterVector {
    let mut defs = vec![SlotDef::new("name", ScalarType::Str, "exp")];
    defs.extend(SLOTS.iter().map(|s| SlotDef::new(s, ScalarType::Int, 0)));
    ParameterVector::from_defaults(Arc::new(Schema::new(defs).expect("schema")), "exp")
}

fn list(offset: i64, n: usize, cov: u32) -> VaryingSlot {
    VaryingSlot::list((0..n as i64).map(|i| Scalar::Int(offset + i)).collect(), cov)
}

proptest! {
    #[test]
    fn independent_slots_multiply_cardinalities(counts in prop::collection::vec(1usize..5, 1..=4)) {
        let mut slots = BTreeMap::new();
        for (slot, n) in SLOTS.iter().zip(&counts) {
            slots.insert(slot.to_string(), list(0, *n, 0));
        }
        let plan = expand(&base(), &slots).expect("expand");
        prop_assert_eq!(plan.len(), counts.iter().product::<usize>());
    }

    #[test]
    fn covariation_group_contributes_n_combinations(members in 2usize..=4, n in 1usize..6) {
        let mut slots = BTreeMap::new();
        for (m, slot) in SLOTS.iter().take(members).enumerate() {
            slots.insert(slot.to_string(), list(100 * m as i64, n, 7));
        }
        let plan = expand(&base(), &slots).expect("expand");
        prop_assert_eq!(plan.len(), n);
        for run in &plan.runs {
            let first = run.vector.get(SLOTS[0]).expect("p1").as_f64().expect("num") as i64;
            for (m, slot) in SLOTS.iter().take(members).enumerate() {
                let v = run.vector.get(slot).expect("member").as_f64().expect("num") as i64;
                prop_assert_eq!(v - 100 * m as i64, first);
            }
        }
    }

    #[test]
    fn derived_names_are_unique(a in 1usize..40, b in 1usize..4, c in 1usize..3) {
        let mut slots = BTreeMap::new();
        slots.insert("p1".to_string(), list(0, a, 0));
        slots.insert("p2".to_string(), list(0, b, 3));
        slots.insert("p4".to_string(), list(0, b, 3));
        slots.insert("p3".to_string(), list(0, c, 0));
        let plan = expand(&base(), &slots).expect("expand");
        let names: HashSet<&str> = plan.names().into_iter().collect();
        prop_assert_eq!(names.len(), plan.len());
        prop_assert_eq!(plan.len(), a * b * c);
    }
}

use proptest::prelude::*;
use vesta_ir::IterKind;

use crate::structure::TilingStructure;

fn structure_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(prop_oneof![Just('S'), Just('R')], 1..=10)
        .prop_filter("needs a spatial level", |levels| levels.contains(&'S'))
        .prop_map(|levels| levels.into_iter().collect())
}

proptest! {
    #[test]
    fn compact_structure_round_trips(text in structure_text()) {
        let structure: TilingStructure = text.parse().unwrap();
        prop_assert_eq!(structure.len(), text.len());
        prop_assert_eq!(structure.to_string(), text.clone());
        prop_assert_eq!(structure.count(IterKind::Spatial), text.matches('S').count());
    }

    #[test]
    fn long_form_matches_compact(text in structure_text()) {
        let long = text
            .chars()
            .map(|c| if c == 'S' { "space" } else { "reduce" })
            .collect::<Vec<_>>()
            .join(",");
        let compact: TilingStructure = text.parse().unwrap();
        let spelled: TilingStructure = long.parse().unwrap();
        prop_assert_eq!(compact, spelled);
    }
}

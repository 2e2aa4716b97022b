use proptest::prelude::*;

use super::generators;
use crate::{ShapeIndex, ShapeTree};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn preorder_is_sorted(shape in generators::shape()) {
        let tree: ShapeTree<()> = ShapeTree::new(&shape);
        let indices: Vec<&ShapeIndex> = tree.iter().map(|(index, _)| index).collect();
        prop_assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn every_position_is_addressable(shape in generators::shape()) {
        let tree = ShapeTree::from_fn(&shape, |_, subshape| subshape.clone());
        for (index, subshape) in tree.iter() {
            prop_assert_eq!(shape.subshape(index).unwrap(), subshape);
            prop_assert_eq!(tree.element(index).unwrap(), subshape);
        }
    }

    #[test]
    fn leaves_match_leaf_count(shape in generators::shape()) {
        let tree: ShapeTree<u8> = ShapeTree::new(&shape);
        prop_assert_eq!(tree.leaves().count(), shape.leaf_count());
        prop_assert!(tree.leaves().all(|(index, _)| !shape.subshape(index).unwrap().is_tuple()));
    }
}

use crate::{PrimitiveType, Shape, ShapeIndex, ShapeTree};

fn nested() -> Shape {
    Shape::tuple([
        Shape::scalar(PrimitiveType::F32),
        Shape::tuple([Shape::array(PrimitiveType::S8, &[3]), Shape::scalar(PrimitiveType::U32)]),
    ])
}

#[test]
fn test_preorder() {
    let tree: ShapeTree<()> = ShapeTree::new(&nested());
    let indices: Vec<ShapeIndex> = tree.iter().map(|(index, _)| index.clone()).collect();
    assert_eq!(
        indices,
        vec![
            ShapeIndex::root(),
            ShapeIndex::from([0]),
            ShapeIndex::from([1]),
            ShapeIndex::from([1, 0]),
            ShapeIndex::from([1, 1]),
        ]
    );
}

#[test]
fn test_leaves() {
    let tree = ShapeTree::from_fn(&nested(), |_, shape| shape.byte_size());
    let leaves: Vec<(ShapeIndex, usize)> = tree.leaves().map(|(i, v)| (i.clone(), *v)).collect();
    assert_eq!(leaves, vec![(ShapeIndex::from([0]), 4), (ShapeIndex::from([1, 0]), 3), (ShapeIndex::from([1, 1]), 4)]);
}

#[test]
fn test_element_mut_and_replace() {
    let mut tree: ShapeTree<u32> = ShapeTree::new(&nested());
    *tree.element_mut(&ShapeIndex::from([1, 0])).unwrap() = 7;
    assert_eq!(*tree.element(&ShapeIndex::from([1, 0])).unwrap(), 7);
    assert_eq!(tree.replace(&ShapeIndex::from([1, 0]), 9).unwrap(), 7);
    assert_eq!(*tree.element(&ShapeIndex::from([1, 0])).unwrap(), 9);
}

#[test]
fn test_missing_index() {
    let tree: ShapeTree<u32> = ShapeTree::new(&nested());
    assert!(tree.element(&ShapeIndex::from([2])).is_err());
    assert!(tree.element(&ShapeIndex::from([0, 0])).is_err());
}

#[test]
fn test_deeply_nested_tuple() {
    let mut shape = Shape::scalar(PrimitiveType::F32);
    for _ in 0..1_000 {
        shape = Shape::Tuple(vec![shape]);
    }
    let tree: ShapeTree<u8> = ShapeTree::new(&shape);
    assert_eq!(tree.len(), 1_001);
    assert_eq!(tree.leaves().count(), 1);
    let (deepest, _) = tree.leaves().next().unwrap();
    assert_eq!(deepest.len(), 1_000);
}

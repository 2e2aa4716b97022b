use test_case::test_case;

use crate::{PrimitiveType, Shape, ShapeIndex};

#[test_case(PrimitiveType::Pred, 1; "pred")]
#[test_case(PrimitiveType::Bf16, 2; "bf16")]
#[test_case(PrimitiveType::F32, 4; "f32")]
#[test_case(PrimitiveType::S64, 8; "s64")]
#[test_case(PrimitiveType::C128, 16; "c128")]
#[test_case(PrimitiveType::Token, 0; "token")]
fn test_primitive_bytes(ty: PrimitiveType, bytes: usize) {
    assert_eq!(ty.bytes(), bytes);
}

#[test]
fn test_array_byte_size() {
    let shape = Shape::array(PrimitiveType::F32, &[2, 3]);
    assert_eq!(shape.element_count(), 6);
    assert_eq!(shape.byte_size(), 24);
    assert_eq!(shape.to_string(), "f32[2,3]");
}

#[test]
fn test_scalar() {
    let shape = Shape::scalar(PrimitiveType::S32);
    assert_eq!(shape.element_count(), 1);
    assert_eq!(shape.byte_size(), 4);
    assert_eq!(shape.to_string(), "s32[]");
}

#[test]
fn test_tuple_byte_size_is_pointer_table() {
    let shape = Shape::tuple([Shape::array(PrimitiveType::F32, &[128]), Shape::scalar(PrimitiveType::Pred)]);
    assert_eq!(shape.byte_size(), 16);
    assert_eq!(shape.to_string(), "(f32[128], pred[])");
}

#[test]
fn test_subshape() {
    let inner = Shape::tuple([Shape::scalar(PrimitiveType::F16), Shape::array(PrimitiveType::U8, &[4])]);
    let shape = Shape::tuple([Shape::scalar(PrimitiveType::F32), inner.clone()]);

    assert_eq!(shape.subshape(&ShapeIndex::root()).unwrap(), &shape);
    assert_eq!(shape.subshape(&ShapeIndex::from([1])).unwrap(), &inner);
    assert_eq!(shape.subshape(&ShapeIndex::from([1, 1])).unwrap(), &Shape::array(PrimitiveType::U8, &[4]));
    assert!(shape.subshape(&ShapeIndex::from([2])).is_err());
    assert!(shape.subshape(&ShapeIndex::from([0, 0])).is_err());
}

#[test]
fn test_leaf_count() {
    let shape = Shape::tuple([
        Shape::scalar(PrimitiveType::F32),
        Shape::tuple([Shape::scalar(PrimitiveType::F32), Shape::scalar(PrimitiveType::F32)]),
        Shape::tuple([]),
    ]);
    assert_eq!(shape.leaf_count(), 3);
}

#[test]
fn test_shape_index_display() {
    assert_eq!(ShapeIndex::root().to_string(), "{}");
    assert_eq!(ShapeIndex::from([0, 2]).to_string(), "{0,2}");
}

#[test]
fn test_primitive_type_parse() {
    assert_eq!("bf16".parse::<PrimitiveType>().unwrap(), PrimitiveType::Bf16);
    assert_eq!(PrimitiveType::S32.to_string(), "s32");
}

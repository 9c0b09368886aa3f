//! Meta-format: the shape/type carrier verification threads through a graph before
//! any data object is touched.

use crate::object::{DataObject, ObjectKind, ObjectShape};

/// A kernel parameter's inferred shape/type, produced by the output-validator or
/// whole-node-validator path during verification and compared against whatever is
/// actually bound.
#[derive(Debug, Clone)]
pub struct MetaFormat {
    pub kind: ObjectKind,
    pub shape: Option<ObjectShape>,
}

impl MetaFormat {
    pub fn new(kind: ObjectKind) -> Self {
        Self { kind, shape: None }
    }

    pub fn set_shape(&mut self, shape: ObjectShape) {
        debug_assert_eq!(shape.kind(), self.kind, "meta shape kind must match parameter kind");
        self.shape = Some(shape);
    }

    /// Seeds this meta-format from an already-bound, fully-specified data object —
    /// used when a kernel's validator defers to an input's own shape (e.g. an
    /// elementwise kernel whose output meta is simply "same as input 0").
    pub fn set_from_reference(&mut self, obj: &DataObject) {
        self.shape = Some(obj.shape.read().unwrap().clone());
    }

    pub fn is_set(&self) -> bool {
        self.shape.is_some()
    }
}

/// Structural equality of two meta-formats: same kind and, once both are set, equal
/// shapes. Two unset metas of the same kind are considered equal (neither has
/// committed to a shape yet).
pub fn meta_equal(a: &MetaFormat, b: &MetaFormat) -> bool {
    a.kind == b.kind && a.shape == b.shape
}

/// A pipelined graph parameter requires every reference queued for it across calls to
/// be meta-equal to the one currently bound. Compares a candidate replacement
/// reference's shape against the graph parameter's existing binding.
pub fn meta_equal_refs(expected: &ObjectShape, candidate: &DataObject) -> bool {
    expected.kind() == candidate.kind() && *expected == *candidate.shape.read().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ScalarType;

    #[test]
    fn unset_metas_of_same_kind_are_equal() {
        let a = MetaFormat::new(ObjectKind::Scalar);
        let b = MetaFormat::new(ObjectKind::Scalar);
        assert!(meta_equal(&a, &b));
    }

    #[test]
    fn set_metas_compare_by_shape() {
        let mut a = MetaFormat::new(ObjectKind::Scalar);
        let mut b = MetaFormat::new(ObjectKind::Scalar);
        a.set_shape(ObjectShape::Scalar { data_type: ScalarType::Int32 });
        b.set_shape(ObjectShape::Scalar { data_type: ScalarType::Float32 });
        assert!(!meta_equal(&a, &b));
    }
}

//! Tree classes: the fixed set of element shapes a coarse tree can have.

use serde::{Deserialize, Serialize};

/// Topological class of a coarse tree.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum TreeClass {
    /// 0D point.
    Vertex,
    /// 1D segment.
    Line,
    /// 2D tensor-product cell.
    Quad,
    /// 2D simplex.
    Triangle,
    /// 3D tensor-product cell.
    Hex,
    /// 3D simplex.
    Tet,
    /// 3D wedge.
    Prism,
    /// 3D pyramid.
    Pyramid,
}

impl TreeClass {
    /// Every class, in wire-code order.
    pub const ALL: [TreeClass; 8] = [
        TreeClass::Vertex,
        TreeClass::Line,
        TreeClass::Quad,
        TreeClass::Triangle,
        TreeClass::Hex,
        TreeClass::Tet,
        TreeClass::Prism,
        TreeClass::Pyramid,
    ];

    /// Topological dimension.
    pub const fn dimension(self) -> u8 {
        match self {
            TreeClass::Vertex => 0,
            TreeClass::Line => 1,
            TreeClass::Quad | TreeClass::Triangle => 2,
            TreeClass::Hex | TreeClass::Tet | TreeClass::Prism | TreeClass::Pyramid => 3,
        }
    }

    /// Number of corner vertices.
    pub const fn num_vertices(self) -> usize {
        match self {
            TreeClass::Vertex => 1,
            TreeClass::Line => 2,
            TreeClass::Quad => 4,
            TreeClass::Triangle => 3,
            TreeClass::Hex => 8,
            TreeClass::Tet => 4,
            TreeClass::Prism => 6,
            TreeClass::Pyramid => 5,
        }
    }

    /// Number of faces (codimension-1 boundary pieces).
    pub const fn num_faces(self) -> u8 {
        match self {
            TreeClass::Vertex => 0,
            TreeClass::Line => 2,
            TreeClass::Quad => 4,
            TreeClass::Triangle => 3,
            TreeClass::Hex => 6,
            TreeClass::Tet => 4,
            TreeClass::Prism => 5,
            TreeClass::Pyramid => 5,
        }
    }

    /// Class of face `face`, or `None` if the face does not exist.
    ///
    /// Prism faces 0..=2 are quads and 3, 4 triangles; pyramid faces 0..=3
    /// are triangles and face 4 is the quad base.
    pub const fn face_class(self, face: u8) -> Option<TreeClass> {
        if face >= self.num_faces() {
            return None;
        }
        Some(match self {
            TreeClass::Vertex => return None,
            TreeClass::Line => TreeClass::Vertex,
            TreeClass::Quad | TreeClass::Triangle => TreeClass::Line,
            TreeClass::Hex => TreeClass::Quad,
            TreeClass::Tet => TreeClass::Triangle,
            TreeClass::Prism => {
                if face < 3 {
                    TreeClass::Quad
                } else {
                    TreeClass::Triangle
                }
            }
            TreeClass::Pyramid => {
                if face < 4 {
                    TreeClass::Triangle
                } else {
                    TreeClass::Quad
                }
            }
        })
    }

    /// Stable one-byte code used on the wire.
    pub const fn to_code(self) -> u8 {
        match self {
            TreeClass::Vertex => 0,
            TreeClass::Line => 1,
            TreeClass::Quad => 2,
            TreeClass::Triangle => 3,
            TreeClass::Hex => 4,
            TreeClass::Tet => 5,
            TreeClass::Prism => 6,
            TreeClass::Pyramid => 7,
        }
    }

    /// Inverse of [`to_code`](Self::to_code).
    pub fn from_code(code: u8) -> Option<TreeClass> {
        Self::ALL.get(code as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for class in TreeClass::ALL {
            assert_eq!(TreeClass::from_code(class.to_code()), Some(class));
        }
        assert_eq!(TreeClass::from_code(8), None);
        assert_eq!(TreeClass::from_code(0xFF), None);
    }

    #[test]
    fn faces_are_one_dimension_lower() {
        for class in TreeClass::ALL {
            for f in 0..class.num_faces() {
                let fc = class.face_class(f).unwrap();
                assert_eq!(fc.dimension() + 1, class.dimension(), "{class:?} face {f}");
            }
            assert_eq!(class.face_class(class.num_faces()), None);
        }
    }

    #[test]
    fn mixed_face_shapes() {
        assert_eq!(TreeClass::Prism.face_class(2), Some(TreeClass::Quad));
        assert_eq!(TreeClass::Prism.face_class(3), Some(TreeClass::Triangle));
        assert_eq!(TreeClass::Pyramid.face_class(3), Some(TreeClass::Triangle));
        assert_eq!(TreeClass::Pyramid.face_class(4), Some(TreeClass::Quad));
    }

    #[test]
    fn json_roundtrip() {
        let s = serde_json::to_string(&TreeClass::Hex).unwrap();
        let c: TreeClass = serde_json::from_str(&s).unwrap();
        assert_eq!(c, TreeClass::Hex);
    }
}

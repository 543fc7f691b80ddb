//! Face-join orientations.
//!
//! An orientation records how the corner numbering of one face lines up with
//! the corner numbering of the face it is joined to. It is an element of the
//! rotation group C_N of the face shape, `N` being the face's corner count,
//! so composing is addition mod `N` and the reverse half of a join carries
//! the inverse rotation.

use crate::topology::eclass::TreeClass;
use core::fmt::{Debug, Formatter};
use serde::{Deserialize, Serialize};

/// Rotation of a face's corner numbering; stored as `u8` mod N.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FaceOrientation(pub u8);

impl Debug for FaceOrientation {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("FaceOrientation").field(&self.0).finish()
    }
}

/// Size of the rotation group acting on a face of class `face_class`.
#[inline]
pub const fn group_order(face_class: TreeClass) -> u8 {
    match face_class {
        TreeClass::Vertex => 1,
        TreeClass::Line => 2,
        TreeClass::Triangle => 3,
        TreeClass::Quad => 4,
        // 3D faces do not occur.
        _ => 1,
    }
}

impl FaceOrientation {
    /// The identity (corner 0 meets corner 0).
    pub const IDENTITY: FaceOrientation = FaceOrientation(0);

    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// True if this orientation is a valid element for a face of `face_class`.
    #[inline]
    pub const fn is_valid_for(self, face_class: TreeClass) -> bool {
        self.0 < group_order(face_class)
    }

    /// Inverse rotation on a face of `face_class`.
    #[inline]
    pub const fn inverse(self, face_class: TreeClass) -> Self {
        let n = group_order(face_class);
        FaceOrientation((n - (self.0 % n)) % n)
    }

    /// Apply `self` after `other`.
    #[inline]
    pub const fn compose(self, other: Self, face_class: TreeClass) -> Self {
        let n = group_order(face_class);
        FaceOrientation((self.0 % n + other.0 % n) % n)
    }
}

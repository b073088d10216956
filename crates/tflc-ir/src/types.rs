//! Element types and static tensor shapes.

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// The kind of a scalar type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// Floating point.
    Float,
}

/// A scalar element type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl Scalar {
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };
    pub const I8: Self = Self {
        kind: ScalarKind::Sint,
        width: 1,
    };
    pub const U8: Self = Self {
        kind: ScalarKind::Uint,
        width: 1,
    };
    pub const I16: Self = Self {
        kind: ScalarKind::Sint,
        width: 2,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const I64: Self = Self {
        kind: ScalarKind::Sint,
        width: 8,
    };
    pub const F16: Self = Self {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };

    /// Returns `true` for floating-point element types.
    pub fn is_float(self) -> bool {
        self.kind == ScalarKind::Float
    }
}

/// A fully static tensor shape.
///
/// The lowering stage runs after shapes have been traced, so every
/// dimension is a concrete, non-negative size.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct TensorShape {
    pub dims: Vec<usize>,
}

impl TensorShape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self { dims: dims.into() }
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (1 for a scalar), saturating at
    /// `usize::MAX`.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().fold(1, |n, &d| n.saturating_mul(d))
    }

    /// Size of `axis`, if it exists.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    /// Shape after applying `perm`: output axis `i` takes input axis `perm[i]`.
    ///
    /// Returns `None` if `perm` is not a permutation of `0..rank`.
    pub fn permuted(&self, perm: &[usize]) -> Option<Self> {
        if !is_permutation(perm, self.rank()) {
            return None;
        }
        Some(Self {
            dims: perm.iter().map(|&p| self.dims[p]).collect(),
        })
    }

    /// Shape with a unit axis inserted before `axis`.
    pub fn with_axis_inserted(&self, axis: usize) -> Self {
        let mut dims = self.dims.clone();
        dims.insert(axis.min(dims.len()), 1);
        Self { dims }
    }

    /// Shape dims as `i32`, the element type TFLite uses for shape operands.
    ///
    /// Returns `None` if a dimension does not fit.
    pub fn to_i32(&self) -> Option<Vec<i32>> {
        self.dims.iter().map(|&d| i32::try_from(d).ok()).collect()
    }
}

impl From<&[usize]> for TensorShape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for TensorShape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(dims)
    }
}

/// Returns `true` if `perm` contains each of `0..rank` exactly once.
pub fn is_permutation(perm: &[usize], rank: usize) -> bool {
    if perm.len() != rank {
        return false;
    }
    let mut seen = vec![false; rank];
    for &p in perm {
        if p >= rank || seen[p] {
            return false;
        }
        seen[p] = true;
    }
    true
}

/// Inverse of a permutation: `inverse[perm[i]] == i`.
pub fn inverse_permutation(perm: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inverse[p] = i;
    }
    inverse
}

//! Tensors, constant buffers, and quantization parameters.

use ndarray::{Array1, ArrayD, IxDyn};

use crate::types::{Scalar, TensorShape};

/// Affine quantization parameters, per-tensor or per-axis.
///
/// `real = scale * (quantized - zero_point)`. When `axis` is set there is
/// one scale/zero-point pair per slice along that axis.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantizationParams {
    pub scales: Vec<f32>,
    pub zero_points: Vec<i64>,
    pub axis: Option<usize>,
}

impl QuantizationParams {
    pub fn per_tensor(scale: f32, zero_point: i64) -> Self {
        Self {
            scales: vec![scale],
            zero_points: vec![zero_point],
            axis: None,
        }
    }

    pub fn per_axis(scales: Vec<f32>, zero_points: Vec<i64>, axis: usize) -> Self {
        Self {
            scales,
            zero_points,
            axis: Some(axis),
        }
    }

    pub fn is_per_axis(&self) -> bool {
        self.axis.is_some()
    }

    /// Parameters for the same data after a transpose by `perm`.
    ///
    /// The quantized axis moves to wherever `perm` places it.
    pub fn permuted(&self, perm: &[usize]) -> Self {
        let axis = self
            .axis
            .map(|a| perm.iter().position(|&p| p == a).unwrap_or(a));
        Self {
            axis,
            ..self.clone()
        }
    }

    /// Parameters for the same data after a unit axis is inserted at `axis`.
    pub fn with_axis_inserted(&self, axis: usize) -> Self {
        let shifted = self.axis.map(|a| if a >= axis { a + 1 } else { a });
        Self {
            axis: shifted,
            ..self.clone()
        }
    }
}

/// A constant tensor buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    F32(ArrayD<f32>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    I8(ArrayD<i8>),
    U8(ArrayD<u8>),
}

macro_rules! each_array {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            TensorData::F32($arr) => $body,
            TensorData::I32($arr) => $body,
            TensorData::I64($arr) => $body,
            TensorData::I8($arr) => $body,
            TensorData::U8($arr) => $body,
        }
    };
}

macro_rules! map_array {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            TensorData::F32($arr) => TensorData::F32($body),
            TensorData::I32($arr) => TensorData::I32($body),
            TensorData::I64($arr) => TensorData::I64($body),
            TensorData::I8($arr) => TensorData::I8($body),
            TensorData::U8($arr) => TensorData::U8($body),
        }
    };
}

impl TensorData {
    /// A rank-1 `i32` buffer, the form TFLite uses for perm/shape/begin/size operands.
    pub fn i32_vector(values: Vec<i32>) -> Self {
        Self::I32(Array1::from_vec(values).into_dyn())
    }

    /// A rank-1 `f32` buffer.
    pub fn f32_vector(values: Vec<f32>) -> Self {
        Self::F32(Array1::from_vec(values).into_dyn())
    }

    /// Element type of the buffer.
    pub fn scalar(&self) -> Scalar {
        match self {
            Self::F32(_) => Scalar::F32,
            Self::I32(_) => Scalar::I32,
            Self::I64(_) => Scalar::I64,
            Self::I8(_) => Scalar::I8,
            Self::U8(_) => Scalar::U8,
        }
    }

    pub fn shape(&self) -> TensorShape {
        each_array!(self, a => TensorShape::new(a.shape()))
    }

    pub fn len(&self) -> usize {
        each_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Self::F32(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&ArrayD<i32>> {
        match self {
            Self::I32(a) => Some(a),
            _ => None,
        }
    }

    /// The same elements, in row-major order, under a new shape.
    ///
    /// Returns `None` if the element counts differ.
    pub fn reshaped(&self, shape: &TensorShape) -> Option<Self> {
        if shape.num_elements() != self.len() {
            return None;
        }
        let dims = IxDyn(&shape.dims);
        Some(map_array!(self, a => {
            ArrayD::from_shape_vec(dims.clone(), a.iter().copied().collect()).ok()?
        }))
    }

    /// A rank-1 buffer of `len` copies of the first element.
    pub fn repeat_first(&self, len: usize) -> Option<Self> {
        Some(map_array!(self, a => {
            let first = *a.iter().next()?;
            ArrayD::from_elem(IxDyn(&[len]), first)
        }))
    }
}

/// Metadata-only description of a tensor value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorDesc {
    pub scalar: Scalar,
    pub shape: TensorShape,
}

impl TensorDesc {
    pub fn new(scalar: Scalar, shape: impl Into<TensorShape>) -> Self {
        Self {
            scalar,
            shape: shape.into(),
        }
    }
}

/// A named, typed, shaped value in the graph.
///
/// A tensor with `data` is a constant; without it the value is computed at
/// inference time.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub name: String,
    pub scalar: Scalar,
    pub shape: TensorShape,
    pub data: Option<TensorData>,
    pub quantization: Option<QuantizationParams>,
}

impl Tensor {
    /// A constant tensor whose type and shape come from `data`.
    pub fn constant(name: impl Into<String>, data: TensorData) -> Self {
        Self {
            name: name.into(),
            scalar: data.scalar(),
            shape: data.shape(),
            data: Some(data),
            quantization: None,
        }
    }

    /// A bufferless tensor.
    pub fn variable(name: impl Into<String>, desc: TensorDesc) -> Self {
        Self {
            name: name.into(),
            scalar: desc.scalar,
            shape: desc.shape,
            data: None,
            quantization: None,
        }
    }

    pub fn with_quantization(mut self, quantization: Option<QuantizationParams>) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn desc(&self) -> TensorDesc {
        TensorDesc {
            scalar: self.scalar,
            shape: self.shape.clone(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn is_constant(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_quantized(&self) -> bool {
        self.quantization.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_takes_type_and_shape_from_data() {
        let t = Tensor::constant("perm", TensorData::i32_vector(vec![0, 2, 3, 1]));
        assert_eq!(t.scalar, Scalar::I32);
        assert_eq!(t.shape.dims, vec![4]);
        assert!(t.is_constant());
        assert!(!t.is_quantized());
    }

    #[test]
    fn reshape_keeps_row_major_order() {
        let data = TensorData::F32(
            ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        );
        let lifted = data.reshaped(&TensorShape::from([2, 1, 3])).unwrap();
        assert_eq!(lifted.shape().dims, vec![2, 1, 3]);
        let values: Vec<f32> = lifted.as_f32().unwrap().iter().copied().collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        assert!(data.reshaped(&TensorShape::from([4])).is_none());
    }

    #[test]
    fn repeat_first_element() {
        let data = TensorData::f32_vector(vec![0.25]);
        let wide = data.repeat_first(5).unwrap();
        assert_eq!(wide, TensorData::f32_vector(vec![0.25; 5]));
        assert!(TensorData::i32_vector(vec![]).repeat_first(3).is_none());
    }

    #[test]
    fn per_axis_quantization_follows_permutation() {
        let q = QuantizationParams::per_axis(vec![0.1, 0.2], vec![0, 0], 0);
        // (O, I, H, W) -> (O, H, W, I): axis 0 stays.
        assert_eq!(q.permuted(&[0, 2, 3, 1]).axis, Some(0));
        // (O, 1, H, W) -> (1, H, W, O): axis 0 moves to 3.
        assert_eq!(q.permuted(&[1, 2, 3, 0]).axis, Some(3));
    }

    #[test]
    fn per_axis_quantization_follows_inserted_axis() {
        let q = QuantizationParams::per_axis(vec![0.1], vec![0], 2);
        assert_eq!(q.with_axis_inserted(2).axis, Some(3));
        assert_eq!(q.with_axis_inserted(3).axis, Some(2));

        let per_tensor = QuantizationParams::per_tensor(0.5, 128);
        assert_eq!(per_tensor.permuted(&[1, 0]), per_tensor);
    }
}

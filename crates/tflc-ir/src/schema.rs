//! TFLite schema constants.
//!
//! Builtin operator codes for the primitives the lowering stage emits,
//! matching the `BuiltinOperator` enum of the TFLite FlatBuffer schema.

/// TFLite `BuiltinOperator` enum values.
pub mod builtin_op {
    pub const ADD: i32 = 0;
    pub const CONV_2D: i32 = 3;
    pub const DEPTHWISE_CONV_2D: i32 = 4;
    pub const DEQUANTIZE: i32 = 6;
    pub const MUL: i32 = 18;
    pub const RESHAPE: i32 = 22;
    pub const PAD: i32 = 34;
    pub const TRANSPOSE: i32 = 39;
    pub const SLICE: i32 = 65;
    pub const TRANSPOSE_CONV: i32 = 67;
    pub const QUANTIZE: i32 = 114;
}

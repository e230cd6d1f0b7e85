use bytemuck::Pod;

/// Element type of a [`crate::Tensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
	F32,
	F64,
	I32,
	I64,
	U8,
	U16,
}

impl Dtype {
	/// Size of one element in bytes.
	pub fn size(&self) -> usize {
		match self {
			Dtype::F32 | Dtype::I32 => 4,
			Dtype::F64 | Dtype::I64 => 8,
			Dtype::U8 => 1,
			Dtype::U16 => 2,
		}
	}
}

/// Primitive types that can back a tensor.
pub trait Element: Pod {
	const DTYPE: Dtype;
}

impl Element for f32 {
	const DTYPE: Dtype = Dtype::F32;
}

impl Element for f64 {
	const DTYPE: Dtype = Dtype::F64;
}

impl Element for i32 {
	const DTYPE: Dtype = Dtype::I32;
}

impl Element for i64 {
	const DTYPE: Dtype = Dtype::I64;
}

impl Element for u8 {
	const DTYPE: Dtype = Dtype::U8;
}

impl Element for u16 {
	const DTYPE: Dtype = Dtype::U16;
}

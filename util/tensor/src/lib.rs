pub mod dtype;

pub use dtype::{Dtype, Element};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TensorError {
	#[error("dtype mismatch: expected {expected:?}, got {got:?}")]
	DtypeMismatch { expected: Dtype, got: Dtype },
	#[error("shape {shape:?} holds {expected} elements, got {got}")]
	LengthMismatch { shape: Vec<usize>, expected: usize, got: usize },
	#[error("expected a scalar tensor, got shape {shape:?}")]
	NotScalar { shape: Vec<usize> },
}

/// Typed storage, one variant per [`Dtype`].
///
/// Keeping the buffer in its real type (rather than raw bytes) means the
/// allocation always carries the element alignment, so byte views can be
/// re-cast to element views without further checks.
#[derive(Debug, Clone)]
enum Storage {
	F32(Vec<f32>),
	F64(Vec<f64>),
	I32(Vec<i32>),
	I64(Vec<i64>),
	U8(Vec<u8>),
	U16(Vec<u16>),
}

// per-variant dispatch: the arms look alike but bind different vector types
#[allow(clippy::match_same_arms)]
impl Storage {
	fn zeros(dtype: Dtype, len: usize) -> Self {
		match dtype {
			Dtype::F32 => Storage::F32(vec![0.0; len]),
			Dtype::F64 => Storage::F64(vec![0.0; len]),
			Dtype::I32 => Storage::I32(vec![0; len]),
			Dtype::I64 => Storage::I64(vec![0; len]),
			Dtype::U8 => Storage::U8(vec![0; len]),
			Dtype::U16 => Storage::U16(vec![0; len]),
		}
	}

	fn as_bytes(&self) -> &[u8] {
		match self {
			Storage::F32(v) => bytemuck::cast_slice(v),
			Storage::F64(v) => bytemuck::cast_slice(v),
			Storage::I32(v) => bytemuck::cast_slice(v),
			Storage::I64(v) => bytemuck::cast_slice(v),
			Storage::U8(v) => v,
			Storage::U16(v) => bytemuck::cast_slice(v),
		}
	}

	fn as_bytes_mut(&mut self) -> &mut [u8] {
		match self {
			Storage::F32(v) => bytemuck::cast_slice_mut(v),
			Storage::F64(v) => bytemuck::cast_slice_mut(v),
			Storage::I32(v) => bytemuck::cast_slice_mut(v),
			Storage::I64(v) => bytemuck::cast_slice_mut(v),
			Storage::U8(v) => v,
			Storage::U16(v) => bytemuck::cast_slice_mut(v),
		}
	}

	fn truncate(&mut self, len: usize) {
		match self {
			Storage::F32(v) => v.truncate(len),
			Storage::F64(v) => v.truncate(len),
			Storage::I32(v) => v.truncate(len),
			Storage::I64(v) => v.truncate(len),
			Storage::U8(v) => v.truncate(len),
			Storage::U16(v) => v.truncate(len),
		}
	}

	fn to_f32(&self) -> Vec<f32> {
		match self {
			Storage::F32(v) => v.clone(),
			Storage::F64(v) => v.iter().map(|&x| x as f32).collect(),
			Storage::I32(v) => v.iter().map(|&x| x as f32).collect(),
			Storage::I64(v) => v.iter().map(|&x| x as f32).collect(),
			Storage::U8(v) => v.iter().map(|&x| x as f32).collect(),
			Storage::U16(v) => v.iter().map(|&x| x as f32).collect(),
		}
	}
}

/// A dense row-major n-dimensional buffer with a runtime element type.
///
/// Strides are in elements, innermost axis fastest. A tensor with an empty
/// shape is a 0-dim scalar holding exactly one element.
#[derive(Debug, Clone)]
pub struct Tensor {
	shape: Vec<usize>,
	strides: Vec<usize>,
	dtype: Dtype,
	storage: Storage,
}

fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
	let mut strides = vec![1; shape.len()];
	for i in (0..shape.len().saturating_sub(1)).rev() {
		strides[i] = strides[i + 1] * shape[i + 1];
	}
	strides
}

impl Tensor {
	/// A zero-filled tensor of the given shape and dtype.
	pub fn zeros(shape: &[usize], dtype: Dtype) -> Self {
		let len = shape.iter().product();
		Self {
			shape: shape.to_vec(),
			strides: contiguous_strides(shape),
			dtype,
			storage: Storage::zeros(dtype, len),
		}
	}

	/// A tensor of the given shape filled with `value`.
	pub fn full<T: Element>(shape: &[usize], value: T) -> Self {
		let len = shape.iter().product();
		Self::from_vec(vec![value; len], shape)
			.unwrap_or_else(|_| unreachable!("len is derived from shape"))
	}

	/// Wrap an owned vector as a tensor of the given shape.
	pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self, TensorError> {
		let expected: usize = shape.iter().product();
		if data.len() != expected {
			return Err(TensorError::LengthMismatch {
				shape: shape.to_vec(),
				expected,
				got: data.len(),
			});
		}
		let mut tensor = Self::zeros(shape, T::DTYPE);
		tensor.storage.as_bytes_mut().copy_from_slice(bytemuck::cast_slice(&data));
		Ok(tensor)
	}

	/// A 0-dim scalar tensor.
	pub fn scalar<T: Element>(value: T) -> Self {
		Self::from_vec(vec![value], &[]).unwrap_or_else(|_| unreachable!("scalar shape holds 1"))
	}

	pub fn shape(&self) -> &[usize] {
		&self.shape
	}

	/// Element strides, row-major.
	pub fn strides(&self) -> &[usize] {
		&self.strides
	}

	pub fn ndim(&self) -> usize {
		self.shape.len()
	}

	/// Total element count.
	pub fn len(&self) -> usize {
		self.shape.iter().product()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn dtype(&self) -> Dtype {
		self.dtype
	}

	/// Typed read view over the whole buffer.
	pub fn as_slice<T: Element>(&self) -> Result<&[T], TensorError> {
		if self.dtype != T::DTYPE {
			return Err(TensorError::DtypeMismatch { expected: T::DTYPE, got: self.dtype });
		}
		Ok(bytemuck::cast_slice(self.storage.as_bytes()))
	}

	/// Typed write view over the whole buffer.
	pub fn as_slice_mut<T: Element>(&mut self) -> Result<&mut [T], TensorError> {
		if self.dtype != T::DTYPE {
			return Err(TensorError::DtypeMismatch { expected: T::DTYPE, got: self.dtype });
		}
		Ok(bytemuck::cast_slice_mut(self.storage.as_bytes_mut()))
	}

	/// Read the single element of a 0-dim (or one-element) tensor.
	pub fn item<T: Element>(&self) -> Result<T, TensorError> {
		if self.len() != 1 {
			return Err(TensorError::NotScalar { shape: self.shape.clone() });
		}
		Ok(self.as_slice::<T>()?[0])
	}

	/// Numeric cast to a fresh F32 tensor of the same shape.
	pub fn cast_f32(&self) -> Self {
		Self {
			shape: self.shape.clone(),
			strides: self.strides.clone(),
			dtype: Dtype::F32,
			storage: Storage::F32(self.storage.to_f32()),
		}
	}

	/// Shrink the outermost dimension to `rows`, dropping the tail in place.
	///
	/// Output buffers are allocated at capacity and cut back to the realized
	/// row count once the producing kernel has finished.
	pub fn sliced_rows(mut self, rows: usize) -> Self {
		assert!(!self.shape.is_empty(), "sliced_rows needs at least one dimension");
		assert!(rows <= self.shape[0], "cannot grow a tensor by slicing");
		self.storage.truncate(rows * self.strides[0]);
		self.shape[0] = rows;
		self
	}
}

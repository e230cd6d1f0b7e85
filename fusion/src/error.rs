use tensor::{Dtype, Tensor};
use thiserror::Error;

/// Contract violations surfaced before a kernel touches any buffer.
#[derive(Debug, Error)]
pub enum KernelError {
	#[error("{op}: `{arg}` expects dtype {expected:?}, got {got:?}")]
	Dtype { op: &'static str, arg: &'static str, expected: Dtype, got: Dtype },
	#[error("{op}: `{arg}` expects {expected}, got shape {got:?}")]
	Shape { op: &'static str, arg: &'static str, expected: String, got: Vec<usize> },
	#[error(transparent)]
	Tensor(#[from] tensor::TensorError),
}

pub type Result<T> = std::result::Result<T, KernelError>;

pub(crate) fn expect_dtype(
	op: &'static str,
	arg: &'static str,
	t: &Tensor,
	expected: Dtype,
) -> Result<()> {
	if t.dtype() != expected {
		return Err(KernelError::Dtype { op, arg, expected, got: t.dtype() });
	}
	Ok(())
}

pub(crate) fn expect_rank(
	op: &'static str,
	arg: &'static str,
	t: &Tensor,
	rank: usize,
) -> Result<()> {
	if t.ndim() != rank {
		return Err(KernelError::Shape {
			op,
			arg,
			expected: format!("rank {}", rank),
			got: t.shape().to_vec(),
		});
	}
	Ok(())
}

pub(crate) fn expect_shape(
	op: &'static str,
	arg: &'static str,
	t: &Tensor,
	expected: &[usize],
) -> Result<()> {
	if t.shape() != expected {
		return Err(KernelError::Shape {
			op,
			arg,
			expected: format!("shape {:?}", expected),
			got: t.shape().to_vec(),
		});
	}
	Ok(())
}

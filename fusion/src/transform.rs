use crate::error::{expect_dtype, expect_shape, Result};
use glam::Vec3;
use tensor::{Dtype, Tensor};

/// Pinhole camera model plus the rigid world→camera transform of one frame.
///
/// Inputs to [`FrameTransform::rigid_transform`] may be in voxel units; the
/// `scale` factor (the voxel size, or `1.0` for metric inputs) is applied
/// before the extrinsics.
#[derive(Debug, Clone, Copy)]
pub struct FrameTransform {
	fx: f32,
	fy: f32,
	cx: f32,
	cy: f32,
	rotation: [Vec3; 3],
	translation: Vec3,
	scale: f32,
}

impl FrameTransform {
	/// Build from a 3×3 intrinsics and a 4×4 world→camera extrinsics tensor.
	pub fn new(
		op: &'static str,
		intrinsics: &Tensor,
		extrinsics: &Tensor,
		scale: f32,
	) -> Result<Self> {
		let mut transform = Self::without_extrinsics(op, intrinsics)?;
		expect_dtype(op, "extrinsics", extrinsics, Dtype::F32)?;
		expect_shape(op, "extrinsics", extrinsics, &[4, 4])?;
		let e = extrinsics.as_slice::<f32>()?;
		transform.rotation = [
			Vec3::new(e[0], e[1], e[2]),
			Vec3::new(e[4], e[5], e[6]),
			Vec3::new(e[8], e[9], e[10]),
		];
		transform.translation = Vec3::new(e[3], e[7], e[11]);
		transform.scale = scale;
		Ok(transform)
	}

	/// Intrinsics only: identity extrinsics, metric units.
	pub fn without_extrinsics(op: &'static str, intrinsics: &Tensor) -> Result<Self> {
		expect_dtype(op, "intrinsics", intrinsics, Dtype::F32)?;
		expect_shape(op, "intrinsics", intrinsics, &[3, 3])?;
		let k = intrinsics.as_slice::<f32>()?;
		Ok(Self {
			fx: k[0],
			fy: k[4],
			cx: k[2],
			cy: k[5],
			rotation: [Vec3::X, Vec3::Y, Vec3::Z],
			translation: Vec3::ZERO,
			scale: 1.0,
		})
	}

	/// World point (scaled to metric) to camera frame.
	pub fn rigid_transform(&self, p: Vec3) -> Vec3 {
		let p = p * self.scale;
		Vec3::new(
			self.rotation[0].dot(p),
			self.rotation[1].dot(p),
			self.rotation[2].dot(p),
		) + self.translation
	}

	/// Camera point back to world (metric; the rigid part is orthonormal).
	pub fn rigid_transform_inverse(&self, p: Vec3) -> Vec3 {
		let p = p - self.translation;
		self.rotation[0] * p.x + self.rotation[1] * p.y + self.rotation[2] * p.z
	}

	/// Pinhole projection of a camera-frame point. Undefined for `z ≤ 0`;
	/// callers check.
	pub fn project(&self, p: Vec3) -> (f32, f32) {
		(self.fx * p.x / p.z + self.cx, self.fy * p.y / p.z + self.cy)
	}

	/// Pixel `(u, v)` at depth `d` back to the camera frame.
	pub fn unproject(&self, u: f32, v: f32, d: f32) -> Vec3 {
		Vec3::new((u - self.cx) * d / self.fx, (v - self.cy) * d / self.fy, d)
	}
}

use image::DynamicImage;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Orientation {
	#[default]
	Normal,
	MirroredHorizontal,
	CW90,
	MirroredVertical,
	MirroredHorizontalAnd270CW,
	MirroredHorizontalAnd90CW,
	CW180,
	CW270,
}

impl Orientation {
	/// This follows the EXIF specification as to how images are supposed to be
	/// rotated/flipped depending on their associated value
	pub(crate) const fn from_exif_int(i: u32) -> Self {
		match i {
			2 => Self::MirroredHorizontal,
			3 => Self::CW180,
			4 => Self::MirroredVertical,
			5 => Self::MirroredHorizontalAnd270CW,
			6 => Self::CW90,
			7 => Self::MirroredHorizontalAnd90CW,
			8 => Self::CW270,
			_ => Self::Normal,
		}
	}

	/// Corrects a decoded thumbnail so it displays upright.
	#[must_use]
	pub fn correct_thumbnail(&self, img: DynamicImage) -> DynamicImage {
		match self {
			Self::Normal => img,
			Self::CW180 => img.rotate180(),
			Self::CW270 => img.rotate270(),
			Self::CW90 => img.rotate90(),
			Self::MirroredHorizontal => img.fliph(),
			Self::MirroredVertical => img.flipv(),
			Self::MirroredHorizontalAnd90CW => img.fliph().rotate90(),
			Self::MirroredHorizontalAnd270CW => img.fliph().rotate270(),
		}
	}
}

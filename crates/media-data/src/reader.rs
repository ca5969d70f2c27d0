use exif::{Exif, In, Tag};
use std::{fs::File, io::BufReader, path::Path};

use crate::{Error, Orientation, Result};

const JPEG_SOI: [u8; 2] = [0xff, 0xd8];

/// Extra IFDs some TIFF-based raw formats use to store reduced-resolution previews.
const PREVIEW_IFDS: [In; 3] = [In::PRIMARY, In(2), In(3)];

pub struct ExifReader(Exif);

impl ExifReader {
	pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
		let file = File::open(path)?;
		let mut reader = BufReader::new(file);

		Ok(Self(exif::Reader::new().read_from_container(&mut reader)?))
	}

	pub(crate) fn orientation_int(&self) -> Option<u32> {
		self.0
			.get_field(Tag::Orientation, In::PRIMARY)
			.and_then(|field| field.value.get_uint(0))
	}

	/// The rotation/flip the primary image declares, or `None` when the tag is
	/// absent (the caller should then treat the orientation as unknown).
	#[must_use]
	pub fn orientation(&self) -> Option<Orientation> {
		self.orientation_int().map(Orientation::from_exif_int)
	}

	/// The low-resolution thumbnail most cameras write into IFD1.
	pub fn embedded_thumbnail(&self) -> Result<Vec<u8>> {
		self.embedded_jpeg(In::THUMBNAIL)
			.ok_or(Error::NoThumbnail)
			.and_then(|res| res)
	}

	/// Larger derivative JPEGs stored in the primary or extra IFDs, in the order
	/// the file declares them. Raw formats commonly keep a screen-sized preview
	/// here even when the thumbnail in IFD1 is tiny.
	#[must_use]
	pub fn previews(&self) -> Vec<Vec<u8>> {
		PREVIEW_IFDS
			.iter()
			.filter_map(|ifd| self.embedded_jpeg(*ifd).and_then(std::result::Result::ok))
			.collect()
	}

	/// Resolves a `JPEGInterchangeFormat` pointer pair against the raw TIFF
	/// buffer. Offsets are relative to the TIFF header, which is exactly what
	/// [`Exif::buf`] holds.
	fn embedded_jpeg(&self, ifd: In) -> Option<Result<Vec<u8>>> {
		let offset = self
			.0
			.get_field(Tag::JPEGInterchangeFormat, ifd)?
			.value
			.get_uint(0)? as usize;
		let length = self
			.0
			.get_field(Tag::JPEGInterchangeFormatLength, ifd)?
			.value
			.get_uint(0)? as usize;

		let buf = self.0.buf();

		let Some(bytes) = offset
			.checked_add(length)
			.and_then(|end| buf.get(offset..end))
		else {
			return Some(Err(Error::Truncated));
		};

		if bytes.len() < JPEG_SOI.len() || bytes[..JPEG_SOI.len()] != JPEG_SOI {
			return Some(Err(Error::Truncated));
		}

		Some(Ok(bytes.to_vec()))
	}
}

use std::{ffi::OsStr, fs, path::Path};

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use lumina_images::format_image;
use lumina_media_data::{ExifReader, Orientation};
use tracing::trace;

use super::{
	QualityMode, ThumbnailRequest, PHOTO_LETTERBOX_MARGIN, TARGET_HEIGHT, TARGET_WIDTH,
	VIDEO_LETTERBOX_MARGIN,
};

pub(super) struct Extraction {
	/// `None` is the absence marker: every fallback level failed.
	pub image: Option<DynamicImage>,
	pub orientation_unknown: bool,
}

struct Decoded {
	image: DynamicImage,
	/// Went through the letterbox-crop path, which skips the aspect-fit resize.
	cropped: bool,
}

/// Produces one normalized thumbnail from a request, trying sources in
/// priority order: sidecar file, embedded EXIF thumbnail, embedded preview
/// meeting the target size, full decode for formats safe to load whole.
///
/// Reads only; never writes, never panics, never propagates an error. Every
/// failure mode collapses into the absence marker.
pub(super) fn extract(request: &ThumbnailRequest) -> Extraction {
	let reader = ExifReader::from_path(&request.file.path).ok();
	let orientation = reader.as_ref().and_then(ExifReader::orientation);

	let Some(Decoded { image, cropped }) = decode_by_priority(request, reader.as_ref()) else {
		trace!(
			"No thumbnail source yielded an image for {}",
			request.file.path.display()
		);
		return Extraction {
			image: None,
			orientation_unknown: orientation.is_none(),
		};
	};

	let image = if cropped {
		image
	} else {
		aspect_fit(&image, request.quality)
	};

	let image = match &orientation {
		Some(orientation) => orientation.correct_thumbnail(image),
		None => image,
	};

	Extraction {
		image: Some(image),
		orientation_unknown: orientation.is_none(),
	}
}

fn decode_by_priority(request: &ThumbnailRequest, reader: Option<&ExifReader>) -> Option<Decoded> {
	// A resolved sidecar short-circuits the primary file entirely
	if let Some(sidecar) = &request.sidecar {
		return decode_sidecar(sidecar);
	}

	if let Some(decoded) = reader.and_then(|r| decode_embedded_thumbnail(r, &request.file.path)) {
		return Some(decoded);
	}

	if let Some(decoded) = reader.and_then(decode_first_suitable_preview) {
		return Some(decoded);
	}

	decode_whole_file(&request.file.path)
}

fn decode_sidecar(sidecar: &Path) -> Option<Decoded> {
	let image = fs::read(sidecar)
		.ok()
		.and_then(|bytes| image::load_from_memory(&bytes).ok())?;

	Some(apply_letterbox_crop(image, VIDEO_LETTERBOX_MARGIN))
}

fn decode_embedded_thumbnail(reader: &ExifReader, path: &Path) -> Option<Decoded> {
	let image = reader
		.embedded_thumbnail()
		.ok()
		.and_then(|bytes| image::load_from_memory(&bytes).ok())?;

	// Plain JPEGs embed clean thumbnails; raw formats letterbox theirs
	if is_plain_jpeg(path) {
		Some(Decoded {
			image,
			cropped: false,
		})
	} else {
		Some(apply_letterbox_crop(image, PHOTO_LETTERBOX_MARGIN))
	}
}

fn decode_first_suitable_preview(reader: &ExifReader) -> Option<Decoded> {
	reader
		.previews()
		.into_iter()
		.filter_map(|bytes| image::load_from_memory(&bytes).ok())
		.find(|image| {
			let (w, h) = image.dimensions();
			w >= TARGET_WIDTH && h >= TARGET_HEIGHT
		})
		.map(|image| Decoded {
			image,
			cropped: false,
		})
}

fn decode_whole_file(path: &Path) -> Option<Decoded> {
	path.extension()
		.is_some_and(|ext| lumina_images::loadable_extension(ext))
		.then(|| format_image(path).ok())
		.flatten()
		.map(|image| Decoded {
			image,
			cropped: false,
		})
}

/// Removes the constant top/bottom letterbox bands of a target-sized embedded
/// thumbnail. Other dimensions pass through untouched and take the normal
/// resize path.
fn apply_letterbox_crop(image: DynamicImage, margin: u32) -> Decoded {
	if image.dimensions() == (TARGET_WIDTH, TARGET_HEIGHT) {
		let cropped = image.crop_imm(0, margin, TARGET_WIDTH, TARGET_HEIGHT - margin * 2);
		Decoded {
			image: cropped,
			cropped: true,
		}
	} else {
		Decoded {
			image,
			cropped: false,
		}
	}
}

/// Fits the image into the target box, preserving aspect ratio.
fn aspect_fit(image: &DynamicImage, quality: QualityMode) -> DynamicImage {
	let filter = match quality {
		QualityMode::High => FilterType::Lanczos3,
		QualityMode::Fast => FilterType::Triangle,
	};

	image.resize(TARGET_WIDTH, TARGET_HEIGHT, filter)
}

fn is_plain_jpeg(path: &Path) -> bool {
	path.extension()
		.map(OsStr::to_ascii_lowercase)
		.is_some_and(|ext| ext == "jpg" || ext == "jpeg")
}

/// The size that a image is allowed to be (in MiB, calculated as `MiB * KiB * B`).
pub const GENERIC_MAXIMUM_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Extensions safe to decode whole via the `image` crate. Raw camera formats are
/// deliberately absent: their embedded previews are the only sane source.
pub const GENERIC_EXTENSIONS: [&str; 9] = [
	"jpg", "jpeg", "png", "webp", "gif", "bmp", "ico", "tif", "tiff",
];

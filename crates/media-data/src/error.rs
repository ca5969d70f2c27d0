#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("there was an i/o error: {0}")]
	Io(#[from] std::io::Error),
	#[error("error from the exif crate: {0}")]
	Exif(#[from] exif::Error),
	#[error("the file carries no embedded thumbnail")]
	NoThumbnail,
	#[error("the embedded image data is truncated or out of bounds")]
	Truncated,
}

pub type Result<T> = std::result::Result<T, Error>;

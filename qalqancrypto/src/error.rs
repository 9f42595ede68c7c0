use std::error::Error;

#[derive(Debug)]
pub enum CryptoError {
	/// A MAC tag did not match the recomputed value.
	TagMismatch,
	/// Fewer bytes were supplied than the operation requires.
	TruncatedData,
	/// A buffer length did not match the cipher's block or key size.
	BadLength,
	/// IO error.
	IOError(std::io::Error),
}

impl From<std::io::Error> for CryptoError {
	fn from(e: std::io::Error) -> Self {
		CryptoError::IOError(e)
	}
}

impl Error for CryptoError {}

impl std::fmt::Display for CryptoError {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			CryptoError::TagMismatch => write!(f, "MAC tag mismatch"),
			CryptoError::TruncatedData => write!(f, "truncated data"),
			CryptoError::BadLength => write!(f, "bad buffer length"),
			CryptoError::IOError(e) => write!(f, "IO error: {e}"),
		}
	}
}

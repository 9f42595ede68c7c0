use qalqancrypto::CryptoError;

/// Error kinds surfaced by the core. These are deliberately
/// distinct *variants*, not message strings — the caller (the excluded UI)
/// is responsible for localising them. `WrongPasswordOrCorrupt` in
/// particular is a single unified variant so a caller can never tell a bad
/// password from a corrupted vault, by design.
#[derive(Debug)]
pub enum VaultError {
	BothVaultsPresent,
	NoVault,
	VaultTooShort,
	WrongPasswordOrCorrupt,
	VaultBadLayout,
	VaultWriteFailed(std::io::Error),
	PasswordPolicy,
	PasswordMismatch,
	NoKeysAvailable,
	FileTooLarge,
	CipherTextTruncated,
	MetaIntegrity,
	FileIntegrity,
	UnknownSender,
	CenterSelfDecrypt,
	InvalidSessionIndex,
	ArchiveMagic,
	ArchiveVersion,
	ArchiveNameInvalid,
	IOError(std::io::Error),
}

impl From<std::io::Error> for VaultError {
	fn from(error: std::io::Error) -> VaultError {
		VaultError::IOError(error)
	}
}

impl From<CryptoError> for VaultError {
	fn from(error: CryptoError) -> VaultError {
		match error {
			CryptoError::TagMismatch => VaultError::WrongPasswordOrCorrupt,
			CryptoError::TruncatedData => VaultError::VaultTooShort,
			CryptoError::BadLength => VaultError::VaultBadLayout,
			CryptoError::IOError(e) => VaultError::IOError(e),
		}
	}
}

impl std::error::Error for VaultError {}

impl std::fmt::Display for VaultError {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			VaultError::BothVaultsPresent => write!(f, "both a center and a user vault are present"),
			VaultError::NoVault => write!(f, "no vault file found"),
			VaultError::VaultTooShort => write!(f, "vault file is too short to be valid"),
			VaultError::WrongPasswordOrCorrupt => write!(f, "wrong password or corrupted vault"),
			VaultError::VaultBadLayout => write!(f, "vault has an invalid layout (bad user/session counts)"),
			VaultError::VaultWriteFailed(e) => write!(f, "failed to write vault: {e}"),
			VaultError::PasswordPolicy => write!(f, "password does not meet the policy requirements"),
			VaultError::PasswordMismatch => write!(f, "password confirmation does not match"),
			VaultError::NoKeysAvailable => write!(f, "no keys are available for this operation"),
			VaultError::FileTooLarge => write!(f, "file is larger than the maximum supported size"),
			VaultError::CipherTextTruncated => write!(f, "encrypted file is truncated"),
			VaultError::MetaIntegrity => write!(f, "service header failed integrity check"),
			VaultError::FileIntegrity => write!(f, "file failed integrity check"),
			VaultError::UnknownSender => write!(f, "sender is not known to this vault"),
			VaultError::CenterSelfDecrypt => write!(f, "center-file must be decrypted on recipient"),
			VaultError::InvalidSessionIndex => write!(f, "session key index is out of range"),
			VaultError::ArchiveMagic => write!(f, "archive has an invalid magic number"),
			VaultError::ArchiveVersion => write!(f, "archive has an unsupported version"),
			VaultError::ArchiveNameInvalid => write!(f, "archive entry has an invalid name"),
			VaultError::IOError(e) => write!(f, "IO error: {e}"),
		}
	}
}

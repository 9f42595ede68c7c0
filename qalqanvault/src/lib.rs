//! Key vault, key selection, encrypted-file container, and archive packer
//! for the Qalqan file-encryption core.
//!
//! `qalqancrypto` supplies the opaque block-cipher/OFB/MAC primitives and
//! the password KDF this crate builds on; this crate owns everything that
//! knows about the vault's on-disk layout and the encrypted-file format.

mod archive;
mod container;
mod errors;
mod password;
mod selector;
mod session;
mod task;
mod vault;

pub use archive::{PackEntry, UnpackedEntry};
pub use container::{DecryptedFile, EncryptRequest, FileType};
pub use errors::VaultError;
pub use password::{validate_confirmation, validate_password_policy};
pub use selector::KeyType;
pub use session::Session;
pub use task::{BackgroundTask, CancellationToken, Progress, ProgressReporter};
pub use vault::{Flavour, Vault};

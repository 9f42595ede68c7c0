//! The explicit per-login handle that replaces implicit global vault state.
//!
//! A `Session` owns one decrypted [`Vault`] and the background persist
//! queue that keeps it durable on disk. Every encrypt/decrypt/pack
//! operation takes `&mut Session` rather than reaching for ambient state,
//! so a process can legitimately hold more than one open at a time (tests
//! do exactly that to exercise a center vault against its matching user
//! vault).

use crate::archive::{self, PackEntry, UnpackedEntry};
use crate::container::{self, DecryptedFile, EncryptRequest, FileType};
use crate::errors::VaultError;
use crate::password;
use crate::task::PersistQueue;
use crate::vault::{Flavour, Vault};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// A logged-in vault, routed through rotation if it's still on the factory
/// password.
pub struct Session {
	vault: Vault,
	persist_queue: PersistQueue,
}

impl Session {
	/// Opens the vault at `dir` (auto-detecting center vs user by filename)
	/// and decrypts it with `password`. Returns `Ok` even when the vault
	/// still needs password rotation — callers check
	/// [`Session::needs_password_rotation`] before offering the main
	/// surface, exactly as the rotation gate requires.
	pub fn login(dir: &Path, password: &[u8]) -> Result<Session, VaultError> {
		let (flavour, path) = Flavour::detect(dir)?;
		let vault = Vault::load(path, flavour, password)?;
		Ok(Session { vault, persist_queue: PersistQueue::new() })
	}

	pub fn needs_password_rotation(&self) -> bool {
		self.vault.needs_password_rotation()
	}

	pub fn flavour(&self) -> Flavour {
		self.vault.flavour()
	}

	/// Validates the new password, re-derives the round-key, sets the
	/// rotation footer, and persists synchronously — rotation is rare and
	/// security-critical enough that it shouldn't be coalesced with
	/// ordinary background persists.
	pub fn rotate_password(&mut self, new_password: &str, confirmation: &str) -> Result<(), VaultError> {
		password::validate_confirmation(new_password, confirmation)?;
		self.vault.rotate_password(new_password)
	}

	/// Encrypts `plaintext` for `target_user`, consuming a session key first
	/// if `prefer_session` and a slot remains. Any session-key consumption
	/// queues a background persist of the now-mutated vault.
	pub fn encrypt_file(&mut self, owner: u8, target_user: usize, prefer_session: bool, file_type: FileType, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
		let request = EncryptRequest { owner, target_user, prefer_session, file_type, is_archive: false, plaintext_len: plaintext.len() as u64 };
		let envelope = container::encrypt(&mut self.vault, request, Cursor::new(plaintext))?;
		self.queue_persist_if_dirty();
		Ok(envelope)
	}

	/// Packs `files` into a QPKG payload and encrypts it in one step, streaming
	/// the packer's output straight into the OFB driver rather than
	/// materializing the concatenated archive first (per §4.5).
	pub fn encrypt_archive(&mut self, owner: u8, target_user: usize, prefer_session: bool, files: Vec<PackEntry<Cursor<Vec<u8>>>>) -> Result<Vec<u8>, VaultError> {
		let meta: Vec<(String, u64)> = files.iter().map(|f| (f.name.clone(), f.size)).collect();
		let plaintext_len = archive::plaintext_len(&meta);
		let packer = archive::Packer::new(files);

		let request = EncryptRequest { owner, target_user, prefer_session, file_type: FileType::Generic, is_archive: true, plaintext_len };
		let envelope = container::encrypt(&mut self.vault, request, packer)?;
		self.queue_persist_if_dirty();
		Ok(envelope)
	}

	/// Decrypts `envelope`. If its archive flag is set, the caller should
	/// route `DecryptedFile::plaintext` through
	/// [`Session::unpack_archive`]; single-file payloads are already the
	/// final bytes.
	pub fn decrypt_file(&mut self, envelope: &[u8]) -> Result<DecryptedFile, VaultError> {
		let result = container::decrypt(&mut self.vault, envelope)?;
		self.queue_persist_if_dirty();
		Ok(result)
	}

	/// Unpacks a decrypted archive payload and writes every entry under
	/// `dest`, de-duplicating names against what's already there.
	pub fn unpack_archive(plaintext: &[u8], dest: &Path) -> Result<Vec<PathBuf>, VaultError> {
		let entries: Vec<UnpackedEntry> = archive::unpack(plaintext)?;
		archive::write_entries(&entries, dest)
	}

	fn queue_persist_if_dirty(&mut self) {
		if self.vault.take_dirty() {
			let (path, bytes) = self.vault.snapshot();
			self.persist_queue.submit(path, bytes);
		}
	}

	/// The most recent background-persist failure, if any. Per the error
	/// propagation policy a failed persist is retried at the next
	/// consumption rather than treated as fatal; this is surfaced for
	/// logging only.
	pub fn last_persist_error(&self) -> Option<String> {
		self.persist_queue.last_error()
	}
}

//! The key vault — parse, verify, decrypt, mutate, re-encrypt, and
//! persist the vault file.

mod format;

use crate::errors::VaultError;
use byteorder::{BigEndian, ByteOrder};
use format::{
	decode_header, decode_kikey, decode_stored_key, derive_user_count, encode_header, encode_kikey, encode_stored_key, Footer, CIRCLE_COUNT, CIRCLE_REGION_LEN, FOOTER_LEN, HEADER_LEN, KIKEY_LEN, MAC_LEN,
};
use qalqancrypto::{derive_password_key, qalqan_imit_bytes, Key, MacTag, RoundKey};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;

/// Which of the two on-disk layouts a vault uses (selected by filename).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavour {
	Center,
	User,
}

impl Flavour {
	/// Resolves the flavour of a vault directory the way the program
	/// directory convention does: exactly one of `center.bin` /
	/// `abc.bin` must be present.
	pub fn detect(dir: &Path) -> Result<(Flavour, PathBuf), VaultError> {
		let center = dir.join("center.bin");
		let user = dir.join("abc.bin");
		let center_exists = center.is_file();
		let user_exists = user.is_file();

		match (center_exists, user_exists) {
			(true, true) => Err(VaultError::BothVaultsPresent),
			(true, false) => Ok((Flavour::Center, center)),
			(false, true) => Ok((Flavour::User, user)),
			(false, false) => Err(VaultError::NoVault),
		}
	}
}

/// The in-memory, decrypted vault. Session
/// slots that have been consumed hold [`Key::zero`]; circle keys never do.
pub struct Vault {
	path: PathBuf,
	flavour: Flavour,
	own_user_id: u8,
	n_in: u16,
	n_out: u16,
	user_count: usize,
	kikey: Key,
	pub(crate) rimitkey: RoundKey,
	pub(crate) circle: Vec<Key>,
	/// `session_in[u][i]`, `session_out[u][i]`, both in 0-based user order
	/// regardless of on-disk ordering (format-specific OUT-then-IN /
	/// IN-then-OUT layout is resolved at load/persist time only).
	pub(crate) session_in: Vec<Vec<Key>>,
	pub(crate) session_out: Vec<Vec<Key>>,
	pub(crate) next_out_idx: Vec<usize>,
	password_round_key: RoundKey,
	footer_changed: bool,
	dirty: bool,
}

impl Vault {
	/// Loads and fully decrypts a vault file.
	pub fn load(path: impl Into<PathBuf>, flavour: Flavour, password: &[u8]) -> Result<Vault, VaultError> {
		let path = path.into();
		let raw = fs::read(&path)?;
		Self::parse(raw, path, flavour, password)
	}

	fn parse(raw: Vec<u8>, path: PathBuf, flavour: Flavour, password: &[u8]) -> Result<Vault, VaultError> {
		let min_len = HEADER_LEN + KIKEY_LEN + CIRCLE_REGION_LEN + MAC_LEN;
		if raw.len() < min_len {
			return Err(VaultError::VaultTooShort);
		}

		// (b) header + encrypted KIKEY.
		let header_bytes = &raw[0..HEADER_LEN];
		let kikey_stored = &raw[HEADER_LEN..HEADER_LEN + KIKEY_LEN];

		// (c) decrypt KIKEY, re-expand rimitkey.
		let password_key = derive_password_key(password);
		let password_round_key = RoundKey::expand(&password_key);
		let kikey = decode_kikey(&password_round_key, kikey_stored);
		let rimitkey = RoundKey::expand(&kikey);

		// (d) MAC over everything but the trailing 16 bytes.
		let body = &raw[..raw.len() - MAC_LEN];
		let mac_stored = &raw[raw.len() - MAC_LEN..];
		let mac_computed = qalqan_imit_bytes(&rimitkey, body);
		if !bool::from(mac_computed.ct_eq(&MacTag(mac_stored.try_into().expect("16 bytes")))) {
			return Err(VaultError::WrongPasswordOrCorrupt);
		}

		// Footer detection: peek at the 16 bytes immediately preceding the
		// trailing MAC; a valid "QPWD" magic there means a footer is
		// present, independent of session-region bookkeeping.
		let footer_probe_end = raw.len() - MAC_LEN;
		let (footer, has_footer) = if footer_probe_end >= FOOTER_LEN + min_len - MAC_LEN {
			let probe = &raw[footer_probe_end - FOOTER_LEN..footer_probe_end];
			match Footer::decode(probe) {
				Some(f) => (f, true),
				None => (Footer { changed: false }, false),
			}
		} else {
			(Footer { changed: false }, false)
		};

		// (e)/(f) header fields, derived user count.
		let parsed_header = decode_header(flavour, header_bytes);
		let circle_start = HEADER_LEN + KIKEY_LEN;
		let circle_end = circle_start + CIRCLE_REGION_LEN;
		let session_start = circle_end;
		let session_end = raw.len() - MAC_LEN - if has_footer { FOOTER_LEN } else { 0 };
		if session_end < session_start {
			return Err(VaultError::VaultBadLayout);
		}
		let sess_bytes = session_end - session_start;
		let user_count = derive_user_count(flavour, sess_bytes, parsed_header.n_in, parsed_header.n_out)?;

		// Circle keys.
		let mut circle = Vec::with_capacity(CIRCLE_COUNT);
		for i in 0..CIRCLE_COUNT {
			let slot = &raw[circle_start + i * KIKEY_LEN..circle_start + (i + 1) * KIKEY_LEN];
			circle.push(decode_stored_key(&password_round_key, slot));
		}

		// Session keys, in flavour-appropriate on-disk order.
		let n_in = parsed_header.n_in as usize;
		let n_out = parsed_header.n_out as usize;
		let mut session_in = vec![Vec::with_capacity(n_in); user_count];
		let mut session_out = vec![Vec::with_capacity(n_out); user_count];
		let mut cursor = session_start;

		for u in 0..user_count {
			match flavour {
				Flavour::Center => {
					for _ in 0..n_out {
						session_out[u].push(decode_stored_key(&password_round_key, &raw[cursor..cursor + KIKEY_LEN]));
						cursor += KIKEY_LEN;
					}
					for _ in 0..n_in {
						session_in[u].push(decode_stored_key(&password_round_key, &raw[cursor..cursor + KIKEY_LEN]));
						cursor += KIKEY_LEN;
					}
				}
				Flavour::User => {
					for _ in 0..n_in {
						session_in[u].push(decode_stored_key(&password_round_key, &raw[cursor..cursor + KIKEY_LEN]));
						cursor += KIKEY_LEN;
					}
					for _ in 0..n_out {
						session_out[u].push(decode_stored_key(&password_round_key, &raw[cursor..cursor + KIKEY_LEN]));
						cursor += KIKEY_LEN;
					}
				}
			}
		}

		let next_out_idx = vec![0usize; user_count];

		Ok(Vault {
			path,
			flavour,
			own_user_id: parsed_header.own_user_id,
			n_in: parsed_header.n_in,
			n_out: parsed_header.n_out,
			user_count,
			kikey,
			rimitkey,
			circle,
			session_in,
			session_out,
			next_out_idx,
			password_round_key,
			footer_changed: footer.changed,
			dirty: false,
		})
	}

	pub fn flavour(&self) -> Flavour {
		self.flavour
	}

	pub fn own_user_id(&self) -> u8 {
		self.own_user_id
	}

	pub fn user_count(&self) -> usize {
		self.user_count
	}

	pub fn session_key_counts(&self, user: usize) -> (usize, usize) {
		(self.session_in.get(user).map_or(0, Vec::len), self.session_out.get(user).map_or(0, Vec::len))
	}

	/// Absence of the footer, or presence with bit 0 clear, means the user
	/// is still on the factory password.
	pub fn needs_password_rotation(&self) -> bool {
		!self.footer_changed
	}

	pub(crate) fn mark_dirty(&mut self) {
		self.dirty = true;
	}

	/// Consumes the dirty flag, returning whether a persist is owed.
	pub(crate) fn take_dirty(&mut self) -> bool {
		std::mem::replace(&mut self.dirty, false)
	}

	/// Serializes the current in-memory state into vault-file bytes,
	/// encrypting every key under the *current* password round-key.
	pub fn serialize(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(HEADER_LEN + KIKEY_LEN + CIRCLE_REGION_LEN + FOOTER_LEN + MAC_LEN + 4096);

		out.extend_from_slice(&encode_header(self.flavour, self.own_user_id, self.n_in, self.n_out));
		out.extend_from_slice(&encode_kikey(&self.password_round_key, &self.kikey));

		for key in &self.circle {
			out.extend_from_slice(&encode_stored_key(&self.password_round_key, key));
		}

		for u in 0..self.user_count {
			match self.flavour {
				Flavour::Center => {
					for key in &self.session_out[u] {
						out.extend_from_slice(&encode_stored_key(&self.password_round_key, key));
					}
					for key in &self.session_in[u] {
						out.extend_from_slice(&encode_stored_key(&self.password_round_key, key));
					}
				}
				Flavour::User => {
					for key in &self.session_in[u] {
						out.extend_from_slice(&encode_stored_key(&self.password_round_key, key));
					}
					for key in &self.session_out[u] {
						out.extend_from_slice(&encode_stored_key(&self.password_round_key, key));
					}
				}
			}
		}

		out.extend_from_slice(&Footer { changed: self.footer_changed }.encode());

		let mac = qalqan_imit_bytes(&self.rimitkey, &out);
		out.extend_from_slice(&mac[..]);
		out
	}

	/// Writes the serialized vault atomically to its path with mode 0600,
	/// using a temp-file-then-rename pattern.
	pub fn persist(&self) -> Result<(), VaultError> {
		write_atomic(&self.path, &self.serialize())
	}

	/// Validates the new password against the policy, re-derives the
	/// password round-key, sets the footer's change-flag, and persists.
	pub fn rotate_password(&mut self, new_password: &str) -> Result<(), VaultError> {
		crate::password::validate_password_policy(new_password)?;
		self.password_round_key = RoundKey::expand(&derive_password_key(new_password.as_bytes()));
		self.footer_changed = true;
		self.persist()?;
		self.dirty = false;
		Ok(())
	}

	/// Serializes the vault's current state into a standalone byte buffer a
	/// background task can hand to [`write_atomic`] without holding the
	/// vault lock for the duration of the write.
	pub(crate) fn snapshot(&mut self) -> (PathBuf, Vec<u8>) {
		self.dirty = false;
		(self.path.clone(), self.serialize())
	}

	#[cfg(test)]
	pub(crate) fn from_raw_for_test(raw: Vec<u8>, path: PathBuf, flavour: Flavour, password: &[u8]) -> Result<Vault, VaultError> {
		Self::parse(raw, path, flavour, password)
	}
}

/// Atomic, 0600-permission vault write: write to a temp file in the same
/// directory, then rename over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
	let dir = path.parent().unwrap_or_else(|| Path::new("."));
	let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(VaultError::VaultWriteFailed)?;
	tmp.write_all(bytes).map_err(VaultError::VaultWriteFailed)?;
	tmp.as_file().set_permissions(fs::Permissions::from_mode(0o600)).map_err(VaultError::VaultWriteFailed)?;
	tmp.persist(path).map_err(|e| VaultError::VaultWriteFailed(e.error))?;
	Ok(())
}

/// Reads a session index out of the on-wire `(idx+1)` big-endian encoding,
/// returning `None` for the reserved "no session index" value 0.
pub fn decode_session_index(hi: u8, lo: u8) -> Option<u16> {
	let stored = BigEndian::read_u16(&[hi, lo]);
	stored.checked_sub(1)
}

pub fn encode_session_index(idx: u16) -> [u8; 2] {
	let mut out = [0u8; 2];
	BigEndian::write_u16(&mut out, idx + 1);
	out
}


#[cfg(test)]
mod tests {
	use super::format_test_support::build_user_vault_bytes;
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn loads_well_formed_user_vault() {
		let raw = build_user_vault_bytes(b"hunter2", 3, 3);
		let vault = Vault::parse(raw, PathBuf::from("abc.bin"), Flavour::User, b"hunter2").unwrap();
		assert_eq!(vault.user_count(), 1);
		assert_eq!(vault.circle.len(), CIRCLE_COUNT);
		assert_eq!(vault.session_in[0].len(), 3);
		assert_eq!(vault.session_out[0].len(), 3);
		assert!(!vault.needs_password_rotation());
	}

	#[test]
	fn wrong_password_is_rejected() {
		let raw = build_user_vault_bytes(b"hunter2", 1, 1);
		let err = Vault::parse(raw, PathBuf::from("abc.bin"), Flavour::User, b"wrong").unwrap_err();
		assert!(matches!(err, VaultError::WrongPasswordOrCorrupt));
	}

	#[test]
	fn reload_after_persist_round_trips() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("abc.bin");
		let raw = build_user_vault_bytes(b"hunter2", 2, 2);
		fs::write(&path, &raw).unwrap();

		let vault = Vault::load(&path, Flavour::User, b"hunter2").unwrap();
		vault.persist().unwrap();

		let reloaded = Vault::load(&path, Flavour::User, b"hunter2").unwrap();
		assert_eq!(reloaded.circle.len(), CIRCLE_COUNT);
		assert_eq!(reloaded.session_in[0].len(), 2);
		assert_eq!(reloaded.session_out[0], vault.session_out[0]);
	}

	#[test]
	fn session_index_encoding_round_trips() {
		for idx in [0u16, 1, 4, 999] {
			let [hi, lo] = encode_session_index(idx);
			assert_eq!(decode_session_index(hi, lo), Some(idx));
		}
		assert_eq!(decode_session_index(0, 0), None);
	}
}

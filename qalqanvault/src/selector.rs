//! Key selection for encryption and decryption.

use crate::errors::VaultError;
use crate::vault::{Flavour, Vault};
use qalqancrypto::{Key, RoundKey};
use rand::rngs::OsRng;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
	Circle,
	Session,
}

/// Everything C5 needs to stamp into the service header after a successful
/// selection.
pub struct EncryptKeyChoice {
	pub round_key: RoundKey,
	pub key_type: KeyType,
	pub circle_idx: u8,
	pub session_idx: u16,
}

impl Vault {
	/// Picks the key for an outbound encryption. Zeros the chosen session
	/// slot in memory and marks the vault dirty so a caller can trigger an
	/// asynchronous persist; circle keys are left untouched.
	pub fn pick_for_encrypt(&mut self, target_user: usize, prefer_session: bool) -> Result<EncryptKeyChoice, VaultError> {
		if prefer_session {
			self.pick_session_out(target_user)
		} else {
			self.pick_circle()
		}
	}

	fn pick_session_out(&mut self, user: usize) -> Result<EncryptKeyChoice, VaultError> {
		let slots = self.session_out.get_mut(user).ok_or(VaultError::UnknownSender)?;
		let n_out = slots.len();
		if n_out == 0 {
			return Err(VaultError::NoKeysAvailable);
		}

		let start = self.next_out_idx[user];
		for step in 0..n_out {
			let idx = (start + step) % n_out;
			if !slots[idx].is_zero() {
				let key = std::mem::replace(&mut slots[idx], Key::zero());
				let round_key = RoundKey::expand(&key);
				self.next_out_idx[user] = (idx + 1) % n_out;
				self.mark_dirty();
				return Ok(EncryptKeyChoice { round_key, key_type: KeyType::Session, circle_idx: 0, session_idx: idx as u16 });
			}
		}

		Err(VaultError::NoKeysAvailable)
	}

	fn pick_circle(&self) -> Result<EncryptKeyChoice, VaultError> {
		let nonzero: Vec<usize> = (0..self.circle.len()).filter(|&i| !self.circle[i].is_zero()).collect();
		if nonzero.is_empty() {
			return Err(VaultError::NoKeysAvailable);
		}

		let mut rng = OsRng;
		let idx = nonzero[rng.gen_range(0..nonzero.len())];
		let round_key = RoundKey::expand(&self.circle[idx]);
		Ok(EncryptKeyChoice { round_key, key_type: KeyType::Circle, circle_idx: idx as u8, session_idx: 0 })
	}

	/// `pick_for_decrypt(owner_field, key_type, circle_idx, session_idx)`
	/// Session lookups zero the `IN` slot only and mark the
	/// vault dirty; circle lookups never mutate state.
	pub fn pick_for_decrypt(&mut self, owner_field: u8, key_type: KeyType, circle_idx: u8, session_idx: u16) -> Result<RoundKey, VaultError> {
		match key_type {
			KeyType::Circle => {
				let key = self.circle.get(circle_idx as usize).ok_or(VaultError::InvalidSessionIndex)?;
				if key.is_zero() {
					return Err(VaultError::InvalidSessionIndex);
				}
				Ok(RoundKey::expand(key))
			}
			KeyType::Session => {
				let user = self.resolve_responsible_user(owner_field)?;
				let slots = self.session_in.get_mut(user).ok_or(VaultError::UnknownSender)?;
				let slot = slots.get_mut(session_idx as usize).ok_or(VaultError::InvalidSessionIndex)?;
				if slot.is_zero() {
					return Err(VaultError::InvalidSessionIndex);
				}
				let key = std::mem::replace(slot, Key::zero());
				self.mark_dirty();
				Ok(RoundKey::expand(&key))
			}
		}
	}

	/// Resolves the user index responsible for an inbound session-key
	/// file. A user vault only ever tracks one counterparty; a
	/// center vault maps the header's owner byte directly — not
	/// `owner - 1` — onto the 0-based user array; see DESIGN.md.
	fn resolve_responsible_user(&self, owner_field: u8) -> Result<usize, VaultError> {
		match self.flavour() {
			Flavour::User => Ok(0),
			Flavour::Center => {
				let idx = owner_field as usize;
				if idx >= self.user_count() {
					Err(VaultError::UnknownSender)
				} else {
					Ok(idx)
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vault::format_test_support::build_user_vault_bytes;
	use std::path::PathBuf;

	fn load(password: &[u8], n_in: u16, n_out: u16) -> Vault {
		let raw = build_user_vault_bytes(password, n_in, n_out);
		Vault::from_raw_for_test(raw, PathBuf::from("abc.bin"), Flavour::User, password).unwrap()
	}

	#[test]
	fn session_encrypt_zeros_slot_and_advances_cursor() {
		let mut vault = load(b"hunter2", 3, 3);
		let choice = vault.pick_for_encrypt(0, true).unwrap();
		assert_eq!(choice.key_type, KeyType::Session);
		assert_eq!(choice.session_idx, 0);
		assert!(vault.session_out[0][0].is_zero());

		let second = vault.pick_for_encrypt(0, true).unwrap();
		assert_eq!(second.session_idx, 1);
	}

	#[test]
	fn session_encrypt_fails_once_exhausted() {
		let mut vault = load(b"hunter2", 1, 1);
		vault.pick_for_encrypt(0, true).unwrap();
		assert!(matches!(vault.pick_for_encrypt(0, true).unwrap_err(), VaultError::NoKeysAvailable));
	}

	#[test]
	fn circle_pick_never_zeros() {
		let mut vault = load(b"hunter2", 0, 0);
		for _ in 0..50 {
			let choice = vault.pick_for_encrypt(0, false).unwrap();
			assert_eq!(choice.key_type, KeyType::Circle);
			assert!(!vault.circle[choice.circle_idx as usize].is_zero());
		}
	}

	#[test]
	fn decrypt_resolves_and_zeros_in_slot_only() {
		let mut vault = load(b"hunter2", 2, 2);
		let out_key = vault.session_out[0][0].clone();
		let round_key = vault.pick_for_decrypt(1, KeyType::Session, 0, 0).unwrap();
		// The IN slot (not the OUT slot we never touched) is now zeroed.
		assert!(vault.session_in[0][0].is_zero());
		assert!(!vault.session_out[0][0].is_zero());
		assert_eq!(out_key, vault.session_out[0][0]);
		drop(round_key);
	}

	#[test]
	fn repeated_decrypt_of_same_index_fails() {
		let mut vault = load(b"hunter2", 1, 1);
		vault.pick_for_decrypt(1, KeyType::Session, 0, 0).unwrap();
		assert!(matches!(vault.pick_for_decrypt(1, KeyType::Session, 0, 0).unwrap_err(), VaultError::InvalidSessionIndex));
	}
}

//! Derives the 256-bit key-encryption key from a vault passphrase.
//!
//! No salt, a fixed iteration count of 1000 rounds of SHA-512, truncated to
//! 32 bytes. Both properties are as specified, not an oversight on our
//! part — the vault format has nowhere to store a per-vault salt.

use crate::cipher::Key;
use sha2::{Digest, Sha512};

const ITERATIONS: usize = 1000;

/// Derives the password-encryption key used to unwrap everything else in
/// the vault (KIKEY, circle keys, session keys).
pub fn derive_password_key(password: &[u8]) -> Key {
	let mut state = Sha512::digest(password).to_vec();

	for _ in 1..ITERATIONS {
		state = Sha512::digest(&state).to_vec();
	}

	Key::from_slice(&state[..32]).expect("Sha512 output is always >= 32 bytes")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn deterministic_for_same_password() {
		let a = derive_password_key(b"hunter2");
		let b = derive_password_key(b"hunter2");
		assert_eq!(a, b);
	}

	#[test]
	fn different_for_different_password() {
		let a = derive_password_key(b"hunter2");
		let b = derive_password_key(b"hunter3");
		assert_ne!(a, b);
	}

	#[test]
	fn empty_password_is_allowed() {
		// Password policy is enforced above this layer; the KDF itself
		// must not panic on an empty passphrase.
		derive_password_key(b"");
	}
}

//! Byte-layout helpers for the vault file: header encode/decode per
//! flavour, the password-rotation footer, and the per-key stored-key
//! encoding asymmetry. Pure functions, no I/O, so they're exercised
//! directly by unit tests below.

use crate::errors::VaultError;
use crate::vault::Flavour;
use byteorder::{BigEndian, ByteOrder};
use qalqancrypto::{decrypt_block, encrypt_block, ofb_fixed_iv, Key, RoundKey, BLOCK_SIZE};

pub const HEADER_LEN: usize = 16;
pub const KIKEY_LEN: usize = 32;
pub const CIRCLE_COUNT: usize = 100;
pub const CIRCLE_REGION_LEN: usize = CIRCLE_COUNT * KIKEY_LEN;
pub const MAC_LEN: usize = 16;
pub const FOOTER_LEN: usize = 16;
pub const FOOTER_MAGIC: &[u8; 4] = b"QPWD";
pub const FOOTER_VERSION: u8 = 1;
pub const MAX_N: u16 = 8000;
pub const MAX_USERS: usize = 255;

pub struct ParsedHeader {
	pub own_user_id: u8,
	pub n_in: u16,
	pub n_out: u16,
}

/// Decodes the 16-byte vault header. The two flavours put `N_in`/`N_out` at
/// different offsets (see DESIGN.md); the center flavour additionally
/// fixes byte 0 to `0x33`.
pub fn decode_header(flavour: Flavour, header: &[u8]) -> ParsedHeader {
	debug_assert_eq!(header.len(), HEADER_LEN);

	match flavour {
		Flavour::Center => ParsedHeader {
			own_user_id: 0x33,
			n_in: BigEndian::read_u16(&header[4..6]).min(MAX_N),
			n_out: BigEndian::read_u16(&header[6..8]).min(MAX_N),
		},
		Flavour::User => ParsedHeader {
			own_user_id: header[0],
			n_in: BigEndian::read_u16(&header[1..3]).min(MAX_N),
			n_out: BigEndian::read_u16(&header[3..5]).min(MAX_N),
		},
	}
}

pub fn encode_header(flavour: Flavour, own_user_id: u8, n_in: u16, n_out: u16) -> [u8; HEADER_LEN] {
	let mut header = [0u8; HEADER_LEN];

	match flavour {
		Flavour::Center => {
			header[0] = 0x33;
			BigEndian::write_u16(&mut header[4..6], n_in);
			BigEndian::write_u16(&mut header[6..8], n_out);
		}
		Flavour::User => {
			header[0] = own_user_id;
			BigEndian::write_u16(&mut header[1..3], n_in);
			BigEndian::write_u16(&mut header[3..5], n_out);
		}
	}

	header
}

/// Stored-key encoding for circle/session slots: two independent
/// block-encryptions of the key's halves under the password round-key. A
/// key that is all-zero in memory (a consumed session slot) is written as
/// 32 raw zero bytes instead, so "zeroed" is a property of the ciphertext
/// too.
pub fn encode_stored_key(password_round_key: &RoundKey, key: &Key) -> [u8; KIKEY_LEN] {
	if key.is_zero() {
		return [0u8; KIKEY_LEN];
	}

	let mut out = [0u8; KIKEY_LEN];
	let lo: [u8; BLOCK_SIZE] = key[0..16].try_into().expect("16 bytes");
	let hi: [u8; BLOCK_SIZE] = key[16..32].try_into().expect("16 bytes");
	out[0..16].copy_from_slice(&encrypt_block(password_round_key, &lo));
	out[16..32].copy_from_slice(&encrypt_block(password_round_key, &hi));
	out
}

pub fn decode_stored_key(password_round_key: &RoundKey, stored: &[u8]) -> Key {
	debug_assert_eq!(stored.len(), KIKEY_LEN);

	if stored.iter().all(|&b| b == 0) {
		return Key::zero();
	}

	let lo: [u8; BLOCK_SIZE] = stored[0..16].try_into().expect("16 bytes");
	let hi: [u8; BLOCK_SIZE] = stored[16..32].try_into().expect("16 bytes");
	let mut plain = [0u8; KIKEY_LEN];
	plain[0..16].copy_from_slice(&decrypt_block(password_round_key, &lo));
	plain[16..32].copy_from_slice(&decrypt_block(password_round_key, &hi));
	Key::from_slice(&plain).expect("32 bytes")
}

/// `KIKEY` is the sole exception to [`encode_stored_key`]/[`decode_stored_key`]:
/// it is unwrapped (and wrapped) via the self-inverse OFB construction
/// instead of ECB — see DESIGN.md.
pub fn encode_kikey(password_round_key: &RoundKey, kikey: &Key) -> [u8; KIKEY_LEN] {
	let wrapped = ofb_fixed_iv(password_round_key, &kikey[..]);
	wrapped.try_into().expect("32 bytes")
}

pub fn decode_kikey(password_round_key: &RoundKey, stored: &[u8]) -> Key {
	let plain = ofb_fixed_iv(password_round_key, stored);
	Key::from_slice(&plain).expect("32 bytes")
}

pub struct Footer {
	pub changed: bool,
}

impl Footer {
	pub fn decode(bytes: &[u8]) -> Option<Footer> {
		if bytes.len() != FOOTER_LEN || &bytes[0..4] != FOOTER_MAGIC {
			return None;
		}
		if bytes[4] != FOOTER_VERSION {
			return None;
		}
		Some(Footer { changed: bytes[5] & 1 != 0 })
	}

	pub fn encode(&self) -> [u8; FOOTER_LEN] {
		let mut out = [0u8; FOOTER_LEN];
		out[0..4].copy_from_slice(FOOTER_MAGIC);
		out[4] = FOOTER_VERSION;
		out[5] = if self.changed { 1 } else { 0 };
		out
	}
}

/// Computes `U` from the remaining byte budget, validating that it divides
/// evenly. Returns `VaultBadLayout` on any inconsistency.
pub fn derive_user_count(flavour: Flavour, sess_bytes: usize, n_in: u16, n_out: u16) -> Result<usize, VaultError> {
	let per_user = (n_in as usize + n_out as usize) * KIKEY_LEN;

	match flavour {
		Flavour::User => {
			if sess_bytes != per_user {
				return Err(VaultError::VaultBadLayout);
			}
			Ok(1)
		}
		Flavour::Center => {
			if per_user == 0 {
				return if sess_bytes == 0 { Ok(1) } else { Err(VaultError::VaultBadLayout) };
			}
			if sess_bytes % per_user != 0 {
				return Err(VaultError::VaultBadLayout);
			}
			let u = sess_bytes / per_user;
			if u == 0 || u > MAX_USERS {
				return Err(VaultError::VaultBadLayout);
			}
			Ok(u)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_round_trips_center() {
		let header = encode_header(Flavour::Center, 0, 12, 34);
		let parsed = decode_header(Flavour::Center, &header);
		assert_eq!(parsed.own_user_id, 0x33);
		assert_eq!(parsed.n_in, 12);
		assert_eq!(parsed.n_out, 34);
	}

	#[test]
	fn header_round_trips_user() {
		let header = encode_header(Flavour::User, 7, 3, 3);
		let parsed = decode_header(Flavour::User, &header);
		assert_eq!(parsed.own_user_id, 7);
		assert_eq!(parsed.n_in, 3);
		assert_eq!(parsed.n_out, 3);
	}

	#[test]
	fn stored_key_round_trips() {
		let round_key = RoundKey::expand(&Key::from_slice(&[9u8; 32]).unwrap());
		let key = Key::from_slice(&[42u8; 32]).unwrap();
		let stored = encode_stored_key(&round_key, &key);
		assert_eq!(decode_stored_key(&round_key, &stored), key);
	}

	#[test]
	fn zero_key_stored_as_zero() {
		let round_key = RoundKey::expand(&Key::from_slice(&[9u8; 32]).unwrap());
		let stored = encode_stored_key(&round_key, &Key::zero());
		assert_eq!(stored, [0u8; KIKEY_LEN]);
		assert!(decode_stored_key(&round_key, &stored).is_zero());
	}

	#[test]
	fn kikey_round_trips_via_ofb() {
		let round_key = RoundKey::expand(&Key::from_slice(&[1u8; 32]).unwrap());
		let kikey = Key::from_slice(&[5u8; 32]).unwrap();
		let stored = encode_kikey(&round_key, &kikey);
		assert_ne!(stored, kikey[..]);
		assert_eq!(decode_kikey(&round_key, &stored), kikey);
	}

	#[test]
	fn footer_round_trips() {
		let footer = Footer { changed: true };
		let encoded = footer.encode();
		let decoded = Footer::decode(&encoded).unwrap();
		assert!(decoded.changed);
	}

	#[test]
	fn footer_rejects_bad_magic() {
		assert!(Footer::decode(b"NOTAFOOTERBYTES!").is_none());
	}

	#[test]
	fn user_count_divides_evenly() {
		assert_eq!(derive_user_count(Flavour::Center, 3 * 64, 2, 1).unwrap(), 3);
		assert!(derive_user_count(Flavour::Center, 100, 2, 1).is_err());
	}
}

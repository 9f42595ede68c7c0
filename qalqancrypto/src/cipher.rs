//! The block-cipher, key-schedule, OFB streaming, and keyed-MAC primitives
//! that the rest of the core treats as opaque.
//!
//! The real Qalqan block cipher and its key schedule are proprietary and out
//! of scope here; this module substitutes AES-256 (`B` = 16, `K` = 32,
//! matching Qalqan's sizes) behind the same five function shapes, hand-built
//! out of off-the-shelf primitives rather than a ready-made AEAD, since the
//! five entry points below (block encrypt, OFB streaming in both
//! directions, the keyed MAC) are what the rest of the core actually calls.

use crate::error::CryptoError;
use aes::{
	cipher::{BlockDecrypt, BlockEncrypt, KeyInit},
	Aes256,
};
use std::io::{Read, Write};

/// Block size `B`.
pub const BLOCK_SIZE: usize = 16;
/// Key size `K`.
pub const KEY_SIZE: usize = 32;

new_type!(secret Key(32););
new_type!(public MacTag(16););

type Block = [u8; BLOCK_SIZE];

/// The expanded round-key buffer `E`. Treated as opaque by callers; here
/// it's simply the AES-256 key schedule.
pub struct RoundKey(Aes256);

impl RoundKey {
	/// `Kexp(key, K, B, round_key_buffer)`.
	pub fn expand(key: &Key) -> RoundKey {
		RoundKey(Aes256::new_from_slice(&key.0).expect("Key is always 32 bytes"))
	}
}

/// `Encrypt(plain, round_key, K, B, cipher)`: one-block encryption.
pub fn encrypt_block(round_key: &RoundKey, plain: &Block) -> Block {
	let mut block = (*plain).into();
	round_key.0.encrypt_block(&mut block);
	block.into()
}

/// Inverse of [`encrypt_block`]. Used to unwrap circle/session keys, which
/// are stored as plain block-cipher ciphertext, not as an OFB stream.
pub fn decrypt_block(round_key: &RoundKey, cipher: &Block) -> Block {
	let mut block = (*cipher).into();
	round_key.0.decrypt_block(&mut block);
	block.into()
}

fn xor_block(a: &mut Block, b: &Block) {
	for (x, y) in a.iter_mut().zip(b.iter()) {
		*x ^= y;
	}
}

/// Runs one step of the OFB register: `register <- Encrypt(register)`,
/// returning the new register as the keystream block for this position.
fn ofb_step(round_key: &RoundKey, register: &mut Block) -> Block {
	*register = encrypt_block(round_key, register);
	*register
}

/// `DecryptOFB(in, round_key, K, B, out)`: OFB-keystream application on a
/// single (or here, double) block, starting from an all-zero register.
///
/// Because OFB XORs the same keystream on both sides, this single routine
/// both wraps and unwraps KIKEY — it is its own inverse, unlike
/// [`encrypt_block`]/[`decrypt_block`] which are a genuine encrypt/decrypt
/// pair. See DESIGN.md for the reasoning behind this construction.
pub fn ofb_fixed_iv(round_key: &RoundKey, data: &[u8]) -> Vec<u8> {
	let mut register: Block = [0u8; BLOCK_SIZE];
	let mut out = data.to_vec();

	for chunk in out.chunks_mut(BLOCK_SIZE) {
		let keystream = ofb_step(round_key, &mut register);
		for (byte, ks) in chunk.iter_mut().zip(keystream.iter()) {
			*byte ^= ks;
		}
	}

	out
}

/// Streams OFB over an arbitrary-length plaintext, zero-padding the final
/// partial block to a full block before encrypting it.
pub fn encrypt_ofb_stream<R: Read, W: Write>(round_key: &RoundKey, iv: &Block, mut reader: R, mut writer: W) -> Result<(), CryptoError> {
	let mut register = *iv;
	let mut buf = [0u8; BLOCK_SIZE];

	loop {
		let n = read_fill(&mut reader, &mut buf)?;
		if n == 0 {
			break;
		}
		if n < BLOCK_SIZE {
			for b in &mut buf[n..] {
				*b = 0;
			}
		}

		let keystream = ofb_step(round_key, &mut register);
		let mut block = buf;
		xor_block(&mut block, &keystream);
		writer.write_all(&block)?;

		if n < BLOCK_SIZE {
			break;
		}
	}

	Ok(())
}

/// `DecryptOFB_File(len, round_key, iv, reader, writer)`: the same keystream
/// walk, applied to a ciphertext whose length is already a multiple of `B`.
pub fn decrypt_ofb_stream<R: Read, W: Write>(round_key: &RoundKey, iv: &Block, mut reader: R, mut writer: W) -> Result<(), CryptoError> {
	let mut register = *iv;
	let mut buf = [0u8; BLOCK_SIZE];

	loop {
		let n = read_fill(&mut reader, &mut buf)?;
		if n == 0 {
			break;
		}
		if n != BLOCK_SIZE {
			return Err(CryptoError::TruncatedData);
		}

		let keystream = ofb_step(round_key, &mut register);
		let mut block = buf;
		xor_block(&mut block, &keystream);
		writer.write_all(&block)?;
	}

	Ok(())
}

/// `Qalqan_Imit(len, round_key, reader, mac)`: a keyed CBC-MAC over the
/// first `len` bytes of `reader`, zero-padding the final partial block.
pub fn qalqan_imit<R: Read>(round_key: &RoundKey, mut reader: R) -> Result<MacTag, CryptoError> {
	let mut state: Block = [0u8; BLOCK_SIZE];
	let mut buf = [0u8; BLOCK_SIZE];

	loop {
		let n = read_fill(&mut reader, &mut buf)?;
		if n == 0 {
			break;
		}
		if n < BLOCK_SIZE {
			for b in &mut buf[n..] {
				*b = 0;
			}
		}

		xor_block(&mut state, &buf);
		state = encrypt_block(round_key, &state);

		if n < BLOCK_SIZE {
			break;
		}
	}

	Ok(MacTag(state))
}

/// Computes the MAC over an in-memory buffer; a thin convenience wrapper
/// around [`qalqan_imit`] for the common case of MAC-ing bytes already in
/// memory rather than streaming from a file.
pub fn qalqan_imit_bytes(round_key: &RoundKey, data: &[u8]) -> MacTag {
	qalqan_imit(round_key, data).expect("reading from a slice cannot fail")
}

/// Reads until `buf` is full or the reader is exhausted, returning how many
/// bytes were actually read (less than `buf.len()` only at EOF).
fn read_fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, CryptoError> {
	let mut total = 0;
	while total < buf.len() {
		let n = reader.read(&mut buf[total..])?;
		if n == 0 {
			break;
		}
		total += n;
	}
	Ok(total)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::OsRng;
	use std::io::Cursor;

	fn random_key() -> Key {
		Key::from_rng(&mut OsRng)
	}

	#[test]
	fn block_encrypt_decrypt_round_trip() {
		let round_key = RoundKey::expand(&random_key());
		let plain = [7u8; BLOCK_SIZE];

		let cipher = encrypt_block(&round_key, &plain);
		assert_ne!(cipher, plain);
		assert_eq!(decrypt_block(&round_key, &cipher), plain);
	}

	#[test]
	fn ofb_fixed_iv_is_self_inverse() {
		let round_key = RoundKey::expand(&random_key());
		let plain = *b"0123456789abcdef0123456789abcde";

		let wrapped = ofb_fixed_iv(&round_key, &plain);
		assert_ne!(wrapped, plain);

		let unwrapped = ofb_fixed_iv(&round_key, &wrapped);
		assert_eq!(unwrapped, plain);
	}

	#[test]
	fn ofb_stream_round_trips_non_aligned_length() {
		let round_key = RoundKey::expand(&random_key());
		let iv = [3u8; BLOCK_SIZE];
		let plaintext = b"the quick brown fox jumps over the lazy dog";

		let mut ciphertext = Vec::new();
		encrypt_ofb_stream(&round_key, &iv, Cursor::new(plaintext), &mut ciphertext).unwrap();
		assert_eq!(ciphertext.len(), plaintext.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE);

		let mut recovered = Vec::new();
		decrypt_ofb_stream(&round_key, &iv, Cursor::new(&ciphertext), &mut recovered).unwrap();
		assert_eq!(&recovered[..plaintext.len()], &plaintext[..]);
		assert!(recovered[plaintext.len()..].iter().all(|&b| b == 0));
	}

	#[test]
	fn different_iv_gives_different_ciphertext() {
		let round_key = RoundKey::expand(&random_key());
		let plaintext = b"identical plaintext, different IV";

		let mut c1 = Vec::new();
		encrypt_ofb_stream(&round_key, &[1; BLOCK_SIZE], Cursor::new(plaintext), &mut c1).unwrap();
		let mut c2 = Vec::new();
		encrypt_ofb_stream(&round_key, &[2; BLOCK_SIZE], Cursor::new(plaintext), &mut c2).unwrap();

		assert_ne!(c1, c2);
	}

	#[test]
	fn imit_detects_any_bit_flip() {
		let round_key = RoundKey::expand(&random_key());
		let data = b"protect me end to end".to_vec();

		let tag = qalqan_imit_bytes(&round_key, &data);

		for i in 0..data.len() {
			let mut corrupted = data.clone();
			corrupted[i] ^= 1;
			assert_ne!(qalqan_imit_bytes(&round_key, &corrupted), tag);
		}
	}

	#[test]
	fn imit_is_keyed() {
		let data = b"same message, different keys".to_vec();
		let tag1 = qalqan_imit_bytes(&RoundKey::expand(&random_key()), &data);
		let tag2 = qalqan_imit_bytes(&RoundKey::expand(&random_key()), &data);

		assert_ne!(tag1, tag2);
	}
}

//! The encrypted-file envelope — service header, metadata integrity tag,
//! OFB payload, file-level integrity tag.

use crate::errors::VaultError;
use crate::selector::KeyType;
use crate::vault::{decode_session_index, encode_session_index, Flavour, Vault};
use qalqancrypto::{decrypt_ofb_stream, encrypt_ofb_stream, qalqan_imit_bytes, BLOCK_SIZE};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::{Cursor, Read, Write};
use subtle::ConstantTimeEq;

pub const HEADER_LEN: usize = 16;
pub const MAC_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const ENVELOPE_OVERHEAD: usize = HEADER_LEN + MAC_LEN + IV_LEN + MAC_LEN; // 64
pub const MAX_PLAINTEXT_LEN: u64 = 2 * (1 << 30);

/// File-type tag carried in the service header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
	Generic,
	Audio,
	Text,
	Video,
	Photo,
}

impl FileType {
	fn code(self) -> u8 {
		match self {
			FileType::Generic => 0x00,
			FileType::Audio => 0x55,
			FileType::Text => 0x66,
			FileType::Video => 0x77,
			FileType::Photo => 0x88,
		}
	}

	fn from_code(code: u8) -> FileType {
		match code {
			0x55 => FileType::Audio,
			0x66 => FileType::Text,
			0x77 => FileType::Video,
			0x88 => FileType::Photo,
			_ => FileType::Generic,
		}
	}

	/// Extension used when restoring a single-file name that arrived
	/// without one.
	pub fn default_extension(self) -> &'static str {
		match self {
			FileType::Generic => "bin",
			FileType::Audio => "mp3",
			FileType::Text => "txt",
			FileType::Video => "mp4",
			FileType::Photo => "jpg",
		}
	}
}

struct ServiceHeader {
	owner: u8,
	file_type: FileType,
	key_type: KeyType,
	circle_idx: u8,
	session_idx: u16,
	is_archive: bool,
}

impl ServiceHeader {
	fn encode(&self) -> [u8; HEADER_LEN] {
		let mut s = [0u8; HEADER_LEN];
		s[0] = 0x00;
		s[1] = self.owner;
		s[2] = 0x04;
		s[3] = 0x20;
		s[4] = self.file_type.code();
		s[5] = match self.key_type {
			KeyType::Circle => 0x00,
			KeyType::Session => 0x01,
		};
		s[6] = self.circle_idx;
		let idx_bytes = encode_session_index(self.session_idx);
		s[7] = idx_bytes[0];
		s[8] = idx_bytes[1];
		s[9] = if self.is_archive { 0x88 } else { 0x00 };
		s
	}

	fn decode(bytes: &[u8]) -> ServiceHeader {
		debug_assert_eq!(bytes.len(), HEADER_LEN);
		let key_type = if bytes[5] == 0x01 { KeyType::Session } else { KeyType::Circle };
		let session_idx = decode_session_index(bytes[7], bytes[8]).unwrap_or(0);

		ServiceHeader {
			owner: bytes[1],
			file_type: FileType::from_code(bytes[4]),
			key_type,
			circle_idx: bytes[6],
			session_idx,
			is_archive: bytes[9] == 0x88,
		}
	}
}

pub struct EncryptRequest {
	pub owner: u8,
	pub target_user: usize,
	pub prefer_session: bool,
	pub file_type: FileType,
	pub is_archive: bool,
	pub plaintext_len: u64,
}

pub struct DecryptedFile {
	pub owner: u8,
	pub file_type: FileType,
	pub is_archive: bool,
	pub plaintext: Vec<u8>,
}

/// The encryption pipeline: pick a key, draw an IV, MAC the header, stream
/// the payload through OFB, then MAC the whole envelope.
pub fn encrypt<R: Read>(vault: &mut Vault, request: EncryptRequest, reader: R) -> Result<Vec<u8>, VaultError> {
	if request.plaintext_len > MAX_PLAINTEXT_LEN {
		return Err(VaultError::FileTooLarge);
	}

	let choice = vault.pick_for_encrypt(request.target_user, request.prefer_session)?;

	let mut iv = [0u8; IV_LEN];
	OsRng.fill_bytes(&mut iv);

	let header = ServiceHeader {
		owner: request.owner,
		file_type: request.file_type,
		key_type: choice.key_type,
		circle_idx: choice.circle_idx,
		session_idx: choice.session_idx,
		is_archive: request.is_archive,
	};
	let s = header.encode();
	let mac_meta = qalqan_imit_bytes(&vault.rimitkey, &s);

	let mut ciphertext = Vec::new();
	let block_iv: [u8; BLOCK_SIZE] = iv;
	encrypt_ofb_stream(&choice.round_key, &block_iv, reader, &mut ciphertext)?;

	let mut body = Vec::with_capacity(HEADER_LEN + MAC_LEN + IV_LEN + ciphertext.len());
	body.extend_from_slice(&s);
	body.extend_from_slice(&mac_meta[..]);
	body.extend_from_slice(&iv);
	body.extend_from_slice(&ciphertext);

	let mac_file = qalqan_imit_bytes(&vault.rimitkey, &body);
	body.extend_from_slice(&mac_file[..]);

	Ok(body)
}

/// The decryption pipeline. Both integrity tags are checked before
/// anything is decrypted or unpacked — a failure here never emits
/// plaintext.
pub fn decrypt(vault: &mut Vault, envelope: &[u8]) -> Result<DecryptedFile, VaultError> {
	if envelope.len() < 3 * BLOCK_SIZE {
		return Err(VaultError::CipherTextTruncated);
	}

	let (body, mac_file_stored) = envelope.split_at(envelope.len() - MAC_LEN);
	let mac_file_computed = qalqan_imit_bytes(&vault.rimitkey, body);
	if !bool::from(mac_file_computed.ct_eq(&qalqancrypto::MacTag(mac_file_stored.try_into().expect("16 bytes")))) {
		return Err(VaultError::FileIntegrity);
	}

	let s = &envelope[0..HEADER_LEN];
	let mac_meta_stored = &envelope[HEADER_LEN..HEADER_LEN + MAC_LEN];
	let mac_meta_computed = qalqan_imit_bytes(&vault.rimitkey, s);
	if !bool::from(mac_meta_computed.ct_eq(&qalqancrypto::MacTag(mac_meta_stored.try_into().expect("16 bytes")))) {
		return Err(VaultError::MetaIntegrity);
	}

	let header = ServiceHeader::decode(s);

	if vault.flavour() == Flavour::Center && header.owner == 0x33 {
		return Err(VaultError::CenterSelfDecrypt);
	}

	let iv_start = HEADER_LEN + MAC_LEN;
	let iv_end = iv_start + IV_LEN;
	let iv: [u8; BLOCK_SIZE] = envelope[iv_start..iv_end].try_into().expect("16 bytes");
	let ciphertext = &envelope[iv_end..envelope.len() - MAC_LEN];
	if ciphertext.len() % BLOCK_SIZE != 0 {
		return Err(VaultError::CipherTextTruncated);
	}

	let round_key = vault.pick_for_decrypt(header.owner, header.key_type, header.circle_idx, header.session_idx)?;

	let mut plaintext = Vec::with_capacity(ciphertext.len());
	decrypt_ofb_stream(&round_key, &iv, Cursor::new(ciphertext), &mut plaintext)?;

	Ok(DecryptedFile { owner: header.owner, file_type: header.file_type, is_archive: header.is_archive, plaintext })
}

/// Convenience wrapper matching `EncryptOFB_File`'s streaming shape, used
/// when the caller already has a concrete `Write` target instead of
/// wanting the envelope back as a `Vec`.
pub fn encrypt_to_writer<R: Read, W: Write>(vault: &mut Vault, request: EncryptRequest, reader: R, mut writer: W) -> Result<(), VaultError> {
	let envelope = encrypt(vault, request, reader)?;
	writer.write_all(&envelope)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vault::format_test_support::{build_center_vault_bytes, build_user_vault_bytes};
	use std::path::PathBuf;

	fn load(password: &[u8], n_in: u16, n_out: u16) -> Vault {
		let raw = build_user_vault_bytes(password, n_in, n_out);
		Vault::from_raw_for_test(raw, PathBuf::from("abc.bin"), Flavour::User, password).unwrap()
	}

	fn load_center(password: &[u8], users: u16, n_in: u16, n_out: u16) -> Vault {
		let raw = build_center_vault_bytes(password, users, n_in, n_out);
		Vault::from_raw_for_test(raw, PathBuf::from("center.bin"), Flavour::Center, password).unwrap()
	}

	#[test]
	fn session_round_trips() {
		// A user vault's own OUT/IN slots aren't paired with each other (each
		// is independently keyed); the matching key lives on the
		// counterparty's vault, so the encryptor here is the center side and
		// the decryptor is the user side, same as `center_self_decrypt_refused`.
		let mut encryptor = load_center(b"hunter2", 1, 3, 3);
		let plaintext = b"hello".to_vec();
		let request = EncryptRequest { owner: 0x33, target_user: 0, prefer_session: true, file_type: FileType::Text, is_archive: false, plaintext_len: plaintext.len() as u64 };
		let envelope = encrypt(&mut encryptor, request, Cursor::new(&plaintext)).unwrap();

		assert_eq!(envelope[5], 0x01);
		assert_eq!(&envelope[7..9], &[0x00, 0x01]);
		assert!(encryptor.session_out[0][0].is_zero());

		let mut decryptor = load(b"hunter2", 3, 3);
		let recovered = decrypt(&mut decryptor, &envelope).unwrap();
		assert_eq!(&recovered.plaintext[..plaintext.len()], &plaintext[..]);
		assert!(decryptor.session_in[0][0].is_zero());
	}

	#[test]
	fn circle_round_trips_without_consuming() {
		let mut vault = load(b"hunter2", 0, 0);
		let plaintext = b"circle payload".to_vec();
		let request = EncryptRequest { owner: 1, target_user: 0, prefer_session: false, file_type: FileType::Generic, is_archive: false, plaintext_len: plaintext.len() as u64 };
		let envelope = encrypt(&mut vault, request, Cursor::new(&plaintext)).unwrap();

		let recovered = decrypt(&mut vault, &envelope).unwrap();
		assert_eq!(&recovered.plaintext[..plaintext.len()], &plaintext[..]);
	}

	#[test]
	fn bit_flip_is_detected() {
		let mut vault = load(b"hunter2", 1, 1);
		let plaintext = b"hello".to_vec();
		let request = EncryptRequest { owner: 1, target_user: 0, prefer_session: true, file_type: FileType::Generic, is_archive: false, plaintext_len: plaintext.len() as u64 };
		let mut envelope = encrypt(&mut vault, request, Cursor::new(&plaintext)).unwrap();

		let last = envelope.len() - 1;
		envelope[last] ^= 1;

		let mut decryptor = load(b"hunter2", 1, 1);
		assert!(matches!(decrypt(&mut decryptor, &envelope).unwrap_err(), VaultError::FileIntegrity));
	}

	#[test]
	fn too_large_plaintext_rejected_before_io() {
		let mut vault = load(b"hunter2", 1, 1);
		let request = EncryptRequest { owner: 1, target_user: 0, prefer_session: true, file_type: FileType::Generic, is_archive: false, plaintext_len: MAX_PLAINTEXT_LEN + 1 };
		let err = encrypt(&mut vault, request, Cursor::new(&[])).unwrap_err();
		assert!(matches!(err, VaultError::FileTooLarge));
	}

	#[test]
	fn center_self_decrypt_refused() {
		// A file encrypted at the center carries owner byte 0x33 in its
		// header. The center must refuse to decrypt its own output; only the
		// matching user vault can recover it.
		let mut center = load_center(b"hunter2", 1, 2, 2);
		let plaintext = b"center outbound".to_vec();
		let request = EncryptRequest { owner: 0x33, target_user: 0, prefer_session: true, file_type: FileType::Generic, is_archive: false, plaintext_len: plaintext.len() as u64 };
		let envelope = encrypt(&mut center, request, Cursor::new(&plaintext)).unwrap();
		assert_eq!(envelope[1], 0x33);

		assert!(matches!(decrypt(&mut center, &envelope).unwrap_err(), VaultError::CenterSelfDecrypt));

		let mut user = load(b"hunter2", 2, 2);
		let recovered = decrypt(&mut user, &envelope).unwrap();
		assert_eq!(&recovered.plaintext[..plaintext.len()], &plaintext[..]);
	}
}

//! Cryptography primitives for the Qalqan file-encryption core.
//!
//! This crate implements the opaque block-cipher/OFB/MAC primitives and the
//! password KDF. It has no knowledge of the vault file format or the
//! encrypted-file container; those live in `qalqanvault`.

#[macro_use]
mod newtype_macros;
mod cipher;
mod error;
mod kdf;

pub use cipher::{decrypt_block, encrypt_block, encrypt_ofb_stream, decrypt_ofb_stream, ofb_fixed_iv, qalqan_imit, qalqan_imit_bytes, Key, MacTag, RoundKey, BLOCK_SIZE, KEY_SIZE};
pub use error::CryptoError;
pub use kdf::derive_password_key;

//! The multi-file archive payload nested inside a single encrypted file.
//!
//! Packing concatenates named files into one plaintext stream; unpacking
//! reverses that, sanitizing names and de-duplicating against whatever is
//! already at the destination.

use crate::errors::VaultError;
use byteorder::{BigEndian, ByteOrder};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"QPKG";
const VERSION: u32 = 1;
const PREAMBLE_LEN: u64 = 4 + 4 + 4;

/// One file to be packed: its (already base-name-only) name, declared size,
/// and a reader over its contents.
pub struct PackEntry<R> {
	pub name: String,
	pub size: u64,
	pub data: R,
}

/// The pre-computed plaintext length the OFB driver and the size-limit
/// check need, without ever materializing the concatenation.
pub fn plaintext_len(entries: &[(String, u64)]) -> u64 {
	let mut total = PREAMBLE_LEN;
	for (name, size) in entries {
		total += 2 + name.len() as u64 + 8 + size;
	}
	total
}

/// Streams the QPKG preamble followed by each entry's `{nameLen, name, size,
/// data}` record, pulling file contents through without buffering the
/// concatenation in memory.
pub struct Packer<R> {
	entries: std::vec::IntoIter<PackEntry<R>>,
	pending: Cursor<Vec<u8>>,
	current: Option<R>,
}

impl<R: Read> Packer<R> {
	pub fn new(entries: Vec<PackEntry<R>>) -> Packer<R> {
		let mut preamble = Vec::with_capacity(PREAMBLE_LEN as usize);
		preamble.extend_from_slice(MAGIC);
		let mut word = [0u8; 4];
		BigEndian::write_u32(&mut word, VERSION);
		preamble.extend_from_slice(&word);
		BigEndian::write_u32(&mut word, entries.len() as u32);
		preamble.extend_from_slice(&word);

		Packer { entries: entries.into_iter(), pending: Cursor::new(preamble), current: None }
	}
}

impl<R: Read> Read for Packer<R> {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		loop {
			if (self.pending.position() as usize) < self.pending.get_ref().len() {
				return self.pending.read(buf);
			}

			if let Some(reader) = &mut self.current {
				let n = reader.read(buf)?;
				if n > 0 {
					return Ok(n);
				}
				self.current = None;
				continue;
			}

			match self.entries.next() {
				Some(entry) => {
					let mut header = Vec::with_capacity(2 + entry.name.len() + 8);
					let mut name_len = [0u8; 2];
					BigEndian::write_u16(&mut name_len, entry.name.len() as u16);
					header.extend_from_slice(&name_len);
					header.extend_from_slice(entry.name.as_bytes());
					let mut size = [0u8; 8];
					BigEndian::write_u64(&mut size, entry.size);
					header.extend_from_slice(&size);

					self.pending = Cursor::new(header);
					self.current = Some(entry.data);
				}
				None => return Ok(0),
			}
		}
	}
}

/// A file recovered from an archive payload, with its name already
/// sanitized (but not yet de-duplicated against a destination directory).
pub struct UnpackedEntry {
	pub name: String,
	pub data: Vec<u8>,
}

/// Parses a fully-buffered archive plaintext into its component files.
/// Validates the magic and version up front, rejects malformed name
/// lengths, and truncates each entry's data at its declared size rather
/// than trusting whatever bytes happen to follow.
pub fn unpack(plaintext: &[u8]) -> Result<Vec<UnpackedEntry>, VaultError> {
	let mut cursor = plaintext;

	let magic = take(&mut cursor, 4).ok_or(VaultError::ArchiveMagic)?;
	if magic != MAGIC {
		return Err(VaultError::ArchiveMagic);
	}

	let version = BigEndian::read_u32(take(&mut cursor, 4).ok_or(VaultError::ArchiveVersion)?);
	if version != VERSION {
		return Err(VaultError::ArchiveVersion);
	}

	let count = BigEndian::read_u32(take(&mut cursor, 4).ok_or(VaultError::ArchiveMagic)?) as usize;

	let mut entries = Vec::with_capacity(count);
	for _ in 0..count {
		let name_len = BigEndian::read_u16(take(&mut cursor, 2).ok_or(VaultError::ArchiveNameInvalid)?) as usize;
		if name_len == 0 {
			return Err(VaultError::ArchiveNameInvalid);
		}

		let raw_name = take(&mut cursor, name_len).ok_or(VaultError::ArchiveNameInvalid)?;
		let name = sanitize_name(raw_name);

		let size = BigEndian::read_u64(take(&mut cursor, 8).ok_or(VaultError::ArchiveNameInvalid)?);
		let size = usize::try_from(size).map_err(|_| VaultError::ArchiveNameInvalid)?;
		let data = take(&mut cursor, size).ok_or(VaultError::ArchiveNameInvalid)?.to_vec();

		entries.push(UnpackedEntry { name, data });
	}

	Ok(entries)
}

fn take<'a>(cursor: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
	if cursor.len() < n {
		return None;
	}
	let (head, tail) = cursor.split_at(n);
	*cursor = tail;
	Some(head)
}

/// Strips any path components from an archived name and replaces
/// `<>:"/\|?*` and control characters with `_`.
fn sanitize_name(raw: &[u8]) -> String {
	let lossy = String::from_utf8_lossy(raw).into_owned();
	let base = Path::new(&lossy).file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

	let forbidden = "<>:\"/\\|?*";
	let cleaned: String = base.chars().map(|c| if c.is_control() || forbidden.contains(c) { '_' } else { c }).collect();

	if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
		"file".to_string()
	} else {
		cleaned
	}
}

/// Writes every unpacked entry under `dest`, appending `_1`, `_2`, … before
/// the extension whenever a name collides with something already there.
pub fn write_entries(entries: &[UnpackedEntry], dest: &Path) -> Result<Vec<PathBuf>, VaultError> {
	let mut written = Vec::with_capacity(entries.len());
	for entry in entries {
		let path = unique_path(dest, &entry.name);
		std::fs::write(&path, &entry.data)?;
		written.push(path);
	}
	Ok(written)
}

fn unique_path(dest: &Path, name: &str) -> PathBuf {
	let candidate = dest.join(name);
	if !candidate.exists() {
		return candidate;
	}

	let path = Path::new(name);
	let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| name.to_string());
	let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

	for n in 1.. {
		let candidate_name = match &ext {
			Some(ext) => format!("{stem}_{n}.{ext}"),
			None => format!("{stem}_{n}"),
		};
		let candidate = dest.join(candidate_name);
		if !candidate.exists() {
			return candidate;
		}
	}
	unreachable!("infinite suffix range")
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor as IoCursor;

	fn pack_to_vec(entries: Vec<PackEntry<IoCursor<Vec<u8>>>>) -> Vec<u8> {
		let mut packer = Packer::new(entries);
		let mut out = Vec::new();
		packer.read_to_end(&mut out).unwrap();
		out
	}

	#[test]
	fn pack_then_unpack_round_trips() {
		let entries = vec![
			PackEntry { name: "a.txt".into(), size: 1, data: IoCursor::new(b"A".to_vec()) },
			PackEntry { name: "b.bin".into(), size: 3, data: IoCursor::new(vec![1, 2, 3]) },
			PackEntry { name: "d.png".into(), size: 4, data: IoCursor::new(vec![9, 9, 9, 9]) },
		];
		let packed = pack_to_vec(entries);

		let unpacked = unpack(&packed).unwrap();
		assert_eq!(unpacked.len(), 3);
		assert_eq!(unpacked[0].name, "a.txt");
		assert_eq!(unpacked[0].data, b"A");
		assert_eq!(unpacked[1].name, "b.bin");
		assert_eq!(unpacked[1].data, vec![1, 2, 3]);
		assert_eq!(unpacked[2].name, "d.png");
		assert_eq!(unpacked[2].data, vec![9, 9, 9, 9]);
	}

	#[test]
	fn plaintext_len_matches_packed_output() {
		let meta = vec![("a.txt".to_string(), 1u64), ("b.bin".to_string(), 3u64)];
		let entries = vec![
			PackEntry { name: "a.txt".into(), size: 1, data: IoCursor::new(b"A".to_vec()) },
			PackEntry { name: "b.bin".into(), size: 3, data: IoCursor::new(vec![1, 2, 3]) },
		];
		let packed = pack_to_vec(entries);
		assert_eq!(packed.len() as u64, plaintext_len(&meta));
	}

	#[test]
	fn rejects_bad_magic() {
		assert!(matches!(unpack(b"NOPE0000").unwrap_err(), VaultError::ArchiveMagic));
	}

	#[test]
	fn rejects_unsupported_version() {
		let mut bad = Vec::new();
		bad.extend_from_slice(MAGIC);
		bad.extend_from_slice(&2u32.to_be_bytes());
		bad.extend_from_slice(&0u32.to_be_bytes());
		assert!(matches!(unpack(&bad).unwrap_err(), VaultError::ArchiveVersion));
	}

	#[test]
	fn rejects_zero_length_name() {
		let mut bad = Vec::new();
		bad.extend_from_slice(MAGIC);
		bad.extend_from_slice(&1u32.to_be_bytes());
		bad.extend_from_slice(&1u32.to_be_bytes());
		bad.extend_from_slice(&0u16.to_be_bytes());
		assert!(matches!(unpack(&bad).unwrap_err(), VaultError::ArchiveNameInvalid));
	}

	#[test]
	fn sanitizes_path_components_and_forbidden_characters() {
		let entries = vec![PackEntry { name: "c/d.png".into(), size: 0, data: IoCursor::new(Vec::new()) }];
		let packed = pack_to_vec(entries);
		let unpacked = unpack(&packed).unwrap();
		assert_eq!(unpacked[0].name, "d.png");
	}

	#[test]
	fn truncates_at_declared_size_ignoring_trailing_bytes() {
		let mut buf = Vec::new();
		buf.extend_from_slice(MAGIC);
		buf.extend_from_slice(&1u32.to_be_bytes());
		buf.extend_from_slice(&1u32.to_be_bytes());
		buf.extend_from_slice(&5u16.to_be_bytes());
		buf.extend_from_slice(b"a.txt");
		buf.extend_from_slice(&3u64.to_be_bytes());
		buf.extend_from_slice(b"ABCDEFGH"); // 8 bytes follow, only 3 declared

		let unpacked = unpack(&buf).unwrap();
		assert_eq!(unpacked[0].data, b"ABC");
	}

	#[test]
	fn write_entries_deduplicates_existing_names() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("d.png"), b"existing").unwrap();

		let entries = vec![UnpackedEntry { name: "d.png".to_string(), data: vec![1, 2, 3] }];
		let written = write_entries(&entries, dir.path()).unwrap();

		assert_eq!(written[0].file_name().unwrap().to_str().unwrap(), "d_1.png");
		assert_eq!(std::fs::read(&written[0]).unwrap(), vec![1, 2, 3]);
	}
}

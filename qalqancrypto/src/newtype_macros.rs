/*
Copied and modified from github.com/dnaq/sodiumoxide

Copyright (c) 2013 Daniel Ashhami

Permission is hereby granted, free of charge, to any person obtaining
a copy of this software and associated documentation files (the
"Software"), to deal in the Software without restriction, including
without limitation the rights to use, copy, modify, merge, publish,
distribute, sublicense, and/or sell copies of the Software, and to
permit persons to whom the Software is furnished to do so, subject to
the following conditions:

The above copyright notice and this permission notice shall be
included in all copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE
LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION
OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION
WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

*/


macro_rules! newtype_clone (($newtype:ident) => (
		#[allow(clippy::non_canonical_clone_impl)]
		impl Clone for $newtype {
			fn clone(&self) -> $newtype {
				*self
			}
		}
		));

macro_rules! newtype_from_slice (($newtype:ident, $len:expr) => (
	/// `from_slice()` creates an object from a byte slice.
	///
	/// Fails and returns `None` if the length of the slice isn't `$len`.
	pub fn from_slice(bs: &[u8]) -> Option<$newtype> {
		if bs.len() != $len {
			return None;
		}
		let mut n = $newtype([0; $len]);
		{
			let $newtype(ref mut b) = n;
			b.copy_from_slice(bs);
		}
		Some(n)
	}

	pub fn from_rng<R: ::rand::Rng + ?Sized>(rng: &mut R) -> $newtype {
		let mut n = $newtype([0; $len]);
		{
			let $newtype(ref mut b) = n;
			rng.fill_bytes(b);
		}
		n
	}

	pub fn to_hex(&self) -> String {
		use ::data_encoding::HEXLOWER_PERMISSIVE;
		HEXLOWER_PERMISSIVE.encode(&self[..])
	}
));

macro_rules! newtype_traits (($newtype:ident, $len:expr) => (
	impl ::rand::distributions::Distribution<$newtype> for ::rand::distributions::Standard {
		fn sample<R: ::rand::Rng + ?Sized>(&self, rng: &mut R) -> $newtype {
			$newtype::from_rng(rng)
		}
	}

	impl ::subtle::ConstantTimeEq for $newtype {
		fn ct_eq(&self, other: &Self) -> ::subtle::Choice {
			let &$newtype(ref v) = self;
			let &$newtype(ref o) = other;
			v.ct_eq(o)
		}
	}

	impl ::std::cmp::PartialEq for $newtype {
		fn eq(&self, other: &Self) -> bool {
			use ::subtle::ConstantTimeEq;

			self.ct_eq(other).into()
		}
	}

	impl ::std::cmp::Eq for $newtype {}

	impl ::serde::Serialize for $newtype {
		fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
			where S: ::serde::Serializer
		{
			use ::data_encoding::HEXLOWER_PERMISSIVE;
			serializer.serialize_str(&HEXLOWER_PERMISSIVE.encode(&self[..]))
		}
	}

	impl<'de> ::serde::Deserialize<'de> for $newtype {
		fn deserialize<D>(deserializer: D) -> Result<$newtype, D::Error>
			where D: ::serde::Deserializer<'de>
		{
			struct NewtypeVisitor;
			impl<'de> ::serde::de::Visitor<'de> for NewtypeVisitor {
				type Value = $newtype;
				fn expecting(&self, formatter: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
					write!(formatter, stringify!($newtype))
				}

				fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
					where E: ::serde::de::Error
				{
					use ::data_encoding::HEXLOWER_PERMISSIVE;
					let slice = HEXLOWER_PERMISSIVE.decode(v.as_bytes()).map_err(::serde::de::Error::custom)?;
					$newtype::from_slice(&slice).ok_or_else(|| ::serde::de::Error::invalid_length(slice.len(), &self))
				}
			}
			deserializer.deserialize_str(NewtypeVisitor)
		}
	}

	/// Access the byte contents as a slice.
	///
	/// WARNING: comparing objects via `x[a..b] == y[a..b]` opens up timing
	/// attacks. Use the `PartialEq`/`ConstantTimeEq` impls instead.
	impl ::std::ops::Index<::std::ops::Range<usize>> for $newtype {
		type Output = [u8];
		fn index(&self, index: ::std::ops::Range<usize>) -> &[u8] {
			let &$newtype(ref b) = self;
			&b[index]
		}
	}
	impl ::std::ops::Index<::std::ops::RangeTo<usize>> for $newtype {
		type Output = [u8];
		fn index(&self, index: ::std::ops::RangeTo<usize>) -> &[u8] {
			let &$newtype(ref b) = self;
			&b[index]
		}
	}
	impl ::std::ops::Index<::std::ops::RangeFrom<usize>> for $newtype {
		type Output = [u8];
		fn index(&self, index: ::std::ops::RangeFrom<usize>) -> &[u8] {
			let &$newtype(ref b) = self;
			&b[index]
		}
	}
	impl ::std::ops::Index<::std::ops::RangeFull> for $newtype {
		type Output = [u8];
		fn index(&self, index: ::std::ops::RangeFull) -> &[u8] {
			let &$newtype(ref b) = self;
			&b[index]
		}
	}
	impl ::std::fmt::Debug for $newtype {
		fn fmt(&self, formatter: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
			write!(formatter, "{}({:?})", stringify!($newtype), &self[..])
		}
	}
	));

macro_rules! public_newtype_traits (($newtype:ident) => (
	impl AsRef<[u8]> for $newtype {
		#[inline]
		fn as_ref(&self) -> &[u8] {
			&self[..]
		}
	}
	impl ::std::cmp::PartialOrd for $newtype {
		#[inline]
		fn partial_cmp(&self, other: &$newtype) -> Option<::std::cmp::Ordering> {
			Some(self.cmp(other))
		}
	}
	impl ::std::cmp::Ord for $newtype {
		#[inline]
		fn cmp(&self, other: &$newtype) -> ::std::cmp::Ordering {
			::std::cmp::Ord::cmp(self.as_ref(), other.as_ref())
		}
	}
	impl ::std::hash::Hash for $newtype {
		fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) {
			::std::hash::Hash::hash(self.as_ref(), state)
		}
	}
	));

/// Generates a fixed-size byte-array newtype.
///
/// `secret` types zero their backing buffer on drop (via `zeroize`) and are
/// never `Copy`, so a key can't be silently duplicated and outlive a
/// `zeroize`. `public` types are ordinary `Copy` values (MAC tags, IVs,
/// indices) with no zeroing.
macro_rules! new_type {
	( $(#[$meta:meta])*
	  secret $name:ident($bytes:expr);
	  ) => (
		$(#[$meta])*
		#[must_use]
		pub struct $name(pub [u8; $bytes]);
		impl Clone for $name {
			fn clone(&self) -> $name {
				let &$name(v) = self;
				$name(v)
			}
		}
		newtype_traits!($name, $bytes);
		impl $name {
			newtype_from_slice!($name, $bytes);

			pub fn zero() -> $name {
				$name([0; $bytes])
			}

			pub fn is_zero(&self) -> bool {
				use ::subtle::ConstantTimeEq;
				self.0.ct_eq(&[0; $bytes]).into()
			}
		}
		impl ::zeroize::Zeroize for $name {
			fn zeroize(&mut self) {
				self.0.zeroize();
			}
		}
		impl Drop for $name {
			fn drop(&mut self) {
				use ::zeroize::Zeroize;
				self.zeroize();
			}
		}
		);
	( $(#[$meta:meta])*
	  public $name:ident($bytes:expr);
	  ) => (
		$(#[$meta])*
		#[derive(Copy)]
		#[must_use]
		pub struct $name(pub [u8; $bytes]);
		newtype_clone!($name);
		newtype_traits!($name, $bytes);
		public_newtype_traits!($name);
		impl $name {
			newtype_from_slice!($name, $bytes);
		}
		);
}

/**********************************************************************

Copyright (C) 2021 by reddal

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.

**********************************************************************/

//! AEAD ciphers backed by `ring`.
//!
//! Nonces are little-endian counters starting at zero.

use crate::prelude::BoxStdErr;
use ring::aead::{
	Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_128_GCM,
	AES_256_GCM, CHACHA20_POLY1305,
};

pub const TAG_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Algorithm {
	Aes128Gcm,
	Aes256Gcm,
	ChaCha20Poly1305,
}

impl Algorithm {
	#[inline]
	#[must_use]
	pub fn key_len(self) -> usize {
		match self {
			Self::Aes128Gcm => 16,
			Self::Aes256Gcm | Self::ChaCha20Poly1305 => 32,
		}
	}

	fn ring_algo(self) -> &'static ring::aead::Algorithm {
		match self {
			Self::Aes128Gcm => &AES_128_GCM,
			Self::Aes256Gcm => &AES_256_GCM,
			Self::ChaCha20Poly1305 => &CHACHA20_POLY1305,
		}
	}
}

/// Treats the nonce as a little-endian integer, increasing it by 1 every time.
#[derive(Default)]
pub struct CounterNonce([u8; NONCE_LEN]);

impl CounterNonce {
	pub fn increase(nonce: &mut [u8; NONCE_LEN]) {
		for i in nonce {
			if *i == u8::MAX {
				*i = 0;
			} else {
				*i += 1;
				return;
			}
		}
	}
}

impl NonceSequence for CounterNonce {
	fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
		let val = self.0;
		Self::increase(&mut self.0);
		Ok(Nonce::assume_unique_for_key(val))
	}
}

fn unbound_key(algo: Algorithm, key: &[u8]) -> Result<UnboundKey, BoxStdErr> {
	UnboundKey::new(algo.ring_algo(), key)
		.map_err(|_| format!("invalid key length {} for {:?}", key.len(), algo).into())
}

pub struct Encryptor {
	key: SealingKey<CounterNonce>,
}

impl Encryptor {
	/// # Errors
	///
	/// Returns an error if `key` has the wrong length.
	pub fn new(algo: Algorithm, key: &[u8]) -> Result<Self, BoxStdErr> {
		Ok(Self {
			key: SealingKey::new(unbound_key(algo, key)?, CounterNonce::default()),
		})
	}

	/// Encrypt `buf[start..]` in place and append the tag.
	///
	/// # Errors
	///
	/// Returns an error if the nonce sequence is exhausted.
	pub fn seal_inplace_append_tag(
		&mut self,
		start: usize,
		buf: &mut Vec<u8>,
	) -> Result<(), BoxStdErr> {
		let tag = self
			.key
			.seal_in_place_separate_tag(Aad::empty(), &mut buf[start..])
			.map_err(|_| "cannot seal AEAD plaintext")?;
		buf.extend_from_slice(tag.as_ref());
		Ok(())
	}
}

pub struct Decryptor {
	key: OpeningKey<CounterNonce>,
}

impl Decryptor {
	/// # Errors
	///
	/// Returns an error if `key` has the wrong length.
	pub fn new(algo: Algorithm, key: &[u8]) -> Result<Self, BoxStdErr> {
		Ok(Self {
			key: OpeningKey::new(unbound_key(algo, key)?, CounterNonce::default()),
		})
	}

	/// Decrypt `buf` (ciphertext with tag) in place, returning the plaintext.
	///
	/// # Errors
	///
	/// Returns an error if the ciphertext cannot be authenticated.
	pub fn open_inplace<'b>(&mut self, buf: &'b mut [u8]) -> Result<&'b mut [u8], BoxStdErr> {
		self.key
			.open_in_place(Aad::empty(), buf)
			.map_err(|_| "cannot open AEAD ciphertext".into())
	}
}

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

//! Stream ciphers (AES-CFB) backed by `aes` and `cfb-mode`.

use crate::prelude::BoxStdErr;
use aes::{
	cipher::{generic_array::GenericArray, BlockEncrypt, NewBlockCipher},
	Aes128, Aes192, Aes256,
};
use cfb_mode::{
	cipher::{AsyncStreamCipher, NewCipher},
	Cfb,
};

pub const IV_LEN: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Algorithm {
	Aes128Cfb,
	Aes192Cfb,
	Aes256Cfb,
}

impl Algorithm {
	#[inline]
	#[must_use]
	pub fn key_len(self) -> usize {
		match self {
			Self::Aes128Cfb => 16,
			Self::Aes192Cfb => 24,
			Self::Aes256Cfb => 32,
		}
	}

	#[inline]
	#[must_use]
	pub fn iv_len(self) -> usize {
		IV_LEN
	}
}

enum Inner {
	Aes128(Cfb<Aes128>),
	Aes192(Cfb<Aes192>),
	Aes256(Cfb<Aes256>),
}

/// Stateful keystream, each call continues where the last one stopped.
pub struct Cipher(Inner);

impl Cipher {
	/// # Errors
	///
	/// Returns an error if the key or IV has the wrong length.
	pub fn new(algo: Algorithm, key: &[u8], iv: &[u8]) -> Result<Self, BoxStdErr> {
		let map_err = |_| -> BoxStdErr {
			format!(
				"invalid key ({} bytes) or iv ({} bytes) for {:?}",
				key.len(),
				iv.len(),
				algo
			)
			.into()
		};
		Ok(Self(match algo {
			Algorithm::Aes128Cfb => Inner::Aes128(Cfb::new_from_slices(key, iv).map_err(map_err)?),
			Algorithm::Aes192Cfb => Inner::Aes192(Cfb::new_from_slices(key, iv).map_err(map_err)?),
			Algorithm::Aes256Cfb => Inner::Aes256(Cfb::new_from_slices(key, iv).map_err(map_err)?),
		}))
	}

	pub fn encrypt(&mut self, buf: &mut [u8]) {
		match &mut self.0 {
			Inner::Aes128(c) => c.encrypt(buf),
			Inner::Aes192(c) => c.encrypt(buf),
			Inner::Aes256(c) => c.encrypt(buf),
		}
	}

	pub fn decrypt(&mut self, buf: &mut [u8]) {
		match &mut self.0 {
			Inner::Aes128(c) => c.decrypt(buf),
			Inner::Aes192(c) => c.decrypt(buf),
			Inner::Aes256(c) => c.decrypt(buf),
		}
	}
}

/// Encrypt a single 16 bytes block with AES-128.
///
/// This is the same as AES-128-CBC with a zero IV on one block.
pub fn aes128_encrypt_block(key: &[u8; 16], block: &mut [u8; 16]) {
	let cipher = Aes128::new(GenericArray::from_slice(key));
	cipher.encrypt_block(GenericArray::from_mut_slice(block));
}

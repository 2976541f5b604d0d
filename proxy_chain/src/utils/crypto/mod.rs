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

pub mod aead;
pub mod stream;

use crate::prelude::BoxStdErr;
use hkdf::Hkdf;
use hmac::{Hmac, Mac, NewMac};
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha224;

pub const MD5_LEN: usize = 16;
pub const SHA1_LEN: usize = 20;

#[inline]
fn to_array<const N: usize>(src: &[u8]) -> [u8; N] {
	let mut out = [0_u8; N];
	out.copy_from_slice(&src[..N]);
	out
}

#[inline]
pub fn md5(data: &[u8]) -> [u8; MD5_LEN] {
	to_array(&Md5::digest(data))
}

#[inline]
pub fn sha1(data: &[u8]) -> [u8; SHA1_LEN] {
	to_array(&Sha1::digest(data))
}

/// Lower case hex of SHA224(`data`), 56 bytes.
#[inline]
pub fn sha224_hex(data: &[u8]) -> String {
	format!("{:056x}", Sha224::digest(data))
}

pub fn hmac_md5(key: &[u8], data: &[&[u8]]) -> [u8; MD5_LEN] {
	// HMAC accepts keys of any length.
	let mut mac = match Hmac::<Md5>::new_from_slice(key) {
		Ok(mac) => mac,
		Err(_) => unreachable!(),
	};
	for d in data {
		mac.update(d);
	}
	to_array(&mac.finalize().into_bytes())
}

pub fn hmac_sha1(key: &[u8], data: &[&[u8]]) -> [u8; SHA1_LEN] {
	let mut mac = match Hmac::<Sha1>::new_from_slice(key) {
		Ok(mac) => mac,
		Err(_) => unreachable!(),
	};
	for d in data {
		mac.update(d);
	}
	to_array(&mac.finalize().into_bytes())
}

/// OpenSSL's `EVP_BytesToKey` with MD5 and a single iteration.
pub fn evp_bytes_to_key(password: &[u8], key_len: usize) -> Vec<u8> {
	let mut result = Vec::with_capacity(key_len + MD5_LEN);
	let mut prev: Option<[u8; MD5_LEN]> = None;
	while result.len() < key_len {
		let mut d = Md5::new();
		if let Some(prev) = &prev {
			d.update(prev);
		}
		d.update(password);
		let digest: [u8; MD5_LEN] = to_array(&d.finalize());
		result.extend_from_slice(&digest);
		prev = Some(digest);
	}
	result.truncate(key_len);
	result
}

/// HKDF-SHA1, filling all of `okm`.
///
/// # Errors
///
/// Returns an error if `okm` is too long for HKDF.
pub fn hkdf_sha1(ikm: &[u8], salt: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), BoxStdErr> {
	Hkdf::<Sha1>::new(Some(salt), ikm)
		.expand(info, okm)
		.map_err(|_| format!("invalid HKDF output length {}", okm.len()).into())
}

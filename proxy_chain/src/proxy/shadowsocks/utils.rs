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

use crate::{
	prelude::*,
	protocol::{socks_addr::ReadError, BytesStream, Error as ProtocolError},
	utils::crypto::{
		aead::{self, Decryptor, Encryptor},
		evp_bytes_to_key, hkdf_sha1,
		stream::{self, IV_LEN},
	},
};
use std::fmt::{self, Display};

const INFO: &[u8] = b"ss-subkey";

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Shadowsocks error ({0})")]
	FailedCrypto(BoxStdErr),
	#[error("Shadowsocks error ({0})")]
	FailedAddressParsing(ReadError),
	#[error("Shadowsocks error (datagram ({0} bytes) too small)")]
	DatagramTooSmall(usize),
	#[error("empty buffer")]
	EmptyBuffer,
}

impl From<ReadError> for Error {
	fn from(e: ReadError) -> Self {
		Error::FailedAddressParsing(e)
	}
}

impl From<Error> for ProtocolError {
	#[inline]
	fn from(e: Error) -> Self {
		ProtocolError::Protocol(e.into())
	}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Method {
	None,
	Aes128Gcm,
	Aes256Gcm,
	Chacha20Poly1305,
	Aes128Cfb,
	Aes192Cfb,
	Aes256Cfb,
}

/// How a [`Method`] transforms bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MethodKind {
	Plain,
	Aead(aead::Algorithm),
	Stream(stream::Algorithm),
}

impl Method {
	#[inline]
	#[must_use]
	pub fn new_from_str(s: &str) -> Option<Self> {
		Some(match s {
			"none" | "dummy" => Method::None,
			"aes-128-gcm" => Method::Aes128Gcm,
			"aes-256-gcm" => Method::Aes256Gcm,
			"chacha20-ietf-poly1305" | "chacha20-poly1305" => Method::Chacha20Poly1305,
			"aes-128-cfb" => Method::Aes128Cfb,
			"aes-192-cfb" => Method::Aes192Cfb,
			"aes-256-cfb" => Method::Aes256Cfb,
			_ => return None,
		})
	}

	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			Method::None => "none",
			Method::Aes128Gcm => "aes-128-gcm",
			Method::Aes256Gcm => "aes-256-gcm",
			Method::Chacha20Poly1305 => "chacha20-ietf-poly1305",
			Method::Aes128Cfb => "aes-128-cfb",
			Method::Aes192Cfb => "aes-192-cfb",
			Method::Aes256Cfb => "aes-256-cfb",
		}
	}

	#[must_use]
	pub fn kind(self) -> MethodKind {
		match self {
			Method::None => MethodKind::Plain,
			Method::Aes128Gcm => MethodKind::Aead(aead::Algorithm::Aes128Gcm),
			Method::Aes256Gcm => MethodKind::Aead(aead::Algorithm::Aes256Gcm),
			Method::Chacha20Poly1305 => MethodKind::Aead(aead::Algorithm::ChaCha20Poly1305),
			Method::Aes128Cfb => MethodKind::Stream(stream::Algorithm::Aes128Cfb),
			Method::Aes192Cfb => MethodKind::Stream(stream::Algorithm::Aes192Cfb),
			Method::Aes256Cfb => MethodKind::Stream(stream::Algorithm::Aes256Cfb),
		}
	}

	#[must_use]
	pub fn key_len(self) -> usize {
		match self.kind() {
			MethodKind::Plain => 0,
			MethodKind::Aead(algo) => algo.key_len(),
			MethodKind::Stream(algo) => algo.key_len(),
		}
	}
}

impl Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// AEAD session key of `salt`, which has the same length as the key.
pub fn session_key(key: &[u8], salt: &[u8]) -> Result<Vec<u8>, Error> {
	let mut okm = vec![0_u8; key.len()];
	hkdf_sha1(key, salt, INFO, &mut okm).map_err(Error::FailedCrypto)?;
	Ok(okm)
}

fn prepend(packet: &mut Vec<u8>, head: &[u8]) {
	let mut out = Vec::with_capacity(head.len() + packet.len() + aead::TAG_LEN);
	out.extend_from_slice(head);
	out.extend_from_slice(packet);
	*packet = out;
}

/// A method together with the key derived from the password.
#[derive(Clone)]
pub struct Cipher {
	method: Method,
	key: Vec<u8>,
}

impl Cipher {
	#[must_use]
	pub fn new(method: Method, password: &str) -> Self {
		Self {
			method,
			key: evp_bytes_to_key(password.as_bytes(), method.key_len()),
		}
	}

	#[inline]
	#[must_use]
	pub fn method(&self) -> Method {
		self.method
	}

	#[inline]
	#[must_use]
	pub fn key(&self) -> &[u8] {
		&self.key
	}

	/// Wrap `stream` into an encrypted stream.
	///
	/// # Errors
	///
	/// Returns an error if the ciphers cannot be created.
	pub fn stream_conn(&self, stream: BytesStream) -> Result<BytesStream, Error> {
		Ok(match self.method.kind() {
			MethodKind::Plain => stream,
			MethodKind::Aead(algo) => super::tcp::new_crypt_stream(stream, algo, &self.key)?,
			MethodKind::Stream(algo) => super::stream::new_crypt_stream(stream, algo, &self.key)?.0,
		})
	}

	/// Encrypt a whole datagram in place.
	///
	/// # Errors
	///
	/// Returns an error if encryption fails.
	pub fn encrypt_packet(&self, packet: &mut Vec<u8>) -> Result<(), Error> {
		match self.method.kind() {
			MethodKind::Plain => {}
			MethodKind::Aead(algo) => {
				let salt_len = algo.key_len();
				let mut salt = vec![0_u8; salt_len];
				rand::thread_rng().fill_bytes(&mut salt);
				let mut enc = Encryptor::new(algo, &session_key(&self.key, &salt)?)
					.map_err(Error::FailedCrypto)?;
				prepend(packet, &salt);
				enc.seal_inplace_append_tag(salt_len, packet)
					.map_err(Error::FailedCrypto)?;
			}
			MethodKind::Stream(algo) => {
				let mut iv = [0_u8; IV_LEN];
				rand::thread_rng().fill_bytes(&mut iv);
				let mut c = stream::Cipher::new(algo, &self.key, &iv).map_err(Error::FailedCrypto)?;
				c.encrypt(packet);
				prepend(packet, &iv);
			}
		}
		Ok(())
	}

	/// Decrypt a whole datagram in place.
	///
	/// # Errors
	///
	/// Returns an error if the datagram is too small or cannot be decrypted.
	pub fn decrypt_packet(&self, packet: &mut Vec<u8>) -> Result<(), Error> {
		match self.method.kind() {
			MethodKind::Plain => {}
			MethodKind::Aead(algo) => {
				let salt_len = algo.key_len();
				if packet.len() < salt_len + aead::TAG_LEN {
					return Err(Error::DatagramTooSmall(packet.len()));
				}
				let mut dec = Decryptor::new(algo, &session_key(&self.key, &packet[..salt_len])?)
					.map_err(Error::FailedCrypto)?;
				let plain_len = dec
					.open_inplace(&mut packet[salt_len..])
					.map_err(Error::FailedCrypto)?
					.len();
				packet.drain(..salt_len);
				packet.truncate(plain_len);
			}
			MethodKind::Stream(algo) => {
				if packet.len() < IV_LEN {
					return Err(Error::DatagramTooSmall(packet.len()));
				}
				let mut c = stream::Cipher::new(algo, &self.key, &packet[..IV_LEN])
					.map_err(Error::FailedCrypto)?;
				c.decrypt(&mut packet[IV_LEN..]);
				packet.drain(..IV_LEN);
			}
		}
		Ok(())
	}
}

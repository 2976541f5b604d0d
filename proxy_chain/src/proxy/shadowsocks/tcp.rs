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

/*!
Shadowsocks AEAD stream.

An AEAD encrypted TCP stream starts with a randomly generated salt
used to derive the session key, followed by any number of chunks.

Each chunk has the following structure:
```not_rust
+------------------+------------+-------------+----------+
|    encrypted     |    length  |  encrypted  |  payload |
|  payload length  |     tag    |   payload   |    tag   |
+------------------+------------+-------------+----------+
|     2 bytes      |  16 bytes  |  n bytes    | 16 bytes |
+------------------+------------+-------------+----------+
```

The client sends the target address in SOCKS5 address format
before any payload.
*/

use super::utils::{session_key, Error};
use crate::{
	prelude::*,
	protocol::BytesStream,
	utils::{
		codec::{self, FrameReader, FrameWriteHalf},
		crypto::aead::{self, Algorithm, Decryptor, Encryptor},
	},
};
use std::num::{NonZeroU16, NonZeroUsize};

pub const MAX_PAYLOAD_SIZE: u16 = 0x3FFF;

/// Wrap `stream` with AEAD encryption keyed by `key`.
///
/// # Errors
///
/// Returns an error if the session key cannot be derived.
pub fn new_crypt_stream(
	stream: BytesStream,
	algo: Algorithm,
	key: &[u8],
) -> Result<BytesStream, Error> {
	let mut local_salt = vec![0_u8; algo.key_len()];
	rand::thread_rng().fill_bytes(&mut local_salt);
	let w = FrameWriteHalf::new(
		MAX_PAYLOAD_SIZE.into(),
		Encoder::new(algo, key, local_salt)?,
		stream.w,
	);
	let r = FrameReader::new(Decoder::new(algo, key.to_vec()), stream.r);
	Ok(BytesStream::new(Box::new(r), Box::new(w)))
}

enum ReadState {
	Salt { key: Vec<u8> },
	Decrypt { dec: Box<Decryptor>, state: DecodeState },
}

enum DecodeState {
	Length,
	Payload(NonZeroU16),
}

pub struct Decoder {
	state: ReadState,
	algo: Algorithm,
}

impl Decoder {
	pub fn new(algo: Algorithm, key: Vec<u8>) -> Self {
		Self {
			algo,
			state: ReadState::Salt { key },
		}
	}
}

impl codec::Decode for Decoder {
	fn expected_len(&self) -> Option<NonZeroUsize> {
		match &self.state {
			ReadState::Salt { .. } => NonZeroUsize::new(self.algo.key_len()),
			ReadState::Decrypt { state, .. } => match state {
				DecodeState::Length => NonZeroUsize::new(2 + aead::TAG_LEN),
				DecodeState::Payload(len) => NonZeroUsize::new(usize::from(len.get()) + aead::TAG_LEN),
			},
		}
	}

	fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr> {
		if buf.is_empty() {
			// Only EOF between chunks is clean.
			return match &self.state {
				ReadState::Salt { .. } => Err("EOF while reading Shadowsocks salt".into()),
				ReadState::Decrypt { state, .. } => match state {
					DecodeState::Length => Ok(true),
					DecodeState::Payload(_) => Err("EOF while reading Shadowsocks payload".into()),
				},
			};
		}

		match &mut self.state {
			ReadState::Salt { key } => {
				trace!("Reading Shadowsocks salt...");
				let session_key = session_key(key, buf)?;
				let dec = Decryptor::new(self.algo, &session_key).map_err(Error::FailedCrypto)?;
				self.state = ReadState::Decrypt {
					dec: Box::new(dec),
					state: DecodeState::Length,
				};
				Ok(false)
			}
			ReadState::Decrypt { dec, state } => match state {
				DecodeState::Length => {
					let len = dec.open_inplace(buf).map_err(|e| {
						Error::FailedCrypto(
							format!("cannot decrypt Shadowsocks length ({})", e).into(),
						)
					})?;
					let len = u16::from_be_bytes([len[0], len[1]]) & MAX_PAYLOAD_SIZE;
					let len = NonZeroU16::new(len).ok_or(Error::EmptyBuffer)?;
					trace!("Done reading length ({}), going to decode payload.", len);
					*state = DecodeState::Payload(len);
					Ok(false)
				}
				DecodeState::Payload(len) => {
					let len = usize::from(len.get());
					let buf_len = buf.len();
					dec.open_inplace(buf).map_err(|e| {
						Error::FailedCrypto(
							format!(
								"cannot decrypt Shadowsocks payload of {} bytes ({})",
								buf_len, e
							)
							.into(),
						)
					})?;
					buf.truncate(len);
					*state = DecodeState::Length;
					Ok(true)
				}
			},
		}
	}
}

pub struct Encoder {
	lazy_buf: Vec<u8>,
	enc: Encryptor,
}

impl Encoder {
	/// # Errors
	///
	/// Returns an error if the session key cannot be derived.
	pub fn new(algo: Algorithm, key: &[u8], local_salt: Vec<u8>) -> Result<Self, Error> {
		let session_key = session_key(key, &local_salt)?;
		Ok(Self {
			lazy_buf: local_salt,
			enc: Encryptor::new(algo, &session_key).map_err(Error::FailedCrypto)?,
		})
	}
}

impl codec::Encode for Encoder {
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		let src_len = u16::try_from(src.len())
			.ok()
			.filter(|len| *len <= MAX_PAYLOAD_SIZE && *len > 0)
			.ok_or_else(|| format!("invalid Shadowsocks payload length {}", src.len()))?;

		if !self.lazy_buf.is_empty() {
			buf.extend_from_slice(&self.lazy_buf);
			self.lazy_buf = Vec::new();
		}
		buf.reserve(2 + src.len() + 2 * aead::TAG_LEN);

		let pos = buf.len();
		buf.put_u16(src_len);
		self.enc.seal_inplace_append_tag(pos, buf)?;

		let pos = buf.len();
		buf.extend_from_slice(src);
		self.enc.seal_inplace_append_tag(pos, buf)?;
		trace!(
			"Encoding src ({} bytes) into buf ({} bytes)",
			src.len(),
			buf.len()
		);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::runtime::Runtime;

	#[test]
	fn test_aead_stream() {
		let key = [3_u8; 32];
		Runtime::new().unwrap().block_on(async {
			let (client, server) = tokio::io::duplex(64 * 1024);
			let mut client = new_crypt_stream(
				BytesStream::from_io(client),
				Algorithm::ChaCha20Poly1305,
				&key,
			)
			.unwrap();
			let mut server = new_crypt_stream(
				BytesStream::from_io(server),
				Algorithm::ChaCha20Poly1305,
				&key,
			)
			.unwrap();

			// Larger than one chunk.
			let data: Vec<u8> = (0..40_000_u32).map(|i| (i % 256) as u8).collect();
			client.write_all(&data).await.unwrap();
			client.shutdown().await.unwrap();

			let mut out = Vec::new();
			server.read_to_end(&mut out).await.unwrap();
			assert_eq!(out, data);
		});
	}

	#[test]
	fn test_aead_wrong_key() {
		Runtime::new().unwrap().block_on(async {
			let (client, server) = tokio::io::duplex(1024);
			let mut client = new_crypt_stream(
				BytesStream::from_io(client),
				Algorithm::Aes128Gcm,
				&[1_u8; 16],
			)
			.unwrap();
			let mut server = new_crypt_stream(
				BytesStream::from_io(server),
				Algorithm::Aes128Gcm,
				&[2_u8; 16],
			)
			.unwrap();
			client.write_all(b"hello").await.unwrap();
			let mut buf = [0_u8; 5];
			assert!(server.read_exact(&mut buf).await.is_err());
		});
	}
}

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

//! Stream cipher connections.
//!
//! Each direction starts with a random IV, followed by the
//! encrypted bytes with no framing.

use super::utils::Error;
use crate::{
	prelude::*,
	protocol::BytesStream,
	utils::{
		codec::{self, FrameReader, FrameWriteHalf, BUFFER_CAPACITY},
		crypto::stream::{Algorithm, Cipher},
	},
};
use std::num::NonZeroUsize;

/// Wrap `stream` with a stream cipher keyed by `key`.
///
/// Returns the new stream and the IV used for writing.
///
/// # Errors
///
/// Returns an error if `key` has the wrong length.
pub fn new_crypt_stream(
	stream: BytesStream,
	algo: Algorithm,
	key: &[u8],
) -> Result<(BytesStream, Vec<u8>), Error> {
	let mut iv = vec![0_u8; algo.iv_len()];
	rand::thread_rng().fill_bytes(&mut iv);
	let enc = Cipher::new(algo, key, &iv).map_err(Error::FailedCrypto)?;
	let w = FrameWriteHalf::new(
		BUFFER_CAPACITY,
		Encoder {
			iv: Some(iv.clone()),
			enc,
		},
		stream.w,
	);
	let r = FrameReader::new(
		Decoder {
			algo,
			key: key.to_vec(),
			dec: None,
		},
		stream.r,
	);
	Ok((BytesStream::new(Box::new(r), Box::new(w)), iv))
}

pub struct Encoder {
	iv: Option<Vec<u8>>,
	enc: Cipher,
}

impl codec::Encode for Encoder {
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		if let Some(iv) = self.iv.take() {
			buf.extend_from_slice(&iv);
		}
		let pos = buf.len();
		buf.extend_from_slice(src);
		self.enc.encrypt(&mut buf[pos..]);
		Ok(())
	}
}

pub struct Decoder {
	algo: Algorithm,
	key: Vec<u8>,
	dec: Option<Cipher>,
}

impl codec::Decode for Decoder {
	fn expected_len(&self) -> Option<NonZeroUsize> {
		if self.dec.is_none() {
			NonZeroUsize::new(self.algo.iv_len())
		} else {
			None
		}
	}

	fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr> {
		if let Some(dec) = &mut self.dec {
			dec.decrypt(buf);
			return Ok(true);
		}
		if buf.is_empty() {
			return Err("EOF while reading stream cipher IV".into());
		}
		trace!("Received stream cipher IV");
		self.dec = Some(Cipher::new(self.algo, &self.key, buf)?);
		Ok(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::runtime::Runtime;

	#[test]
	fn test_cfb_stream() {
		Runtime::new().unwrap().block_on(async {
			let key = [9_u8; 24];
			let (a, b) = tokio::io::duplex(1024);
			let (mut a, a_iv) =
				new_crypt_stream(BytesStream::from_io(a), Algorithm::Aes192Cfb, &key).unwrap();
			let (mut b, b_iv) =
				new_crypt_stream(BytesStream::from_io(b), Algorithm::Aes192Cfb, &key).unwrap();
			assert_eq!(a_iv.len(), 16);
			assert_ne!(a_iv, b_iv);

			a.write_all(b"hello ").await.unwrap();
			a.write_all(b"world").await.unwrap();
			b.write_all(b"reply").await.unwrap();

			let mut buf = [0_u8; 11];
			b.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"hello world");
			let mut buf = [0_u8; 5];
			a.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"reply");
		});
	}
}

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

use super::BUFFER_CAPACITY;
use crate::{prelude::*, utils::poll_read_exact};
use futures::ready;
use std::{
	io,
	num::NonZeroUsize,
	task::{Context, Poll},
};
use tokio::io::ReadBuf;

pub trait Decode: Send + Sync + Unpin {
	/// Number of bytes the next call to [`Decode::decode_inplace`] needs,
	/// or `None` if any amount will do.
	fn expected_len(&self) -> Option<NonZeroUsize>;

	/// Decode `buf` in place.
	///
	/// Returns `Ok(true)` if `buf` now holds plain bytes.
	/// An empty `buf` with `Ok(true)` means clean EOF.
	///
	/// Returns `Ok(false)` if more bytes are needed.
	///
	/// # Errors
	///
	/// Returns an error if `buf` cannot be decoded.
	fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr>;
}

impl<T: Decode + ?Sized> Decode for Box<T> {
	#[inline]
	fn expected_len(&self) -> Option<NonZeroUsize> {
		self.as_ref().expected_len()
	}

	#[inline]
	fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr> {
		self.as_mut().decode_inplace(buf)
	}
}

#[derive(Debug)]
enum State {
	/// Ask the decoder how many bytes it needs.
	FindingLength,
	/// Fill the whole buffer.
	ReadingExact { pos: usize },
	/// Read whatever is available.
	ReadingSome,
	Decoding,
	/// Decoded bytes are being handed out, starting from `pos`.
	Buffering { pos: usize },
	Closed,
}

/// A reader that reads bytes from `r` and decodes them with a [`Decode`].
///
/// The inner reader can be accessed with the `r` field.
pub struct FrameReader<D: Decode, R: AsyncRead + Unpin> {
	pub r: R,
	decoder: D,
	state: State,
	buf: Vec<u8>,
}

impl<D, R> FrameReader<D, R>
where
	D: Decode,
	R: AsyncRead + Unpin,
{
	#[inline]
	pub fn new(decoder: D, r: R) -> Self {
		Self {
			r,
			decoder,
			state: State::FindingLength,
			buf: Vec::with_capacity(BUFFER_CAPACITY),
		}
	}

	fn close<T>(&mut self, e: io::Error) -> Poll<io::Result<T>> {
		self.state = State::Closed;
		self.buf = Vec::new();
		Poll::Ready(Err(e))
	}
}

impl<D, R> AsyncRead for FrameReader<D, R>
where
	D: Decode,
	R: AsyncRead + Unpin,
{
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		dst: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		let me = self.get_mut();
		loop {
			match &mut me.state {
				State::FindingLength => {
					if let Some(len) = me.decoder.expected_len() {
						me.buf.resize(len.get(), 0);
						me.state = State::ReadingExact { pos: 0 };
					} else {
						me.buf.resize(BUFFER_CAPACITY, 0);
						me.state = State::ReadingSome;
					}
				}
				State::ReadingExact { pos } => {
					match ready!(poll_read_exact(Pin::new(&mut me.r), cx, &mut me.buf, pos)) {
						Ok(n) => me.buf.truncate(n),
						Err(e) => {
							debug!("Error when reading {} bytes for frame ({})", me.buf.len(), e);
							return me.close(e);
						}
					}
					me.state = State::Decoding;
				}
				State::ReadingSome => {
					let mut read_buf = ReadBuf::new(me.buf.as_mut_slice());
					if let Err(e) = ready!(Pin::new(&mut me.r).poll_read(cx, &mut read_buf)) {
						debug!("Error when reading frame ({})", e);
						return me.close(e);
					}
					let n = read_buf.filled().len();
					me.buf.truncate(n);
					me.state = State::Decoding;
				}
				State::Decoding => {
					trace!("Decoding {} bytes", me.buf.len());
					let done = match me.decoder.decode_inplace(&mut me.buf) {
						Ok(done) => done,
						Err(e) => return me.close(io::Error::new(io::ErrorKind::InvalidData, e)),
					};
					if !done {
						me.state = State::FindingLength;
						continue;
					}
					if me.buf.is_empty() {
						trace!("Frame reader reached EOF");
						me.state = State::Closed;
						me.buf = Vec::new();
						return Poll::Ready(Ok(()));
					}
					me.state = State::Buffering { pos: 0 };
				}
				State::Buffering { pos } => {
					if dst.remaining() == 0 {
						return Poll::Ready(Ok(()));
					}
					let remaining = &me.buf[*pos..];
					let len = std::cmp::min(dst.remaining(), remaining.len());
					dst.put_slice(&remaining[..len]);
					*pos += len;
					if *pos == me.buf.len() {
						me.state = State::FindingLength;
					}
					return Poll::Ready(Ok(()));
				}
				// Reading after EOF keeps returning EOF.
				State::Closed => return Poll::Ready(Ok(())),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Frames are `len (1 byte) | payload`, payload XORed with 0xff.
	struct XorDecoder {
		payload_len: Option<usize>,
	}

	impl Decode for XorDecoder {
		fn expected_len(&self) -> Option<NonZeroUsize> {
			NonZeroUsize::new(self.payload_len.unwrap_or(1))
		}

		fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr> {
			if buf.is_empty() {
				return if self.payload_len.is_none() {
					Ok(true)
				} else {
					Err("unexpected EOF".into())
				};
			}
			if let Some(_len) = self.payload_len.take() {
				for b in buf.iter_mut() {
					*b ^= 0xff;
				}
				return Ok(true);
			}
			self.payload_len = Some(usize::from(buf[0]));
			Ok(false)
		}
	}

	#[test]
	fn test_frame_reader() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let src: &[u8] = &[2, !b'h', !b'e', 3, !b'l', !b'l', !b'o'];
			let mut r = FrameReader::new(XorDecoder { payload_len: None }, src);
			let mut out = Vec::new();
			r.read_to_end(&mut out).await.unwrap();
			assert_eq!(out, b"hello");
		});
	}

	#[test]
	fn test_frame_reader_truncated() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let src: &[u8] = &[5, 1, 2];
			let mut r = FrameReader::new(XorDecoder { payload_len: None }, src);
			let mut out = Vec::new();
			assert!(r.read_to_end(&mut out).await.is_err());
		});
	}
}

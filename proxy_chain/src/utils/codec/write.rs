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
use crate::{prelude::*, utils::poll_write_all};
use futures::ready;
use std::{
	io,
	task::{Context, Poll},
};

pub trait Encode: Send + Sync + Unpin {
	/// Encode `src` and append the result to `buf`.
	///
	/// # Errors
	///
	/// Returns an error if `src` cannot be encoded.
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr>;
}

impl<T: Encode + ?Sized> Encode for Box<T> {
	#[inline]
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		self.as_mut().encode_into(src, buf)
	}
}

#[derive(Debug, PartialEq, Eq)]
enum State {
	Encoding,
	/// Writing the encoded buffer, starting from the position.
	/// Also remembers how many source bytes it holds.
	Writing(usize, usize),
	Closed,
}

/// A writer that encodes bytes with an [`Encode`] and writes them into `w`.
///
/// Each call to `poll_write` produces exactly one encoded frame
/// of at most `max_payload_len` source bytes.
pub struct FrameWriteHalf<E: Encode, W: AsyncWrite + Unpin> {
	buf: Vec<u8>,
	state: State,
	pub max_payload_len: usize,
	pub encoder: E,
	pub w: W,
}

impl<E, W> FrameWriteHalf<E, W>
where
	E: Encode,
	W: AsyncWrite + Unpin,
{
	pub fn new(max_payload_len: usize, encoder: E, w: W) -> Self {
		Self {
			buf: Vec::with_capacity(BUFFER_CAPACITY),
			state: State::Encoding,
			max_payload_len,
			encoder,
			w,
		}
	}
}

impl<E, W> AsyncWrite for FrameWriteHalf<E, W>
where
	E: Encode,
	W: AsyncWrite + Unpin,
{
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		src: &[u8],
	) -> Poll<io::Result<usize>> {
		let me = self.get_mut();
		loop {
			match &mut me.state {
				State::Encoding => {
					let src = &src[..std::cmp::min(src.len(), me.max_payload_len)];
					if src.is_empty() {
						return Poll::Ready(Ok(0));
					}
					me.encoder
						.encode_into(src, &mut me.buf)
						.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
					me.state = State::Writing(0, src.len());
				}
				State::Writing(pos, src_len) => {
					let src_len = *src_len;
					ready!(poll_write_all(Pin::new(&mut me.w), cx, pos, &me.buf))?;
					me.buf.clear();
					me.state = State::Encoding;
					return Poll::Ready(Ok(src_len));
				}
				State::Closed => {
					return Poll::Ready(Err(io::Error::new(
						io::ErrorKind::BrokenPipe,
						"frame writer already closed",
					)))
				}
			}
		}
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().w).poll_flush(cx)
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let me = self.get_mut();
		me.state = State::Closed;
		Pin::new(&mut me.w).poll_shutdown(cx)
	}
}

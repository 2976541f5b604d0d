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

pub mod codec;
pub mod crypto;
pub mod websocket;

mod poll;
pub use poll::{poll_read_exact, poll_write_all};

use std::{
	io,
	time::{SystemTime, UNIX_EPOCH},
};
use tokio::io::ReadBuf;

/// Seconds since unix epoch, 0 if the clock is before it.
#[inline]
pub fn timestamp_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map_or(0, |d| d.as_secs())
}

/// Bytes received as a whole that are handed out piece by piece.
#[derive(Debug)]
pub struct PollBuffer {
	pub inner: Vec<u8>,
	pub pos: usize,
}

impl PollBuffer {
	pub fn new(inner: Vec<u8>) -> Self {
		Self { inner, pos: 0 }
	}

	#[inline]
	pub fn remaining(&self) -> usize {
		self.inner.len() - self.pos
	}

	/// Returns `true` if all bytes have been handed out.
	pub fn copy_to(&mut self, dst: &mut ReadBuf<'_>) -> bool {
		let copy_len = std::cmp::min(self.remaining(), dst.remaining());
		let next_pos = self.pos + copy_len;
		dst.put_slice(&self.inner[self.pos..next_pos]);
		self.pos = next_pos;
		self.pos == self.inner.len()
	}
}

pub(crate) trait ReadInt: std::io::Read {
	/// Read a u8 from stream.
	///
	/// # Errors
	///
	/// Return the same error as `read_exact`.
	#[inline]
	fn read_u8(&mut self) -> io::Result<u8> {
		self.read_arr::<1>().map(|n| n[0])
	}

	/// Read a big endian u16 from stream.
	///
	/// # Errors
	///
	/// Return the same error as `read_exact`.
	#[inline]
	fn read_u16(&mut self) -> io::Result<u16> {
		self.read_arr::<2>().map(u16::from_be_bytes)
	}

	#[inline]
	fn read_arr<const N: usize>(&mut self) -> io::Result<[u8; N]> {
		let mut buf = [0_u8; N];
		self.read_exact(&mut buf).map(|_| buf)
	}
}

impl<T> ReadInt for T where T: std::io::Read {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_poll_buffer() {
		let inner: Vec<u8> = (0..=255_u8).collect();
		let mut poll_buf = PollBuffer::new(inner.clone());
		let mut out = Vec::new();
		let mut rounds = 0;
		loop {
			let mut buf = [0_u8; 100];
			let mut read_buf = ReadBuf::new(&mut buf);
			let is_empty = poll_buf.copy_to(&mut read_buf);
			out.extend_from_slice(read_buf.filled());
			rounds += 1;
			if is_empty {
				break;
			}
		}
		assert_eq!(rounds, 3);
		assert_eq!(poll_buf.remaining(), 0);
		assert_eq!(out, inner);
	}
}

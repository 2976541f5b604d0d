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

use futures::ready;
use std::{
	io,
	pin::Pin,
	task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Poll until `buf` is filled, keeping progress in `pos`.
///
/// Returns `Ok(0)` if EOF is reached before anything is read,
/// `Err(UnexpectedEof)` if EOF is reached in the middle,
/// and `Ok(buf.len())` once the buffer is full.
pub fn poll_read_exact<R>(
	mut reader: Pin<&mut R>,
	cx: &mut Context<'_>,
	buf: &mut [u8],
	pos: &mut usize,
) -> Poll<io::Result<usize>>
where
	R: AsyncRead,
{
	while *pos < buf.len() {
		let mut read_buf = ReadBuf::new(&mut buf[*pos..]);
		ready!(reader.as_mut().poll_read(cx, &mut read_buf))?;
		let n = read_buf.filled().len();
		if n == 0 {
			if *pos == 0 {
				return Poll::Ready(Ok(0));
			}
			return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
		}
		*pos += n;
	}
	Poll::Ready(Ok(buf.len()))
}

/// Poll until all of `src[*pos..]` is written.
pub fn poll_write_all<W>(
	mut writer: Pin<&mut W>,
	cx: &mut Context<'_>,
	pos: &mut usize,
	src: &[u8],
) -> Poll<io::Result<()>>
where
	W: AsyncWrite,
{
	debug_assert!(*pos <= src.len());
	while *pos < src.len() {
		let n = ready!(writer.as_mut().poll_write(cx, &src[*pos..]))?;
		if n == 0 {
			return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
		}
		*pos += n;
	}
	Poll::Ready(Ok(()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::future::poll_fn;

	#[test]
	fn test_poll_read_exact() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let mut src: &[u8] = &[1, 2, 3, 4, 5];
			let mut buf = [0_u8; 3];
			let mut pos = 0;
			let n = poll_fn(|cx| poll_read_exact(Pin::new(&mut src), cx, &mut buf, &mut pos))
				.await
				.unwrap();
			assert_eq!(n, 3);
			assert_eq!(buf, [1, 2, 3]);

			let mut pos = 0;
			let e = poll_fn(|cx| poll_read_exact(Pin::new(&mut src), cx, &mut buf, &mut pos))
				.await
				.unwrap_err();
			assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);

			let mut empty: &[u8] = &[];
			let mut pos = 0;
			let n = poll_fn(|cx| poll_read_exact(Pin::new(&mut empty), cx, &mut buf, &mut pos))
				.await
				.unwrap();
			assert_eq!(n, 0);
		});
	}
}

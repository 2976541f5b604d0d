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

use crate::prelude::*;
use std::{
	fmt::{self, Display},
	io,
	task::{Context, Poll},
};
use tokio::io::ReadBuf;

pub type BoxRead = Box<dyn AsyncRead + Send + Sync + Unpin>;
pub type BoxWrite = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// A byte stream made of a boxed read half and a boxed write half.
///
/// Every transform layer takes one and returns one.
pub struct BytesStream {
	pub r: BoxRead,
	pub w: BoxWrite,
}

impl BytesStream {
	#[inline]
	#[must_use]
	pub fn new(r: BoxRead, w: BoxWrite) -> Self {
		Self { r, w }
	}

	/// Split any full duplex IO object into a [`BytesStream`].
	pub fn from_io<T>(io: T) -> Self
	where
		T: 'static + AsyncRead + AsyncWrite + Send + Sync + Unpin,
	{
		let (r, w) = tokio::io::split(io);
		Self::new(Box::new(r), Box::new(w))
	}

	#[inline]
	#[must_use]
	pub fn into_split(self) -> (BoxRead, BoxWrite) {
		(self.r, self.w)
	}
}

impl From<tokio::net::TcpStream> for BytesStream {
	fn from(stream: tokio::net::TcpStream) -> Self {
		let (r, w) = stream.into_split();
		Self::new(Box::new(r), Box::new(w))
	}
}

impl AsyncRead for BytesStream {
	#[inline]
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().r).poll_read(cx, buf)
	}
}

impl AsyncWrite for BytesStream {
	#[inline]
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.get_mut().w).poll_write(cx, buf)
	}

	#[inline]
	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().w).poll_flush(cx)
	}

	#[inline]
	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().w).poll_shutdown(cx)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "use_serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "use_serde", serde(rename_all = "lowercase"))]
pub enum Network {
	Tcp,
	Udp,
}

impl Network {
	#[inline]
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			Network::Tcp => "tcp",
			Network::Udp => "udp",
		}
	}
}

impl Default for Network {
	#[inline]
	fn default() -> Self {
		Network::Tcp
	}
}

impl Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

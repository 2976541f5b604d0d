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

use super::{BytesStream, PacketStream, RecvPacket, SendPacket};
use crate::prelude::*;
use std::{
	fmt::{self, Display},
	io,
	task::{Context, Poll},
};
use tokio::io::ReadBuf;

/// Names of the adapters a connection went through.
///
/// The innermost adapter pushes first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chain(Vec<Tag>);

impl Chain {
	#[inline]
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[inline]
	pub fn push(&mut self, name: impl Into<Tag>) {
		self.0.push(name.into());
	}

	/// Names from the outermost adapter to the innermost.
	pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
		self.0.iter().rev().map(Tag::as_str)
	}

	#[must_use]
	pub fn to_vec(&self) -> Vec<Tag> {
		self.0.iter().rev().cloned().collect()
	}

	#[inline]
	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl Display for Chain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, name) in self.names().enumerate() {
			if i > 0 {
				f.write_str(" -> ")?;
			}
			f.write_str(name)?;
		}
		Ok(())
	}
}

/// A byte stream returned by [`ProxyAdapter::dial_context`](super::ProxyAdapter::dial_context).
pub struct ProxyConn {
	pub stream: BytesStream,
	pub chain: Chain,
}

impl ProxyConn {
	#[inline]
	#[must_use]
	pub fn new(stream: BytesStream, chain: Chain) -> Self {
		Self { stream, chain }
	}

	#[inline]
	#[must_use]
	pub fn into_parts(self) -> (BytesStream, Chain) {
		(self.stream, self.chain)
	}
}

impl AsyncRead for ProxyConn {
	#[inline]
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
	}
}

impl AsyncWrite for ProxyConn {
	#[inline]
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
	}

	#[inline]
	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().stream).poll_flush(cx)
	}

	#[inline]
	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
	}
}

/// A datagram socket returned by [`ProxyAdapter::dial_udp`](super::ProxyAdapter::dial_udp).
pub struct ProxyPacketConn {
	pub stream: PacketStream,
	pub chain: Chain,
}

impl ProxyPacketConn {
	#[inline]
	#[must_use]
	pub fn new(stream: PacketStream, chain: Chain) -> Self {
		Self { stream, chain }
	}

	#[inline]
	#[must_use]
	pub fn into_parts(self) -> (PacketStream, Chain) {
		(self.stream, self.chain)
	}
}

#[async_trait]
impl RecvPacket for ProxyPacketConn {
	#[inline]
	async fn recv_src(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocksAddr)> {
		self.stream.recv_src(buf).await
	}
}

#[async_trait]
impl SendPacket for ProxyPacketConn {
	#[inline]
	async fn send_dst(&mut self, dst: &SocksAddr, buf: &[u8]) -> io::Result<usize> {
		self.stream.send_dst(dst, buf).await
	}

	#[inline]
	async fn shutdown(&mut self) -> io::Result<()> {
		self.stream.shutdown().await
	}
}

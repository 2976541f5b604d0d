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
use std::io;
use tokio::net::{ToSocketAddrs, UdpSocket};

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65507;

#[async_trait]
pub trait RecvPacket: Unpin + Send + Sync {
	/// Receive one datagram into `buf`, returning its length and source.
	async fn recv_src(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocksAddr)>;
}

#[async_trait]
pub trait SendPacket: Unpin + Send + Sync {
	/// Send `buf` as one datagram to `dst`.
	async fn send_dst(&mut self, dst: &SocksAddr, buf: &[u8]) -> io::Result<usize>;
	async fn shutdown(&mut self) -> io::Result<()>;
}

pub struct PacketStream {
	pub read_half: Box<dyn RecvPacket>,
	pub write_half: Box<dyn SendPacket>,
}

impl PacketStream {
	#[inline]
	#[must_use]
	pub fn new(read_half: Box<dyn RecvPacket>, write_half: Box<dyn SendPacket>) -> Self {
		Self {
			read_half,
			write_half,
		}
	}
}

#[async_trait]
impl RecvPacket for PacketStream {
	#[inline]
	async fn recv_src(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocksAddr)> {
		self.read_half.recv_src(buf).await
	}
}

#[async_trait]
impl SendPacket for PacketStream {
	#[inline]
	async fn send_dst(&mut self, dst: &SocksAddr, buf: &[u8]) -> io::Result<usize> {
		self.write_half.send_dst(dst, buf).await
	}

	#[inline]
	async fn shutdown(&mut self) -> io::Result<()> {
		self.write_half.shutdown().await
	}
}

/// An OS UDP socket, shared by both halves.
#[derive(Clone)]
pub struct UdpSocketWrapper(pub Arc<UdpSocket>);

impl UdpSocketWrapper {
	/// Wrapper for [`UdpSocket::bind`].
	///
	/// # Errors
	///
	/// Returns the same error as [`UdpSocket::bind`].
	pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
		let sock = UdpSocket::bind(addr).await?;
		trace!("UDP socket bound on {}", sock.local_addr()?);
		Ok(Self(Arc::new(sock)))
	}

	#[must_use]
	pub fn into_packet_stream(self) -> PacketStream {
		PacketStream::new(Box::new(self.clone()), Box::new(self))
	}
}

#[async_trait]
impl RecvPacket for UdpSocketWrapper {
	async fn recv_src(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocksAddr)> {
		let (len, src) = self.0.recv_from(buf).await?;
		trace!("UDP socket received {} bytes from {}", len, src);
		Ok((len, src.into()))
	}
}

#[async_trait]
impl SendPacket for UdpSocketWrapper {
	async fn send_dst(&mut self, dst: &SocksAddr, buf: &[u8]) -> io::Result<usize> {
		trace!("UDP socket sending {} bytes to {}", buf.len(), dst);
		match &dst.dest {
			SocksDestination::Name(name) => self.0.send_to(buf, (name.as_str(), dst.port)).await,
			SocksDestination::Ip(ip) => self.0.send_to(buf, (*ip, dst.port)).await,
		}
	}

	async fn shutdown(&mut self) -> io::Result<()> {
		Ok(())
	}
}

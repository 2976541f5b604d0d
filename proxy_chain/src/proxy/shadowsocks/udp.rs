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
Shadowsocks datagrams.

Before encryption, every datagram in both directions is
```plain
+------+----------+----------+----------+
| ATYP | DST.ADDR | DST.PORT |   DATA   |
+------+----------+----------+----------+
|  1   | Variable |    2     | Variable |
+------+----------+----------+----------+
```

The whole datagram then goes through every [`PacketTransform`].
*/

use super::utils::{Cipher, Error};
use crate::{
	prelude::*,
	protocol::{PacketStream, RecvPacket, SendPacket, MAX_UDP_PAYLOAD},
};
use std::io;

const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// A reversible transform applied to whole datagrams.
pub trait PacketTransform: Send + Sync {
	/// # Errors
	///
	/// Returns an error if `packet` cannot be encoded.
	fn encode_packet(&self, packet: &mut Vec<u8>) -> Result<(), BoxStdErr>;

	/// # Errors
	///
	/// Returns an error if `packet` is malformed.
	fn decode_packet(&self, packet: &mut Vec<u8>) -> Result<(), BoxStdErr>;
}

impl PacketTransform for Cipher {
	fn encode_packet(&self, packet: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		self.encrypt_packet(packet).map_err(Into::into)
	}

	fn decode_packet(&self, packet: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		self.decrypt_packet(packet).map_err(Into::into)
	}
}

/// Wrap `inner` so that datagrams are sent to `server`.
///
/// Outgoing datagrams go through `transforms` in order,
/// incoming datagrams in reverse order.
pub fn new_packet_stream(
	inner: PacketStream,
	server: SocksAddr,
	transforms: Vec<Arc<dyn PacketTransform>>,
) -> PacketStream {
	let transforms: Arc<[Arc<dyn PacketTransform>]> = transforms.into();
	PacketStream::new(
		Box::new(ReadHalf {
			inner: inner.read_half,
			transforms: transforms.clone(),
			buf: vec![0_u8; RECV_BUFFER_SIZE],
		}),
		Box::new(WriteHalf {
			inner: inner.write_half,
			server,
			transforms,
			buf: Vec::with_capacity(MAX_UDP_PAYLOAD),
		}),
	)
}

fn invalid_data(e: impl Into<BoxStdErr>) -> io::Error {
	io::Error::new(io::ErrorKind::InvalidData, e)
}

struct ReadHalf {
	inner: Box<dyn RecvPacket>,
	transforms: Arc<[Arc<dyn PacketTransform>]>,
	buf: Vec<u8>,
}

#[async_trait]
impl RecvPacket for ReadHalf {
	async fn recv_src(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocksAddr)> {
		self.buf.resize(RECV_BUFFER_SIZE, 0);
		let (len, _) = self.inner.recv_src(&mut self.buf).await?;
		self.buf.truncate(len);
		for t in self.transforms.iter().rev() {
			t.decode_packet(&mut self.buf).map_err(invalid_data)?;
		}
		let (src, addr_len) =
			SocksAddr::read_from_bytes(&self.buf).map_err(|e| invalid_data(Error::from(e)))?;
		let payload = &self.buf[addr_len..];
		let n = payload.len().min(buf.len());
		buf[..n].copy_from_slice(&payload[..n]);
		trace!("Shadowsocks UDP received {} bytes from {}", n, src);
		Ok((n, src))
	}
}

struct WriteHalf {
	inner: Box<dyn SendPacket>,
	server: SocksAddr,
	transforms: Arc<[Arc<dyn PacketTransform>]>,
	buf: Vec<u8>,
}

#[async_trait]
impl SendPacket for WriteHalf {
	async fn send_dst(&mut self, dst: &SocksAddr, payload: &[u8]) -> io::Result<usize> {
		self.buf.clear();
		dst.write_to(&mut self.buf);
		self.buf.extend_from_slice(payload);
		for t in self.transforms.iter() {
			t.encode_packet(&mut self.buf).map_err(invalid_data)?;
		}
		if self.buf.len() > MAX_UDP_PAYLOAD {
			warn!(
				"Shadowsocks datagram of {} bytes is larger than {}",
				self.buf.len(),
				MAX_UDP_PAYLOAD
			);
		}
		self.inner.send_dst(&self.server, &self.buf).await?;
		Ok(payload.len())
	}

	async fn shutdown(&mut self) -> io::Result<()> {
		self.inner.shutdown().await
	}
}

#[cfg(test)]
mod tests {
	use super::{super::utils::Method, *};
	use crate::protocol::UdpSocketWrapper;
	use tokio::{net::UdpSocket, runtime::Runtime};

	#[test]
	fn test_packet_stream() {
		Runtime::new().unwrap().block_on(async {
			let cipher = Cipher::new(Method::Aes256Gcm, "pass");
			let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
			let server_addr = SocksAddr::from(server.local_addr().unwrap());

			let inner = UdpSocketWrapper::bind("127.0.0.1:0")
				.await
				.unwrap()
				.into_packet_stream();
			let mut stream = new_packet_stream(inner, server_addr, vec![Arc::new(cipher.clone())]);

			let dst = SocksAddr::from_str("example.com:53").unwrap();
			stream.send_dst(&dst, b"query").await.unwrap();

			let mut buf = vec![0_u8; 1024];
			let (n, client) = server.recv_from(&mut buf).await.unwrap();
			let mut packet = buf[..n].to_vec();
			cipher.decrypt_packet(&mut packet).unwrap();
			let (addr, pos) = SocksAddr::read_from_bytes(&packet).unwrap();
			assert_eq!(addr, dst);
			assert_eq!(&packet[pos..], b"query");

			let mut reply = dst.to_vec();
			reply.extend_from_slice(b"answer");
			cipher.encrypt_packet(&mut reply).unwrap();
			server.send_to(&reply, client).await.unwrap();

			let (n, src) = stream.recv_src(&mut buf).await.unwrap();
			assert_eq!(src, dst);
			assert_eq!(&buf[..n], b"answer");

			// A datagram that cannot be decrypted is an error, the socket stays usable.
			server.send_to(b"garbage", client).await.unwrap();
			assert!(stream.recv_src(&mut buf).await.is_err());
			server.send_to(&reply, client).await.unwrap();
			let (n, _) = stream.recv_src(&mut buf).await.unwrap();
			assert_eq!(&buf[..n], b"answer");
		});
	}
}

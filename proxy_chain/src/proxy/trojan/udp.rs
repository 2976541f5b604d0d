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

//! Datagrams carried inside the Trojan stream.
//!
//! Each datagram has the following format:
//! ```not_rust
//! +------+----------+----------+--------+---------+----------+
//! | ATYP | DST.ADDR | DST.PORT | Length |  CRLF   | Payload  |
//! +------+----------+----------+--------+---------+----------+
//! |  1   | Variable |    2     |   2    | X'0D0A' | Variable |
//! +------+----------+----------+--------+---------+----------+
//! ```

use crate::{
	prelude::*,
	protocol::{
		socks_addr::ReadError, BoxRead, BoxWrite, BytesStream, PacketStream, RecvPacket,
		SendPacket,
	},
};
use std::io;
use tokio::io::BufReader;

pub(super) fn new_packet_stream(stream: BytesStream) -> PacketStream {
	let (r, w) = stream.into_split();
	PacketStream::new(
		Box::new(ReadHalf {
			inner: BufReader::new(r),
		}),
		Box::new(WriteHalf {
			inner: w,
			buf: Vec::with_capacity(4 * 1024),
		}),
	)
}

struct ReadHalf {
	inner: BufReader<BoxRead>,
}

#[async_trait]
impl RecvPacket for ReadHalf {
	async fn recv_src(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocksAddr)> {
		let src = SocksAddr::async_read_from(&mut self.inner)
			.await
			.map_err(ReadError::into_io_err)?;
		let mut tmp = [0_u8; 4];
		self.inner.read_exact(&mut tmp).await?;
		let len_u16 = u16::from_be_bytes([tmp[0], tmp[1]]);
		let len = usize::from(len_u16);
		if &tmp[2..] != CRLF {
			return Err(io::Error::new(
				io::ErrorKind::InvalidData,
				format!("expected CRLF, but get '{:?}'", &tmp[2..]),
			));
		}
		if len > buf.len() {
			// Skip the payload so the next datagram starts at a header.
			let mut payload = (&mut self.inner).take(u64::from(len_u16));
			tokio::io::copy(&mut payload, &mut tokio::io::sink()).await?;
			return Err(io::Error::new(
				io::ErrorKind::InvalidData,
				format!(
					"UDP recv buffer too small ({} bytes), {} bytes needed",
					buf.len(),
					len
				),
			));
		}
		self.inner.read_exact(&mut buf[..len]).await?;
		trace!("Trojan UDP received {} bytes from {}", len, src);
		Ok((len, src))
	}
}

struct WriteHalf {
	inner: BoxWrite,
	buf: Vec<u8>,
}

#[async_trait]
impl SendPacket for WriteHalf {
	async fn send_dst(&mut self, dst: &SocksAddr, payload: &[u8]) -> io::Result<usize> {
		let len = u16::try_from(payload.len()).unwrap_or_else(|_| {
			warn!("UDP payload too large for Trojan: {}", payload.len());
			u16::MAX
		});
		let payload = &payload[..usize::from(len)];

		self.buf.clear();
		dst.write_to(&mut self.buf);
		self.buf.put_u16(len);
		self.buf.put_slice(CRLF);
		self.buf.put_slice(payload);
		self.inner.write_all(&self.buf).await?;
		self.inner.flush().await?;
		Ok(payload.len())
	}

	async fn shutdown(&mut self) -> io::Result<()> {
		self.inner.shutdown().await
	}
}

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

use super::{
	outbound::Socks5,
	utils::{decode_udp_packet, encode_udp_packet, CommandCode},
};
use crate::{
	prelude::*,
	protocol::{
		BoxWrite, Error, Metadata, Network, ProxyAdapter, ProxyPacketConn, RecvPacket,
		SendPacket, MAX_UDP_PAYLOAD,
	},
};
use futures::{
	future::{self, Either},
	pin_mut,
};
use std::io;
use tokio::{sync::watch, task::JoinHandle};

/// Lifetime of a UDP association.
///
/// Owns the control connection. When the server closes it,
/// every half sharing this association stops working.
struct Association {
	drain: JoinHandle<()>,
	_control_w: BoxWrite,
}

impl Drop for Association {
	fn drop(&mut self) {
		self.drain.abort();
	}
}

fn closed_err() -> io::Error {
	io::Error::new(
		io::ErrorKind::ConnectionAborted,
		"SOCKS5 UDP association closed by control connection",
	)
}

/// Send UDP ASSOCIATE for `dst` to `s5` and return a datagram socket
/// bound to the lifetime of the control connection.
pub(super) async fn associate(s5: &Socks5, dst: &Metadata) -> Result<ProxyPacketConn, Error> {
	let (stream, _) = s5.base().dial_upstream().await?;
	let mut stream = s5
		.wrap_tls(stream)
		.await
		.map_err(|e| e.in_handshake(s5.addr()))?;
	let mut bind_addr = s5
		.handshake(&mut stream, CommandCode::Udp, &dst.socks_addr()?)
		.await
		.map_err(|e| e.in_handshake(s5.addr()))?;
	if let SocksDestination::Ip(ip) = &bind_addr.dest {
		if ip.is_unspecified() {
			let server = s5.base().addr_metadata(Network::Udp)?.socks_addr()?;
			bind_addr.dest = server.dest;
		}
	}
	debug!("SOCKS5 server '{}' relays UDP on '{}'", s5.addr(), bind_addr);

	let bind_md = Metadata::from_socks_addr(Network::Udp, bind_addr.clone());
	let (packet_stream, mut chain) = s5.base().dial_upstream_udp(&bind_md).await?;

	let (mut control_r, control_w) = stream.into_split();
	let (closed_tx, closed_rx) = watch::channel(false);
	let server_addr = Tag::from(s5.addr());
	let drain = tokio::spawn(async move {
		let mut buf = [0_u8; 256];
		loop {
			match control_r.read(&mut buf).await {
				Ok(0) | Err(_) => break,
				Ok(_) => {}
			}
		}
		debug!("SOCKS5 control connection to '{}' closed", server_addr);
		let _ = closed_tx.send(true);
	});
	let assoc = Arc::new(Association {
		drain,
		_control_w: control_w,
	});

	let read_half = ReadHalf {
		inner: packet_stream.read_half,
		closed: closed_rx.clone(),
		buf: vec![0_u8; MAX_UDP_PAYLOAD + 512],
		_assoc: assoc.clone(),
	};
	let write_half = WriteHalf {
		inner: packet_stream.write_half,
		bind_addr,
		closed: closed_rx,
		buf: Vec::with_capacity(MAX_UDP_PAYLOAD + 512),
		_assoc: assoc,
	};
	chain.push(s5.name());
	Ok(ProxyPacketConn::new(
		crate::protocol::PacketStream::new(Box::new(read_half), Box::new(write_half)),
		chain,
	))
}

struct ReadHalf {
	inner: Box<dyn RecvPacket>,
	closed: watch::Receiver<bool>,
	buf: Vec<u8>,
	_assoc: Arc<Association>,
}

#[async_trait]
impl RecvPacket for ReadHalf {
	async fn recv_src(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocksAddr)> {
		let is_closed = *self.closed.borrow();
		if is_closed {
			return Err(closed_err());
		}
		let res = {
			let recv = self.inner.recv_src(&mut self.buf);
			let closed = self.closed.changed();
			pin_mut!(recv, closed);
			match future::select(recv, closed).await {
				Either::Left((res, _)) => Some(res),
				Either::Right(_) => None,
			}
		};
		let (len, _) = res.ok_or_else(closed_err)??;
		let (src, pos) = decode_udp_packet(&self.buf[..len])
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
		let payload = &self.buf[pos..len];
		let n = payload.len().min(buf.len());
		buf[..n].copy_from_slice(&payload[..n]);
		trace!("SOCKS5 UDP received {} bytes from {}", n, src);
		Ok((n, src))
	}
}

struct WriteHalf {
	inner: Box<dyn SendPacket>,
	bind_addr: SocksAddr,
	closed: watch::Receiver<bool>,
	buf: Vec<u8>,
	_assoc: Arc<Association>,
}

#[async_trait]
impl SendPacket for WriteHalf {
	async fn send_dst(&mut self, dst: &SocksAddr, buf: &[u8]) -> io::Result<usize> {
		let is_closed = *self.closed.borrow();
		if is_closed {
			return Err(closed_err());
		}
		if buf.len() > MAX_UDP_PAYLOAD {
			warn!(
				"SOCKS5 UDP payload of {} bytes is larger than {}",
				buf.len(),
				MAX_UDP_PAYLOAD
			);
		}
		self.buf.clear();
		encode_udp_packet(dst, buf, &mut self.buf);
		self.inner.send_dst(&self.bind_addr, &self.buf).await?;
		Ok(buf.len())
	}

	async fn shutdown(&mut self) -> io::Result<()> {
		self.inner.shutdown().await
	}
}

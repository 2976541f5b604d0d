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

//! Connections made directly by the operating system.

use super::{PacketStream, UdpSocketWrapper};
use crate::prelude::*;
use std::io;
use tokio::net::{lookup_host, TcpSocket, TcpStream};

/// Connect to `addr`, trying every resolved address in order.
///
/// # Errors
///
/// Returns the error of the last attempt, or an error if the name
/// cannot be resolved.
pub async fn dial_tcp(addr: &SocksAddr) -> io::Result<TcpStream> {
	trace!("Dialing TCP connection to '{}'", addr);
	let addrs: Vec<SocketAddr> = match &addr.dest {
		SocksDestination::Ip(ip) => vec![SocketAddr::new(*ip, addr.port)],
		SocksDestination::Name(name) => lookup_host((name.as_str(), addr.port)).await?.collect(),
	};
	let mut last_err = None;
	for sock_addr in addrs {
		match connect(sock_addr).await {
			Ok(stream) => return Ok(stream),
			Err(e) => {
				debug!("Cannot connect to '{}' ({}) for '{}'", sock_addr, e, addr);
				last_err = Some(e);
			}
		}
	}
	Err(last_err.unwrap_or_else(|| {
		io::Error::new(
			io::ErrorKind::NotFound,
			format!("no address for '{}'", addr),
		)
	}))
}

async fn connect(addr: SocketAddr) -> io::Result<TcpStream> {
	let socket = if addr.is_ipv4() {
		TcpSocket::new_v4()?
	} else {
		TcpSocket::new_v6()?
	};
	socket.set_keepalive(true)?;
	let stream = socket.connect(addr).await?;
	stream.set_nodelay(true)?;
	Ok(stream)
}

/// Bind an unconnected UDP socket for sending to `target`.
///
/// The socket is bound on `[::]` if `target` is an IPv6 address,
/// otherwise on `0.0.0.0`.
///
/// # Errors
///
/// Returns the same error as [`tokio::net::UdpSocket::bind`].
pub async fn bind_udp(target: &SocksAddr) -> io::Result<PacketStream> {
	let local: IpAddr = match &target.dest {
		SocksDestination::Ip(IpAddr::V6(_)) => Ipv6Addr::UNSPECIFIED.into(),
		_ => Ipv4Addr::UNSPECIFIED.into(),
	};
	let sock = UdpSocketWrapper::bind((local, 0)).await?;
	Ok(sock.into_packet_stream())
}

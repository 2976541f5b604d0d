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
Trojan outbound, see more at <https://trojan-gfw.github.io/trojan/protocol.html>

Every connection runs over TLS. Trojan request format:
```not_rust
+-----------------------+---------+----------------+---------+----------+
| hex(SHA224(password)) |  CRLF   | Trojan Request |  CRLF   | Payload  |
+-----------------------+---------+----------------+---------+----------+
|          56           | X'0D0A' |    Variable    | X'0D0A' | Variable |
+-----------------------+---------+----------------+---------+----------+
```

where the request is a command followed by a SOCKS5 address:
```not_rust
+-----+------+----------+----------+
| CMD | ATYP | DST.ADDR | DST.PORT |
+-----+------+----------+----------+
|  1  |  1   | Variable |    2     |
+-----+------+----------+----------+
```
*/

mod outbound;
mod udp;

pub use outbound::{Options, Trojan};

use crate::prelude::*;

pub const PROTOCOL_NAME: &str = "trojan";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Command {
	Connect = 0x1,
	UdpAssociate = 0x3,
}

/// Build the request header sent right after the TLS handshake.
fn request_header(password_hex: &str, cmd: Command, dst: &SocksAddr) -> Vec<u8> {
	let mut buf = Vec::with_capacity(password_hex.len() + 4 + 1 + dst.serialized_len_atyp());
	buf.put_slice(password_hex.as_bytes());
	buf.put_slice(CRLF);
	buf.put_u8(cmd as u8);
	dst.write_to(&mut buf);
	buf.put_slice(CRLF);
	buf
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		protocol::{
			BytesStream, Error as ProtocolError, Metadata, Network, ProxyAdapter, RecvPacket,
			SendPacket,
		},
		proxy::BuildError,
		test_utils::{echo_stream_test, init_log, spawn_echo_server, spawn_udp_echo_server},
		transport::tls::SessionCache,
		utils::crypto::sha224_hex,
	};
	use std::time::Duration;
	use tokio::{
		io::BufReader,
		net::{TcpListener, UdpSocket},
		runtime::Runtime,
		time::timeout,
	};

	const PASSWORD: &str = "trojan-password";

	async fn read_request<R: AsyncRead + Unpin>(r: &mut R) -> (Vec<u8>, u8, SocksAddr) {
		let mut hex = vec![0_u8; 56];
		r.read_exact(&mut hex).await.unwrap();
		let mut crlf = [0_u8; 2];
		r.read_exact(&mut crlf).await.unwrap();
		assert_eq!(&crlf[..], CRLF);
		let cmd = r.read_u8().await.unwrap();
		let dst = SocksAddr::async_read_from(r).await.unwrap();
		r.read_exact(&mut crlf).await.unwrap();
		assert_eq!(&crlf[..], CRLF);
		(hex, cmd, dst)
	}

	/// Plain TCP Trojan server, TLS is left out.
	async fn spawn_trojan_server() -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			while let Ok((stream, _)) = listener.accept().await {
				tokio::spawn(async move {
					let (r, mut w) = stream.into_split();
					let mut r = BufReader::new(r);
					let (hex, cmd, dst) = read_request(&mut r).await;
					if hex != sha224_hex(PASSWORD.as_bytes()).as_bytes() {
						return;
					}
					if cmd == Command::Connect as u8 {
						let target = crate::protocol::dialer::dial_tcp(&dst).await.unwrap();
						let (mut tr, mut tw) = target.into_split();
						tokio::spawn(async move { tokio::io::copy(&mut tr, &mut w).await });
						let _ = tokio::io::copy(&mut r, &mut tw).await;
					} else {
						relay_udp(r, w).await;
					}
				});
			}
		});
		addr
	}

	async fn relay_udp(
		mut r: BufReader<tokio::net::tcp::OwnedReadHalf>,
		mut w: tokio::net::tcp::OwnedWriteHalf,
	) {
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let mut buf = vec![0_u8; 4096];
		while let Ok(dst) = SocksAddr::async_read_from(&mut r).await {
			let len = usize::from(r.read_u16().await.unwrap());
			let mut crlf = [0_u8; 2];
			r.read_exact(&mut crlf).await.unwrap();
			let mut payload = vec![0_u8; len];
			r.read_exact(&mut payload).await.unwrap();
			if let SocksDestination::Ip(ip) = dst.dest {
				socket.send_to(&payload, (ip, dst.port)).await.unwrap();
			}
			let (n, src) = socket.recv_from(&mut buf).await.unwrap();
			let mut reply = SocksAddr::from(src).to_vec();
			reply.put_u16(n as u16);
			reply.put_slice(CRLF);
			reply.put_slice(&buf[..n]);
			w.write_all(&reply).await.unwrap();
		}
	}

	fn new_trojan(server: SocketAddr) -> Trojan {
		let mut opts = Options::new("trojan", server.ip().to_string(), server.port(), PASSWORD);
		opts.skip_cert_verify = true;
		opts.udp = true;
		Trojan::new(opts, &SessionCache::default()).unwrap()
	}

	#[test]
	fn test_request_header() {
		let dst = SocksAddr::from_str("example.com:80").unwrap();
		let header = request_header(&sha224_hex(b"pw"), Command::Connect, &dst);
		assert_eq!(&header[..56], sha224_hex(b"pw").as_bytes());
		assert_eq!(&header[56..58], CRLF);
		assert_eq!(header[58], 1);
		assert_eq!(&header[59..header.len() - 2], dst.to_vec().as_slice());
		assert!(header.ends_with(CRLF));
	}

	#[test]
	fn test_tcp_without_tls() {
		init_log();
		let rt = Runtime::new().unwrap();
		rt.block_on(async {
			let echo = spawn_echo_server().await;
			let server = spawn_trojan_server().await;
			let trojan = new_trojan(server);
			let stream = tokio::net::TcpStream::connect(server).await.unwrap();
			let dst = SocksAddr::from(echo);
			let mut stream = trojan
				.handshake(stream.into(), Command::Connect, &dst)
				.await
				.unwrap();
			echo_stream_test(&mut stream).await;
		});
	}

	#[test]
	fn test_udp_without_tls() {
		init_log();
		let rt = Runtime::new().unwrap();
		rt.block_on(async {
			let echo = spawn_udp_echo_server().await;
			let server = spawn_trojan_server().await;
			let trojan = new_trojan(server);
			let stream = tokio::net::TcpStream::connect(server).await.unwrap();
			let dst = SocksAddr::from(echo);
			let stream = trojan
				.handshake(stream.into(), Command::UdpAssociate, &dst)
				.await
				.unwrap();
			let mut packets = udp::new_packet_stream(stream);
			let mut buf = vec![0_u8; 1024];
			for msg in [&b"hello"[..], &b"trojan udp"[..]] {
				packets.send_dst(&dst, msg).await.unwrap();
				let (n, src) = timeout(Duration::from_secs(2), packets.recv_src(&mut buf))
					.await
					.unwrap()
					.unwrap();
				assert_eq!(&buf[..n], msg);
				assert_eq!(src, dst);
			}
		});
	}

	#[test]
	fn test_dial_fails_without_tls_server() {
		init_log();
		let rt = Runtime::new().unwrap();
		rt.block_on(async {
			let server = spawn_trojan_server().await;
			let trojan = new_trojan(server);
			let dst = Metadata::parse(Network::Tcp, "example.com:80").unwrap();
			let res = timeout(Duration::from_secs(5), trojan.dial_context(&dst))
				.await
				.unwrap();
			assert!(matches!(
				res,
				Err(crate::protocol::Error::Handshake { .. })
			));
		});
	}

	#[test]
	fn test_udp_dial_times_out_on_silent_server() {
		init_log();
		let rt = Runtime::new().unwrap();
		rt.block_on(async {
			let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
			let server = listener.local_addr().unwrap();
			tokio::spawn(async move {
				let mut held = Vec::new();
				while let Ok((stream, _)) = listener.accept().await {
					held.push(stream);
				}
			});
			let trojan = new_trojan(server);
			let dst = Metadata::parse(Network::Udp, "1.2.3.4:53").unwrap();
			let res = timeout(Duration::from_secs(8), trojan.dial_udp(&dst))
				.await
				.unwrap();
			assert!(matches!(res, Err(ProtocolError::Timeout)));
		});
	}

	#[test]
	fn test_udp_small_buffer_skips_datagram() {
		let rt = Runtime::new().unwrap();
		rt.block_on(async {
			let (client, server) = tokio::io::duplex(1024);
			let mut packets = udp::new_packet_stream(BytesStream::from_io(client));
			let mut peer = udp::new_packet_stream(BytesStream::from_io(server));
			let src = SocksAddr::from_str("1.2.3.4:53").unwrap();
			peer.send_dst(&src, &[7_u8; 100]).await.unwrap();
			peer.send_dst(&src, b"second").await.unwrap();

			let mut small = [0_u8; 10];
			assert!(packets.recv_src(&mut small).await.is_err());

			let mut buf = [0_u8; 64];
			let (n, from) = packets.recv_src(&mut buf).await.unwrap();
			assert_eq!(&buf[..n], b"second");
			assert_eq!(from, src);
		});
	}

	#[test]
	fn test_build() {
		let cache = SessionCache::default();
		let mut opts = Options::new("t", "example.com", 443, PASSWORD);
		opts.skip_cert_verify = true;
		let trojan = Trojan::new(opts.clone(), &cache).unwrap();
		assert_eq!(trojan.addr(), "example.com:443");
		assert_eq!(trojan.server_name().to_string(), "example.com");

		opts.sni = Some("sni.example.com".into());
		let trojan = Trojan::new(opts.clone(), &cache).unwrap();
		assert_eq!(trojan.server_name().to_string(), "sni.example.com");

		opts.server = "bad host".into();
		assert!(matches!(
			Trojan::new(opts, &cache),
			Err(BuildError::InvalidServer(_))
		));
	}

	#[test]
	fn test_udp_frame_layout() {
		let rt = Runtime::new().unwrap();
		rt.block_on(async {
			let (client, server) = tokio::io::duplex(1024);
			let mut packets = udp::new_packet_stream(BytesStream::from_io(client));
			let (mut sr, _sw) = tokio::io::split(server);
			let dst = SocksAddr::from_str("1.2.3.4:53").unwrap();
			let payload = vec![7_u8; 100];
			packets.send_dst(&dst, &payload).await.unwrap();
			let mut frame = vec![0_u8; dst.to_vec().len() + 4 + 100];
			sr.read_exact(&mut frame).await.unwrap();
			assert_eq!(&frame[frame.len() - 100..], payload.as_slice());
		});
	}
}

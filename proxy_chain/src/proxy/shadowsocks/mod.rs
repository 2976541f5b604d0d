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
Shadowsocks client with AEAD and stream ciphers.
See more at <https://shadowsocks.org/en/wiki/Protocol.html>

Supported plugins are simple-obfs (`obfs`) and `v2ray-plugin` in websocket mode.
*/

pub(crate) mod obfs;
mod outbound;
pub(crate) mod stream;
mod tcp;
pub(crate) mod udp;
mod utils;
mod v2ray;

pub use outbound::{Options, PluginOptions, Shadowsocks};
pub use utils::{Cipher, Error, Method, MethodKind};

pub const PROTOCOL_NAME: &str = "ss";

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		prelude::*,
		protocol::{BytesStream, Metadata, Network, ProxyAdapter, RecvPacket, SendPacket},
		proxy::BuildError,
		test_utils::{
			echo_stream_test, init_log, spawn_banner_server, spawn_echo_server,
			spawn_udp_echo_server, BANNER,
		},
		transport::tls::SessionCache,
	};
	use std::time::Duration;
	use tokio::{
		net::{TcpListener, TcpStream, UdpSocket},
		runtime::Runtime,
		time::timeout,
	};

	const PASSWORD: &str = "super-simple-password";

	async fn serve_ss(mut stream: BytesStream) -> Result<(), BoxStdErr> {
		let dst = SocksAddr::async_read_from(&mut stream).await?;
		let mut target = crate::protocol::dialer::dial_tcp(&dst).await?;
		tokio::io::copy_bidirectional(&mut stream, &mut target).await?;
		Ok(())
	}

	/// Server side of simple-obfs http.
	async fn strip_obfs_http(mut stream: TcpStream) -> std::io::Result<TcpStream> {
		let mut header = Vec::new();
		while !header.ends_with(CRLF_2) {
			header.push(stream.read_u8().await?);
		}
		stream
			.write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n")
			.await?;
		Ok(stream)
	}

	async fn spawn_ss_server(cipher: Cipher, http_obfs: bool) -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			while let Ok((stream, _)) = listener.accept().await {
				let cipher = cipher.clone();
				tokio::spawn(async move {
					let stream = if http_obfs {
						strip_obfs_http(stream).await?
					} else {
						stream
					};
					let stream = cipher.stream_conn(BytesStream::from_io(stream))?;
					serve_ss(stream).await
				});
			}
		});
		addr
	}

	async fn spawn_ss_udp_server(cipher: Cipher) -> SocketAddr {
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let addr = socket.local_addr().unwrap();
		tokio::spawn(async move {
			let mut buf = vec![0_u8; 64 * 1024];
			let mut client = None;
			loop {
				let (len, src) = socket.recv_from(&mut buf).await.unwrap();
				let mut packet = buf[..len].to_vec();
				if client.is_none() || client == Some(src) {
					client = Some(src);
					cipher.decrypt_packet(&mut packet).unwrap();
					let (dst, pos) = SocksAddr::read_from_bytes(&packet).unwrap();
					if let SocksDestination::Ip(ip) = dst.dest {
						socket.send_to(&packet[pos..], (ip, dst.port)).await.unwrap();
					}
				} else if let Some(client) = client {
					let mut reply = SocksAddr::from(src).to_vec();
					reply.extend_from_slice(&packet);
					cipher.encrypt_packet(&mut reply).unwrap();
					socket.send_to(&reply, client).await.unwrap();
				}
			}
		});
		addr
	}

	fn new_options(cipher: &str, server: SocketAddr) -> Options {
		Options::new("ss", server.ip().to_string(), server.port(), cipher, PASSWORD)
	}

	#[test]
	fn test_shadowsocks_tcp() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let echo_addr = spawn_echo_server().await;
			let dst = Metadata::from_socks_addr(Network::Tcp, echo_addr.into());
			let cache = SessionCache::default();
			for method in [
				Method::None,
				Method::Aes128Gcm,
				Method::Aes256Gcm,
				Method::Chacha20Poly1305,
				Method::Aes128Cfb,
				Method::Aes192Cfb,
				Method::Aes256Cfb,
			] {
				let server = spawn_ss_server(Cipher::new(method, PASSWORD), false).await;
				let ss = Shadowsocks::new(new_options(method.as_str(), server), &cache).unwrap();
				assert_eq!(ss.method(), method);
				let mut conn = ss.dial_context(&dst).await.unwrap();
				assert_eq!(conn.chain.to_vec(), vec![Tag::from("ss")]);
				echo_stream_test(&mut conn).await;
			}
		});
	}

	#[test]
	fn test_shadowsocks_wrong_password() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let echo_addr = spawn_echo_server().await;
			let dst = Metadata::from_socks_addr(Network::Tcp, echo_addr.into());
			let server = spawn_ss_server(Cipher::new(Method::Aes128Gcm, "other"), false).await;
			let ss = Shadowsocks::new(
				new_options("aes-128-gcm", server),
				&SessionCache::default(),
			)
			.unwrap();
			let mut conn = ss.dial_context(&dst).await.unwrap();
			let mut buf = [0_u8; 5];
			let res = timeout(Duration::from_secs(2), async {
				conn.write_all(b"hello").await?;
				conn.read_exact(&mut buf).await
			})
			.await
			.unwrap();
			assert!(res.is_err());
		});
	}

	#[test]
	fn test_shadowsocks_server_speaks_first() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let banner_addr = spawn_banner_server().await;
			let dst = Metadata::from_socks_addr(Network::Tcp, banner_addr.into());
			let cache = SessionCache::default();
			for method in [Method::None, Method::Aes128Gcm, Method::Aes256Cfb] {
				let server = spawn_ss_server(Cipher::new(method, PASSWORD), false).await;
				let ss = Shadowsocks::new(new_options(method.as_str(), server), &cache).unwrap();
				let mut conn = ss.dial_context(&dst).await.unwrap();
				let mut buf = vec![0_u8; BANNER.len()];
				timeout(Duration::from_secs(2), conn.read_exact(&mut buf))
					.await
					.unwrap()
					.unwrap();
				assert_eq!(buf, BANNER);
			}
		});
	}

	#[test]
	fn test_shadowsocks_obfs_http() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let echo_addr = spawn_echo_server().await;
			let dst = Metadata::from_socks_addr(Network::Tcp, echo_addr.into());
			let server = spawn_ss_server(Cipher::new(Method::Aes256Gcm, PASSWORD), true).await;
			let mut opts = new_options("aes-256-gcm", server);
			opts.plugin = Some("obfs".into());
			opts.plugin_opts.mode = "http".into();
			let ss = Shadowsocks::new(opts, &SessionCache::default()).unwrap();
			let mut conn = ss.dial_context(&dst).await.unwrap();
			echo_stream_test(&mut conn).await;
		});
	}

	#[test]
	fn test_shadowsocks_udp() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let echo_addr = spawn_udp_echo_server().await;
			let server = spawn_ss_udp_server(Cipher::new(Method::Chacha20Poly1305, PASSWORD)).await;
			let mut opts = new_options("chacha20-ietf-poly1305", server);
			opts.udp = true;
			let ss = Shadowsocks::new(opts, &SessionCache::default()).unwrap();
			let dst = Metadata::from_socks_addr(Network::Udp, echo_addr.into());
			let conn = ss.dial_udp(&dst).await.unwrap();
			assert_eq!(conn.chain.to_vec(), vec![Tag::from("ss")]);
			let (mut stream, _) = conn.into_parts();

			let echo = SocksAddr::from(echo_addr);
			stream.write_half.send_dst(&echo, b"ping").await.unwrap();
			let mut buf = [0_u8; 64];
			let (n, src) = timeout(Duration::from_secs(2), stream.read_half.recv_src(&mut buf))
				.await
				.unwrap()
				.unwrap();
			assert_eq!(&buf[..n], b"ping");
			assert_eq!(src, echo);
		});
	}

	#[test]
	fn test_build_errors() {
		let cache = SessionCache::default();
		let server: SocketAddr = "127.0.0.1:8388".parse().unwrap();

		let e = Shadowsocks::new(new_options("rc4-md5", server), &cache).err().unwrap();
		assert!(matches!(e, BuildError::UnknownCipher(_)));

		let mut opts = new_options("aes-128-gcm", server);
		opts.plugin = Some("kcptun".into());
		let e = Shadowsocks::new(opts, &cache).err().unwrap();
		assert!(matches!(e, BuildError::UnknownPlugin(_)));

		let mut opts = new_options("aes-128-gcm", server);
		opts.plugin = Some("obfs".into());
		opts.plugin_opts.mode = "websocket".into();
		let e = Shadowsocks::new(opts, &cache).err().unwrap();
		assert!(matches!(e, BuildError::InvalidPluginMode { .. }));

		let mut opts = new_options("aes-128-gcm", server);
		opts.plugin = Some("v2ray-plugin".into());
		opts.plugin_opts.mode = "websocket".into();
		opts.plugin_opts
			.headers
			.insert("bad header".into(), "value".into());
		let e = Shadowsocks::new(opts, &cache).err().unwrap();
		assert!(matches!(e, BuildError::InvalidHeader(_)));

		let mut opts = new_options("aes-128-gcm", server);
		opts.plugin = Some("v2ray-plugin".into());
		opts.plugin_opts.mode = "websocket".into();
		assert!(Shadowsocks::new(opts, &cache).is_ok());

		let mut opts = new_options("aes-128-gcm", server);
		opts.server = "bad host".into();
		let e = Shadowsocks::new(opts, &cache).err().unwrap();
		assert!(matches!(e, BuildError::InvalidServer(_)));
	}
}

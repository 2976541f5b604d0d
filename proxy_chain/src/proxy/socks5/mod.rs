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

mod outbound;
mod udp;
mod utils;

pub use outbound::{Options, Socks5};
pub use utils::{decode_udp_packet, encode_udp_packet, Error};

pub const PROTOCOL_NAME: &str = "socks5";

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		prelude::*,
		protocol::{Error as ProtocolError, Metadata, Network, ProxyAdapter, RecvPacket, SendPacket},
		proxy::direct::Direct,
		test_utils::{
			echo_stream_test, init_log, spawn_echo_server, spawn_socks5_server,
			spawn_udp_echo_server, MockSocks5,
		},
		transport::tls::SessionCache,
	};
	use std::time::Duration;
	use tokio::{runtime::Runtime, time::timeout};

	fn new_socks5(name: &str, server: SocketAddr) -> Options {
		Options::new(name, server.ip().to_string(), server.port())
	}

	#[test]
	fn test_socks5_exact_handshake() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let echo_addr = spawn_echo_server().await;
			let mock = spawn_socks5_server(MockSocks5::default()).await;
			let s5 = Socks5::new(new_socks5("s5", mock.addr), &SessionCache::default()).unwrap();

			let dst = Metadata::from_socks_addr(Network::Tcp, echo_addr.into());
			let mut conn = s5.dial_context(&dst).await.unwrap();
			assert_eq!(conn.chain.to_vec(), vec![Tag::from("s5")]);
			echo_stream_test(&mut conn).await;

			let port = echo_addr.port().to_be_bytes();
			let expected = [5, 1, 0, 5, 1, 0, 1, 127, 0, 0, 1, port[0], port[1]];
			assert_eq!(mock.received.lock().as_slice(), &expected);
		});
	}

	#[test]
	fn test_socks5_auth() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let echo_addr = spawn_echo_server().await;
			let mock = spawn_socks5_server(MockSocks5 {
				auth: Some(("user".into(), "pass".into())),
				..MockSocks5::default()
			})
			.await;
			let dst = Metadata::from_socks_addr(Network::Tcp, echo_addr.into());
			let cache = SessionCache::default();

			let mut opts = new_socks5("s5", mock.addr);
			opts.username = Some("user".into());
			opts.password = Some("pass".into());
			let s5 = Socks5::new(opts.clone(), &cache).unwrap();
			let mut conn = s5.dial_context(&dst).await.unwrap();
			echo_stream_test(&mut conn).await;

			opts.password = Some("wrong".into());
			let s5 = Socks5::new(opts, &cache).unwrap();
			let e = s5.dial_context(&dst).await.err().unwrap();
			assert!(matches!(e, ProtocolError::Handshake { .. }), "{}", e);

			// No credentials for a server that requires them.
			let s5 = Socks5::new(new_socks5("s5", mock.addr), &cache).unwrap();
			assert!(s5.dial_context(&dst).await.is_err());
		});
	}

	#[test]
	fn test_socks5_chain() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let echo_addr = spawn_echo_server().await;
			let mock_a = spawn_socks5_server(MockSocks5::default()).await;
			let mock_b = spawn_socks5_server(MockSocks5::default()).await;
			let cache = SessionCache::default();

			let mut b = Socks5::new(new_socks5("B", mock_b.addr), &cache).unwrap();
			b.set_dialer(Arc::new(Direct::default()));
			let mut a = Socks5::new(new_socks5("A", mock_a.addr), &cache).unwrap();
			a.set_dialer(Arc::new(b));

			let dst = Metadata::from_socks_addr(Network::Tcp, echo_addr.into());
			let mut conn = a.dial_context(&dst).await.unwrap();
			assert_eq!(conn.chain.names().collect::<Vec<_>>(), vec!["A", "B"]);
			assert_eq!(conn.chain.to_string(), "A -> B");
			echo_stream_test(&mut conn).await;

			// B was asked to connect to A's server.
			let a_port = mock_a.addr.port().to_be_bytes();
			let b_received = mock_b.received.lock().clone();
			assert_eq!(&b_received[3..], &[5, 1, 0, 1, 127, 0, 0, 1, a_port[0], a_port[1]]);
		});
	}

	#[test]
	fn test_socks5_upstream_unreachable() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let addr = {
				let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
				l.local_addr().unwrap()
			};
			let s5 = Socks5::new(new_socks5("s5", addr), &SessionCache::default()).unwrap();
			let dst = Metadata::parse(Network::Tcp, "example.com:80").unwrap();
			let e = s5.dial_context(&dst).await.err().unwrap();
			match e {
				ProtocolError::Dial { addr: a, .. } => assert_eq!(a.as_str(), addr.to_string()),
				e => panic!("unexpected error {}", e),
			}
		});
	}

	#[test]
	fn test_socks5_udp_closed_with_control() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let echo_addr = spawn_udp_echo_server().await;
			let mock = spawn_socks5_server(MockSocks5 {
				close_control_after: Some(Duration::from_millis(500)),
				..MockSocks5::default()
			})
			.await;
			let mut opts = new_socks5("s5", mock.addr);
			opts.udp = true;
			let s5 = Socks5::new(opts, &SessionCache::default()).unwrap();

			let dst = Metadata::from_socks_addr(Network::Udp, echo_addr.into());
			let mut conn = s5.dial_udp(&dst).await.unwrap();
			assert_eq!(conn.chain.to_vec(), vec![Tag::from("s5")]);

			let echo_addr = SocksAddr::from(echo_addr);
			conn.send_dst(&echo_addr, b"ping").await.unwrap();
			let mut buf = [0_u8; 64];
			let (n, src) = timeout(Duration::from_secs(2), conn.recv_src(&mut buf))
				.await
				.unwrap()
				.unwrap();
			assert_eq!(&buf[..n], b"ping");
			assert_eq!(src, echo_addr);

			// The server closes the control connection, which must end the association.
			let res = timeout(Duration::from_secs(3), conn.recv_src(&mut buf))
				.await
				.unwrap();
			assert!(res.is_err());
			assert!(conn.send_dst(&echo_addr, b"ping").await.is_err());
		});
	}
}

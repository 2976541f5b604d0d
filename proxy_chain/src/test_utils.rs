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

use crate::{prelude::*, protocol::dialer::dial_tcp};
use parking_lot::Mutex;
use std::{io, time::Duration};
use tokio::{
	net::{TcpListener, TcpStream, UdpSocket},
	time::timeout,
};
use trust_dns_client::{
	op::{Message, MessageType},
	rr::{RData, Record, RecordType},
};

const SMALL_CHUNK_NUMS: usize = 8;
const SMALL_CHUNK_SIZE: usize = 128;

const LARGE_CHUNK_NUMS: usize = 3;
const LARGE_CHUNK_SIZE: usize = 8 * 1024;

const TIMEOUT_DUR: Duration = Duration::from_millis(2000);

pub fn init_log() {
	let _ = env_logger::builder().is_test(true).try_init();
}

async fn bind_localhost() -> TcpListener {
	TcpListener::bind("127.0.0.1:0").await.unwrap()
}

/// Spawn a TCP server that echoes everything back to every client.
pub async fn spawn_echo_server() -> SocketAddr {
	let listener = bind_localhost().await;
	let local_addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		loop {
			let (mut stream, _) = match listener.accept().await {
				Ok(s) => s,
				Err(_) => return,
			};
			tokio::spawn(async move {
				let mut buffer = [0_u8; 4 * 1024];
				loop {
					let len = stream.read(&mut buffer).await?;
					if len == 0 {
						break;
					}
					trace!("Echo server received {} bytes of data, responding...", len);
					stream.write_all(&buffer[..len]).await?;
				}
				Ok::<(), io::Error>(())
			});
		}
	});
	local_addr
}

pub const BANNER: &[u8] = b"220 ready\r\n";

/// Spawn a TCP server that greets every client with [`BANNER`] before reading anything.
pub async fn spawn_banner_server() -> SocketAddr {
	let listener = bind_localhost().await;
	let local_addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		while let Ok((mut stream, _)) = listener.accept().await {
			tokio::spawn(async move {
				stream.write_all(BANNER).await?;
				let mut buffer = [0_u8; 1024];
				while stream.read(&mut buffer).await? > 0 {}
				Ok::<(), io::Error>(())
			});
		}
	});
	local_addr
}

/// Spawn a UDP server that sends every datagram back to its sender.
pub async fn spawn_udp_echo_server() -> SocketAddr {
	let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	let local_addr = sock.local_addr().unwrap();
	tokio::spawn(async move {
		let mut buf = vec![0_u8; 64 * 1024];
		while let Ok((len, src)) = sock.recv_from(&mut buf).await {
			if sock.send_to(&buf[..len], src).await.is_err() {
				break;
			}
		}
	});
	local_addr
}

/// Write chunks of different sizes into a stream connected to an echo server
/// and check that the same data comes back.
pub async fn echo_stream_test(stream: &mut (impl AsyncRead + AsyncWrite + Unpin)) {
	let mut buffer = Vec::new();
	let mut result_buffer = Vec::new();

	for (nums, size) in [
		(SMALL_CHUNK_NUMS, SMALL_CHUNK_SIZE),
		(LARGE_CHUNK_NUMS, LARGE_CHUNK_SIZE),
	] {
		buffer.resize(size, 0);
		result_buffer.resize(size, 0);
		for i in 0..nums {
			buffer.as_mut_slice().fill((i + 1) as u8);
			stream.write_all(&buffer).await.unwrap();
			timeout(TIMEOUT_DUR, stream.read_exact(&mut result_buffer))
				.await
				.unwrap()
				.unwrap();
			assert_eq!(buffer, result_buffer);
		}
	}
}

#[derive(Clone, Default)]
pub struct MockSocks5 {
	pub auth: Option<(String, String)>,
	/// Close the control connection of every UDP association after this long.
	pub close_control_after: Option<Duration>,
}

pub struct MockSocks5Handle {
	pub addr: SocketAddr,
	/// Handshake bytes received from every client, in order.
	pub received: Arc<Mutex<Vec<u8>>>,
}

/// Spawn a SOCKS5 server that relays CONNECT and UDP ASSOCIATE.
pub async fn spawn_socks5_server(mock: MockSocks5) -> MockSocks5Handle {
	let listener = bind_localhost().await;
	let addr = listener.local_addr().unwrap();
	let received = Arc::new(Mutex::new(Vec::new()));
	let recorded = received.clone();
	tokio::spawn(async move {
		loop {
			let (stream, _) = match listener.accept().await {
				Ok(s) => s,
				Err(_) => return,
			};
			let mock = mock.clone();
			let recorded = recorded.clone();
			tokio::spawn(async move {
				if let Err(e) = serve_socks5(stream, &mock, &recorded).await {
					debug!("mock SOCKS5 server error: {}", e);
				}
			});
		}
	});
	MockSocks5Handle { addr, received }
}

async fn read_recorded(
	stream: &mut TcpStream,
	recorded: &Mutex<Vec<u8>>,
	len: usize,
) -> io::Result<Vec<u8>> {
	let mut buf = vec![0_u8; len];
	stream.read_exact(&mut buf).await?;
	recorded.lock().extend_from_slice(&buf);
	Ok(buf)
}

async fn serve_socks5(
	mut stream: TcpStream,
	mock: &MockSocks5,
	recorded: &Mutex<Vec<u8>>,
) -> Result<(), BoxStdErr> {
	let head = read_recorded(&mut stream, recorded, 2).await?;
	let methods = read_recorded(&mut stream, recorded, head[1].into()).await?;
	if let Some((user, pass)) = &mock.auth {
		if !methods.contains(&2) {
			stream.write_all(&[5, 0xff]).await?;
			return Err("client offered no username method".into());
		}
		stream.write_all(&[5, 2]).await?;
		let ulen = read_recorded(&mut stream, recorded, 2).await?[1];
		let u = read_recorded(&mut stream, recorded, ulen.into()).await?;
		let plen = read_recorded(&mut stream, recorded, 1).await?[0];
		let p = read_recorded(&mut stream, recorded, plen.into()).await?;
		if u != user.as_bytes() || p != pass.as_bytes() {
			stream.write_all(&[1, 1]).await?;
			return Err("wrong credentials".into());
		}
		stream.write_all(&[1, 0]).await?;
	} else {
		stream.write_all(&[5, 0]).await?;
	}

	let req_head = read_recorded(&mut stream, recorded, 3).await?;
	let mut addr_buf = Vec::new();
	let dst = {
		let atyp = read_recorded(&mut stream, recorded, 1).await?[0];
		addr_buf.push(atyp);
		let len = match atyp {
			1 => 4,
			4 => 16,
			3 => {
				let n = read_recorded(&mut stream, recorded, 1).await?[0];
				addr_buf.push(n);
				usize::from(n)
			}
			_ => return Err("unknown address type".into()),
		};
		addr_buf.extend(read_recorded(&mut stream, recorded, len + 2).await?);
		SocksAddr::read_from_bytes(&addr_buf)?.0
	};

	match req_head[1] {
		1 => {
			let mut target = dial_tcp(&dst).await?;
			stream
				.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0])
				.await?;
			tokio::io::copy_bidirectional(&mut stream, &mut target).await?;
		}
		3 => {
			let relay = UdpSocket::bind("127.0.0.1:0").await?;
			let bind_addr = SocksAddr::from(relay.local_addr()?);
			let mut reply = vec![5, 0, 0];
			bind_addr.write_to(&mut reply);
			stream.write_all(&reply).await?;
			let relay_task = tokio::spawn(relay_udp(relay));
			if let Some(dur) = mock.close_control_after {
				tokio::time::sleep(dur).await;
			} else {
				let mut buf = [0_u8; 64];
				while stream.read(&mut buf).await? != 0 {}
			}
			relay_task.abort();
		}
		_ => {
			stream
				.write_all(&[5, 7, 0, 1, 0, 0, 0, 0, 0, 0])
				.await?;
		}
	}
	Ok(())
}

async fn relay_udp(relay: UdpSocket) -> io::Result<()> {
	let mut client = None;
	let mut buf = vec![0_u8; 64 * 1024];
	loop {
		let (len, src) = relay.recv_from(&mut buf).await?;
		if client.is_none() || client == Some(src) {
			client = Some(src);
			let (dst, pos) = match SocksAddr::read_from_bytes(&buf[3..len]) {
				Ok((dst, addr_len)) => (dst, 3 + addr_len),
				Err(_) => continue,
			};
			if let SocksDestination::Ip(ip) = dst.dest {
				relay.send_to(&buf[pos..len], (ip, dst.port)).await?;
			}
		} else if let Some(client) = client {
			let mut packet = vec![0, 0, 0];
			SocksAddr::from(src).write_to(&mut packet);
			packet.extend_from_slice(&buf[..len]);
			relay.send_to(&packet, client).await?;
		}
	}
}

/// Spawn an HTTP server that answers every request with `body`
/// and closes the connection.
pub async fn spawn_http_server(body: &'static str) -> SocketAddr {
	let listener = bind_localhost().await;
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		loop {
			let (mut stream, _) = match listener.accept().await {
				Ok(s) => s,
				Err(_) => return,
			};
			tokio::spawn(async move {
				let mut buf = Vec::with_capacity(1024);
				let mut tmp = [0_u8; 1024];
				loop {
					let len = stream.read(&mut tmp).await?;
					if len == 0 {
						return Ok(());
					}
					buf.extend_from_slice(&tmp[..len]);
					if buf.windows(4).any(|w| w == CRLF_2) {
						break;
					}
				}
				let resp = format!(
					"HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
					body.len(),
					body
				);
				stream.write_all(resp.as_bytes()).await?;
				stream.shutdown().await?;
				Ok::<(), io::Error>(())
			});
		}
	});
	addr
}

/// Spawn a DNS server that answers every A query with `ip`
/// and every other query with an empty answer.
pub async fn spawn_dns_server(ip: Ipv4Addr) -> SocketAddr {
	let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
	let addr = sock.local_addr().unwrap();
	tokio::spawn(async move {
		let mut buf = vec![0_u8; 4 * 1024];
		while let Ok((len, src)) = sock.recv_from(&mut buf).await {
			let req = match Message::from_vec(&buf[..len]) {
				Ok(m) => m,
				Err(_) => continue,
			};
			let mut resp = Message::new();
			resp.set_id(req.id());
			resp.set_message_type(MessageType::Response);
			resp.add_queries(req.queries().to_vec());
			for q in req.queries() {
				if q.query_type() == RecordType::A {
					resp.add_answer(Record::from_rdata(q.name().clone(), 60, RData::A(ip)));
				}
			}
			if let Ok(data) = resp.to_vec() {
				let _ = sock.send_to(&data, src).await;
			}
		}
	});
	addr
}

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
simple-obfs client.

`tls` mode disguises the stream as a TLS 1.2 session,
`http` mode as a websocket upgrade.
*/

use crate::{
	prelude::*,
	protocol::BytesStream,
	utils::{
		codec::{self, FrameReader, FrameWriteHalf},
		timestamp_now,
	},
};
use std::num::NonZeroUsize;

/// Largest payload of one fake TLS record.
const CHUNK_SIZE: usize = 1 << 14;
/// Fake ServerHello and ChangeCipherSpec sent before the first application data.
const FIRST_RESPONSE_DISCARD: usize = 105;
/// Record type and version.
const RECORD_HEAD_DISCARD: usize = 3;
const MAX_HTTP_HEADER_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Tls,
	Http,
}

impl Mode {
	#[must_use]
	pub fn from_name(s: &str) -> Option<Self> {
		match s {
			"tls" => Some(Mode::Tls),
			"http" => Some(Mode::Http),
			_ => None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct Obfs {
	pub mode: Mode,
	pub host: String,
	pub port: u16,
}

impl Obfs {
	#[must_use]
	pub fn wrap(&self, stream: BytesStream) -> BytesStream {
		match self.mode {
			Mode::Tls => {
				let r = FrameReader::new(TlsDecoder::new(), stream.r);
				let w = FrameWriteHalf::new(
					CHUNK_SIZE,
					TlsEncoder {
						server: self.host.clone(),
						first: true,
					},
					stream.w,
				);
				BytesStream::new(Box::new(r), Box::new(w))
			}
			Mode::Http => {
				let host = if self.port == 80 {
					self.host.clone()
				} else {
					format!("{}:{}", self.host, self.port)
				};
				let r = FrameReader::new(HttpDecoder::default(), stream.r);
				let w = FrameWriteHalf::new(
					codec::BUFFER_CAPACITY,
					HttpEncoder { host, first: true },
					stream.w,
				);
				BytesStream::new(Box::new(r), Box::new(w))
			}
		}
	}
}

struct TlsEncoder {
	server: String,
	first: bool,
}

impl codec::Encode for TlsEncoder {
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		if self.first {
			self.first = false;
			put_client_hello(src, &self.server, buf)?;
		} else {
			// Payload is at most CHUNK_SIZE.
			#[allow(clippy::cast_possible_truncation)]
			let len = src.len() as u16;
			buf.put_slice(&[0x17, 0x03, 0x03]);
			buf.put_u16(len);
			buf.put_slice(src);
		}
		Ok(())
	}
}

/// Write a TLS ClientHello carrying `data` as the session ticket.
#[allow(clippy::cast_possible_truncation)]
fn put_client_hello(data: &[u8], server: &str, buf: &mut Vec<u8>) -> Result<(), BoxStdErr> {
	let extra = u16::try_from(data.len() + server.len())
		.ok()
		.filter(|n| *n <= u16::MAX - 212)
		.ok_or("ClientHello too large")?;
	let mut random = [0_u8; 28];
	let mut session_id = [0_u8; 32];
	rand::thread_rng().fill_bytes(&mut random);
	rand::thread_rng().fill_bytes(&mut session_id);

	// Record header: handshake, TLS 1.0.
	buf.put_slice(&[22, 0x03, 0x01]);
	buf.put_u16(212 + extra);

	// ClientHello, TLS 1.2.
	buf.put_slice(&[1, 0]);
	buf.put_u16(208 + extra);
	buf.put_slice(&[0x03, 0x03]);

	// Timestamp truncated into 32 bits.
	buf.put_u32(timestamp_now() as u32);
	buf.put_slice(&random);
	buf.put_u8(32);
	buf.put_slice(&session_id);

	// Cipher suites.
	buf.put_slice(&[0x00, 0x38]);
	buf.put_slice(&[
		0xc0, 0x2c, 0xc0, 0x30, 0x00, 0x9f, 0xcc, 0xa9, 0xcc, 0xa8, 0xcc, 0xaa, 0xc0, 0x2b, 0xc0,
		0x2f, 0x00, 0x9e, 0xc0, 0x24, 0xc0, 0x28, 0x00, 0x6b, 0xc0, 0x23, 0xc0, 0x27, 0x00, 0x67,
		0xc0, 0x0a, 0xc0, 0x14, 0x00, 0x39, 0xc0, 0x09, 0xc0, 0x13, 0x00, 0x33, 0x00, 0x9d, 0x00,
		0x9c, 0x00, 0x3d, 0x00, 0x3c, 0x00, 0x35, 0x00, 0x2f, 0x00, 0xff,
	]);

	// Compression.
	buf.put_slice(&[0x01, 0x00]);

	// Extensions.
	buf.put_u16(79 + extra);

	// Session ticket.
	buf.put_slice(&[0x00, 0x23]);
	buf.put_u16(data.len() as u16);
	buf.put_slice(data);

	// Server name.
	let server_len = server.len() as u16;
	buf.put_slice(&[0x00, 0x00]);
	buf.put_u16(server_len + 5);
	buf.put_u16(server_len + 3);
	buf.put_u8(0);
	buf.put_u16(server_len);
	buf.put_slice(server.as_bytes());

	// EC point formats.
	buf.put_slice(&[0x00, 0x0b, 0x00, 0x04, 0x03, 0x01, 0x00, 0x02]);

	// Supported groups.
	buf.put_slice(&[
		0x00, 0x0a, 0x00, 0x0a, 0x00, 0x08, 0x00, 0x1d, 0x00, 0x17, 0x00, 0x19, 0x00, 0x18,
	]);

	// Signature algorithms.
	buf.put_slice(&[
		0x00, 0x0d, 0x00, 0x20, 0x00, 0x1e, 0x06, 0x01, 0x06, 0x02, 0x06, 0x03, 0x05, 0x01, 0x05,
		0x02, 0x05, 0x03, 0x04, 0x01, 0x04, 0x02, 0x04, 0x03, 0x03, 0x01, 0x03, 0x02, 0x03, 0x03,
		0x02, 0x01, 0x02, 0x02, 0x02, 0x03,
	]);

	// Encrypt then MAC.
	buf.put_slice(&[0x00, 0x16, 0x00, 0x00]);

	// Extended master secret.
	buf.put_slice(&[0x00, 0x17, 0x00, 0x00]);
	Ok(())
}

enum TlsReadState {
	/// Bytes to discard before the 2 bytes length.
	Head(usize),
	Body(NonZeroUsize),
}

struct TlsDecoder {
	state: TlsReadState,
}

impl TlsDecoder {
	fn new() -> Self {
		Self {
			state: TlsReadState::Head(FIRST_RESPONSE_DISCARD),
		}
	}
}

impl codec::Decode for TlsDecoder {
	fn expected_len(&self) -> Option<NonZeroUsize> {
		match &self.state {
			TlsReadState::Head(discard) => NonZeroUsize::new(discard + 2),
			TlsReadState::Body(len) => Some(*len),
		}
	}

	fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr> {
		if buf.is_empty() {
			return match self.state {
				TlsReadState::Head(_) => Ok(true),
				TlsReadState::Body(_) => Err("EOF while reading obfs TLS record".into()),
			};
		}
		let expected = self.expected_len().map_or(0, NonZeroUsize::get);
		if buf.len() < expected {
			return Err("EOF while reading obfs TLS record".into());
		}
		match self.state {
			TlsReadState::Head(discard) => {
				let len = u16::from_be_bytes([buf[discard], buf[discard + 1]]);
				trace!("obfs TLS record of {} bytes", len);
				self.state = match NonZeroUsize::new(len.into()) {
					Some(len) => TlsReadState::Body(len),
					None => TlsReadState::Head(RECORD_HEAD_DISCARD),
				};
				Ok(false)
			}
			TlsReadState::Body(_) => {
				self.state = TlsReadState::Head(RECORD_HEAD_DISCARD);
				Ok(true)
			}
		}
	}
}

struct HttpEncoder {
	host: String,
	first: bool,
}

impl codec::Encode for HttpEncoder {
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		if self.first {
			self.first = false;
			let mut rng = rand::thread_rng();
			let mut key = [0_u8; 16];
			rng.fill_bytes(&mut key);
			let header = format!(
				"GET / HTTP/1.1\r\n\
				Host: {host}\r\n\
				User-Agent: curl/7.{minor}.{patch}\r\n\
				Upgrade: websocket\r\n\
				Connection: Upgrade\r\n\
				Sec-WebSocket-Key: {key}\r\n\
				Content-Length: {len}\r\n\r\n",
				host = self.host,
				minor = rng.gen_range(0..54),
				patch = rng.gen_range(0..2),
				key = base64::encode_config(key, base64::URL_SAFE),
				len = src.len(),
			);
			buf.put_slice(header.as_bytes());
		}
		buf.put_slice(src);
		Ok(())
	}
}

/// Strips the response header.
#[derive(Default)]
pub(crate) struct HttpDecoder {
	header: Vec<u8>,
	done: bool,
}

impl codec::Decode for HttpDecoder {
	fn expected_len(&self) -> Option<NonZeroUsize> {
		None
	}

	fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr> {
		if self.done {
			return Ok(true);
		}
		if buf.is_empty() {
			return Err("EOF while reading obfs HTTP response".into());
		}
		self.header.extend_from_slice(buf);
		let mut headers = [httparse::EMPTY_HEADER; 32];
		let mut resp = httparse::Response::new(&mut headers);
		match resp.parse(&self.header)? {
			httparse::Status::Complete(header_len) => {
				trace!(
					"obfs HTTP response {} ({} bytes header)",
					resp.code.unwrap_or_default(),
					header_len
				);
				self.done = true;
				buf.clear();
				buf.extend_from_slice(&self.header[header_len..]);
				self.header = Vec::new();
				// An empty buffer would be taken as EOF.
				Ok(!buf.is_empty())
			}
			httparse::Status::Partial => {
				if self.header.len() > MAX_HTTP_HEADER_LEN {
					return Err("obfs HTTP response header too long".into());
				}
				buf.clear();
				Ok(false)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::runtime::Runtime;

	#[test]
	fn test_client_hello_lengths() {
		let mut buf = Vec::new();
		put_client_hello(b"payload", "bing.com", &mut buf).unwrap();
		assert_eq!(&buf[..3], &[22, 3, 1]);
		let record_len = usize::from(u16::from_be_bytes([buf[3], buf[4]]));
		assert_eq!(record_len + 5, buf.len());
		assert_eq!(record_len, 212 + 7 + 8);
		let hello_len = usize::from(u16::from_be_bytes([buf[7], buf[8]]));
		assert_eq!(hello_len + 4, record_len);
		// Session ticket holds the payload.
		assert_eq!(&buf[138..142], &[0x00, 0x23, 0x00, 7]);
		assert_eq!(&buf[142..149], b"payload");
	}

	#[test]
	fn test_tls_obfs() {
		Runtime::new().unwrap().block_on(async {
			let (client, mut server) = tokio::io::duplex(64 * 1024);
			let obfs = Obfs {
				mode: Mode::Tls,
				host: "bing.com".into(),
				port: 443,
			};
			let mut client = obfs.wrap(BytesStream::from_io(client));
			client.write_all(b"first").await.unwrap();
			client.write_all(b"second").await.unwrap();

			let mut buf = vec![0_u8; 5 + 212 + 5 + 8];
			server.read_exact(&mut buf).await.unwrap();
			let mut record = [0_u8; 5 + 6];
			server.read_exact(&mut record).await.unwrap();
			assert_eq!(&record, b"\x17\x03\x03\x00\x06second");

			// Fake server hello followed by two records.
			let mut resp = vec![0x16_u8; FIRST_RESPONSE_DISCARD];
			resp.extend_from_slice(&[0, 3]);
			resp.extend_from_slice(b"abc");
			resp.extend_from_slice(&[0x17, 0x03, 0x03, 0, 2]);
			resp.extend_from_slice(b"de");
			server.write_all(&resp).await.unwrap();
			drop(server);

			let mut out = Vec::new();
			client.read_to_end(&mut out).await.unwrap();
			assert_eq!(out, b"abcde");
		});
	}

	#[test]
	fn test_http_obfs() {
		Runtime::new().unwrap().block_on(async {
			let (client, mut server) = tokio::io::duplex(64 * 1024);
			let obfs = Obfs {
				mode: Mode::Http,
				host: "bing.com".into(),
				port: 8080,
			};
			let mut client = obfs.wrap(BytesStream::from_io(client));
			client.write_all(b"hello").await.unwrap();

			let mut req = Vec::new();
			let mut tmp = [0_u8; 1024];
			while !req.ends_with(b"hello") {
				let n = server.read(&mut tmp).await.unwrap();
				assert_ne!(n, 0);
				req.extend_from_slice(&tmp[..n]);
			}
			let mut headers = [httparse::EMPTY_HEADER; 16];
			let mut parsed = httparse::Request::new(&mut headers);
			assert!(parsed.parse(&req).unwrap().is_complete());
			assert_eq!(parsed.method, Some("GET"));
			let host = parsed.headers.iter().find(|h| h.name == "Host").unwrap();
			assert_eq!(host.value, b"bing.com:8080");

			// Header split in two writes.
			server.write_all(b"HTTP/1.1 101 Switching Protocols\r\n").await.unwrap();
			server.flush().await.unwrap();
			server.write_all(b"Upgrade: websocket\r\n\r\nworld").await.unwrap();
			drop(server);

			let mut out = Vec::new();
			client.read_to_end(&mut out).await.unwrap();
			assert_eq!(out, b"world");
		});
	}
}

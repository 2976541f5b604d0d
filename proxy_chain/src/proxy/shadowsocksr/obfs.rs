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

//! ShadowsocksR obfs: `plain`, `http_simple` and `http_post`.

use crate::{
	prelude::*,
	protocol::BytesStream,
	proxy::{shadowsocks::obfs::HttpDecoder, BuildError},
	utils::codec::{self, FrameReader, FrameWriteHalf},
};
use std::fmt::Write;

/// Bytes of the first chunk that always fit in the request path.
const HEAD_LEN: usize = 30;
const MAX_EXTRA_HEAD_LEN: usize = 64;
const BOUNDARY_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const BOUNDARY_LEN: usize = 32;
const USER_AGENTS: [&str; 3] = [
	"Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:86.0) Gecko/20100101 Firefox/86.0",
	"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/89.0.4389.82 Safari/537.36",
	"Mozilla/5.0 (Macintosh; Intel Mac OS X 11_2_3) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.3 Safari/605.1.15",
];

pub enum Obfs {
	Plain,
	Http(HttpObfs),
}

impl Obfs {
	/// # Errors
	///
	/// Returns [`BuildError::UnknownObfs`] if `name` is not supported.
	pub fn new(
		name: &str,
		param: &str,
		server: &str,
		port: u16,
		iv_len: usize,
	) -> Result<Self, BuildError> {
		Ok(match name {
			"plain" => Obfs::Plain,
			"http_simple" => Obfs::Http(HttpObfs::new(false, param, server, port, iv_len)),
			"http_post" => Obfs::Http(HttpObfs::new(true, param, server, port, iv_len)),
			_ => return Err(BuildError::UnknownObfs(name.into())),
		})
	}

	#[must_use]
	pub fn overhead(&self) -> usize {
		0
	}

	#[must_use]
	pub fn wrap(&self, stream: BytesStream) -> BytesStream {
		match self {
			Obfs::Plain => stream,
			Obfs::Http(http) => {
				let r = FrameReader::new(HttpDecoder::default(), stream.r);
				let w = FrameWriteHalf::new(
					codec::BUFFER_CAPACITY,
					HttpEncoder {
						obfs: Some(http.clone()),
					},
					stream.w,
				);
				BytesStream::new(Box::new(r), Box::new(w))
			}
		}
	}
}

#[derive(Clone)]
pub struct HttpObfs {
	post: bool,
	hosts: Vec<String>,
	port: u16,
	/// Custom header lines, each ending with CRLF.
	headers: Option<String>,
	iv_len: usize,
}

impl HttpObfs {
	/// `param` is `host1[,host2]` optionally followed by `#` and custom headers
	/// separated by `\n`.
	fn new(post: bool, param: &str, server: &str, port: u16, iv_len: usize) -> Self {
		let (hosts, headers) = match param.split_once('#') {
			Some((hosts, headers)) => {
				let headers = headers.replace("\\n", "\n").replace('\n', "\r\n");
				(hosts, Some(headers))
			}
			None => (param, None),
		};
		let mut hosts: Vec<String> = hosts
			.split(',')
			.map(str::trim)
			.filter(|h| !h.is_empty())
			.map(String::from)
			.collect();
		if hosts.is_empty() {
			hosts.push(server.into());
		}
		Self {
			post,
			hosts,
			port,
			headers: headers.filter(|h| !h.is_empty()),
			iv_len,
		}
	}

	fn head_len(&self, rng: &mut impl Rng, src_len: usize) -> usize {
		let head_len = self.iv_len + HEAD_LEN;
		if src_len > head_len + MAX_EXTRA_HEAD_LEN {
			head_len + rng.gen_range(0..=MAX_EXTRA_HEAD_LEN)
		} else {
			src_len
		}
	}

	fn write_request(&self, src: &[u8], buf: &mut Vec<u8>) {
		let mut rng = rand::thread_rng();
		let (head, body) = src.split_at(self.head_len(&mut rng, src.len()));
		let host = &self.hosts[rng.gen_range(0..self.hosts.len())];

		let mut req = String::with_capacity(512 + head.len() * 3);
		req.push_str(if self.post { "POST /" } else { "GET /" });
		for b in head {
			// Writing into a String never fails.
			let _ = write!(req, "%{:02x}", b);
		}
		req.push_str(" HTTP/1.1\r\nHost: ");
		req.push_str(host);
		if self.port != 80 {
			let _ = write!(req, ":{}", self.port);
		}
		req.push_str("\r\n");
		if let Some(headers) = &self.headers {
			req.push_str(headers);
			req.push_str("\r\n\r\n");
		} else {
			req.push_str("User-Agent: ");
			req.push_str(USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]);
			req.push_str(
				"\r\nAccept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
				Accept-Language: en-US,en;q=0.8\r\n\
				Accept-Encoding: gzip, deflate\r\n",
			);
			if self.post {
				req.push_str("Content-Type: multipart/form-data; boundary=");
				for _ in 0..BOUNDARY_LEN {
					req.push(char::from(BOUNDARY_CHARS[rng.gen_range(0..BOUNDARY_CHARS.len())]));
				}
				req.push_str("\r\n");
			}
			req.push_str("DNT: 1\r\nConnection: keep-alive\r\n\r\n");
		}
		trace!("SSR obfs request head of {} bytes", head.len());
		buf.put_slice(req.as_bytes());
		buf.put_slice(body);
	}
}

struct HttpEncoder {
	/// Taken by the first write.
	obfs: Option<HttpObfs>,
}

impl codec::Encode for HttpEncoder {
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		if let Some(obfs) = self.obfs.take() {
			obfs.write_request(src, buf);
		} else {
			buf.put_slice(src);
		}
		Ok(())
	}
}

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

//! Websocket client layer, optionally over TLS.

use super::tls;
use crate::{
	prelude::*,
	protocol::{BytesStream, SocksDestination},
	utils::websocket,
};
use http::{HeaderMap, HeaderValue, Request};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
	#[error("header name '{0}' is invalid ({1})")]
	InvalidHeaderName(String, http::header::InvalidHeaderName),
	#[error("header value '{0}' is invalid ({1})")]
	InvalidHeaderValue(String, http::header::InvalidHeaderValue),
	#[error("invalid host '{0}'")]
	InvalidHost(String),
	#[error("non-empty path '{0}' does not start with '/'")]
	PathNotStartsWithSlash(String),
	#[error("invalid websocket request ({0})")]
	Request(#[from] http::Error),
}

#[derive(Clone)]
pub struct Connector {
	host: SocksDestination,
	path: String,
	headers: HeaderMap,
	tls: Option<tls::Connector>,
}

impl Connector {
	/// Create a websocket connector that sends requests for `host` and `path`.
	///
	/// # Errors
	///
	/// Returns a [`BuildError`] if `host`, `path` or any header is invalid.
	pub fn new<'a>(
		host: &str,
		path: &str,
		headers: impl IntoIterator<Item = (&'a str, &'a str)>,
		tls: Option<tls::Connector>,
	) -> Result<Self, BuildError> {
		let host =
			SocksDestination::from_str(host).map_err(|_| BuildError::InvalidHost(host.into()))?;
		let path = if path.is_empty() { "/" } else { path };
		if !path.starts_with('/') {
			return Err(BuildError::PathNotStartsWithSlash(path.into()));
		}
		let mut header_map = HeaderMap::new();
		for (k, v) in headers {
			if k.eq_ignore_ascii_case("host") {
				continue;
			}
			let name = http::header::HeaderName::from_bytes(k.as_bytes())
				.map_err(|e| BuildError::InvalidHeaderName(k.into(), e))?;
			let value =
				HeaderValue::from_str(v).map_err(|e| BuildError::InvalidHeaderValue(v.into(), e))?;
			header_map.insert(name, value);
		}
		Ok(Self {
			host,
			path: path.into(),
			headers: header_map,
			tls,
		})
	}

	fn request(&self) -> Result<Request<()>, http::Error> {
		let scheme = if self.tls.is_some() { "wss" } else { "ws" };
		let host = match &self.host {
			SocksDestination::Ip(IpAddr::V6(ip)) => format!("[{}]", ip),
			host => host.to_string(),
		};
		let mut req = Request::builder()
			.method("GET")
			.uri(format!("{}://{}{}", scheme, host, self.path))
			.body(())?;
		req.headers_mut().extend(self.headers.clone());
		Ok(req)
	}

	/// Run TLS (if enabled) and the websocket handshake over `stream`.
	///
	/// # Errors
	///
	/// Returns an IO error if any handshake fails.
	pub async fn connect(&self, stream: BytesStream) -> io::Result<BytesStream> {
		let request = self
			.request()
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
		if let Some(tls) = &self.tls {
			let stream = tls.connect(stream, &self.host).await?;
			Ok(BytesStream::from_io(websocket::connect(stream, request).await?))
		} else {
			Ok(BytesStream::from_io(websocket::connect(stream, request).await?))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::init_log;
	use async_tungstenite::tokio::accept_async;
	use futures::{SinkExt, StreamExt};
	use tokio::{net::TcpListener, runtime::Runtime};

	#[test]
	fn test_build_errors() {
		assert!(matches!(
			Connector::new("bing.com", "path", None, None),
			Err(BuildError::PathNotStartsWithSlash(_))
		));
		assert!(matches!(
			Connector::new("bing.com", "/", [("bad header", "v")], None),
			Err(BuildError::InvalidHeaderName(..))
		));
		assert!(matches!(
			Connector::new("bing.com", "/", [("X-Key", "bad\nvalue")], None),
			Err(BuildError::InvalidHeaderValue(..))
		));
		assert!(matches!(
			Connector::new("", "/", None, None),
			Err(BuildError::InvalidHost(_))
		));
	}

	#[test]
	fn test_ws_echo() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
			let addr = listener.local_addr().unwrap();
			tokio::spawn(async move {
				let (stream, _) = listener.accept().await.unwrap();
				let mut ws = accept_async(stream).await.unwrap();
				while let Some(Ok(msg)) = ws.next().await {
					if msg.is_binary() {
						ws.send(msg).await.unwrap();
					}
				}
			});

			let connector =
				Connector::new("bing.com", "/ws", [("X-Test", "1"), ("Host", "ignored")], None)
					.unwrap();
			let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
			let mut stream = connector.connect(stream.into()).await.unwrap();
			stream.write_all(b"hello").await.unwrap();
			stream.flush().await.unwrap();
			let mut buf = [0_u8; 5];
			stream.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"hello");
		});
	}
}

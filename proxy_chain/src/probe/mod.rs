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

//! Chain orchestration and the URL latency test.

mod dns;
mod http;

pub use dns::{default_resolver, RESOLVE_TIMEOUT};

use crate::{
	prelude::*,
	protocol::{Error as ProtocolError, Metadata, Network, ProxyAdapter, ProxyConn, TCP_TIMEOUT},
	transport::tls::ConfigError,
};
use bytes::Bytes;
use std::{io, time::Instant};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid URL ({0})")]
	InvalidUrl(String),
	#[error("DNS error ({0})")]
	Dns(BoxStdErr),
	#[error("no address associated with '{0}'")]
	NotResolved(String),
	#[error(transparent)]
	Proxy(#[from] ProtocolError),
	#[error("TLS error ({0})")]
	Tls(io::Error),
	#[error("TLS config error ({0})")]
	TlsConfig(#[from] ConfigError),
	#[error("HTTP error ({0})")]
	Http(#[from] hyper::Error),
	#[error("invalid HTTP request ({0})")]
	Request(#[from] ::http::Error),
	#[error("timeout")]
	Timeout,
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Self {
		Self::Proxy(e.into())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTestReport {
	pub body: Bytes,
	pub latency_ms: u16,
}

/// An adapter with default timeouts.
#[derive(Clone)]
pub struct Proxy {
	adapter: Arc<dyn ProxyAdapter>,
	resolver: SocketAddr,
}

impl Proxy {
	#[must_use]
	pub fn new(adapter: Arc<dyn ProxyAdapter>) -> Self {
		Self {
			adapter,
			resolver: default_resolver(),
		}
	}

	/// Send the DNS queries of [`Proxy::url_test`] to `resolver`.
	#[must_use]
	pub fn with_resolver(mut self, resolver: SocketAddr) -> Self {
		self.resolver = resolver;
		self
	}

	#[inline]
	#[must_use]
	pub fn adapter(&self) -> &Arc<dyn ProxyAdapter> {
		&self.adapter
	}

	/// Call [`ProxyAdapter::dial_context`] within [`TCP_TIMEOUT`].
	///
	/// # Errors
	///
	/// Returns [`ProtocolError::Timeout`] on timeout, or any error from the adapter.
	pub async fn dial(&self, dst: &Metadata) -> Result<ProxyConn, ProtocolError> {
		tokio::time::timeout(TCP_TIMEOUT, self.adapter.dial_context(dst)).await?
	}

	/// Send a GET to `url` through the adapter and measure the time
	/// until the response header arrives.
	///
	/// If `resolve` is true and the host is a domain, it is first resolved
	/// by a DNS query sent through the adapter.
	///
	/// # Errors
	///
	/// Returns an [`Error`] if any step fails. There is no retry.
	pub async fn url_test(&self, url: &str, resolve: bool) -> Result<UrlTestReport, Error> {
		let url = url::Url::parse(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
		let (target, addr) = http::Target::from_url(&url)?;
		let mut md = Metadata::from_socks_addr(Network::Tcp, addr);

		if resolve && !md.resolved() {
			if let Some(host) = md.host().map(ToOwned::to_owned) {
				let ip = dns::resolve(self.adapter.as_ref(), self.resolver, &host).await?;
				debug!("'{}' resolved to {}", host, ip);
				md.resolve_to(ip);
			}
		}

		let start = Instant::now();
		let task = async {
			let conn = self.dial(&md).await?;
			debug!("URL test connected through '{}'", conn.chain);
			let (stream, _) = conn.into_parts();
			http::get(stream, &target).await
		};
		let resp = tokio::time::timeout(TCP_TIMEOUT, task)
			.await
			.map_err(|_| Error::Timeout)??;
		let latency = resp.received.saturating_duration_since(start);
		Ok(UrlTestReport {
			body: resp.body,
			latency_ms: u16::try_from(latency.as_millis()).unwrap_or(u16::MAX),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		proxy::{
			direct::Direct,
			socks5::{Options as Socks5Options, Socks5},
		},
		test_utils::{
			init_log, spawn_dns_server, spawn_http_server, spawn_socks5_server, MockSocks5,
		},
		transport::tls::SessionCache,
	};
	use tokio::runtime::Runtime;

	#[test]
	fn test_url_test_direct() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let server = spawn_http_server("1.2.3.4").await;
			let proxy = Proxy::new(Arc::new(Direct::default()));
			let url = format!("http://{}/", server);
			let report = proxy.url_test(&url, false).await.unwrap();
			assert_eq!(report.body.as_ref(), b"1.2.3.4");
			assert!(report.latency_ms < 5000);
		});
	}

	#[test]
	fn test_url_test_resolve_through_socks5() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let server = spawn_http_server("hello").await;
			let dns = spawn_dns_server(Ipv4Addr::LOCALHOST).await;
			let s5 = spawn_socks5_server(MockSocks5::default()).await;
			let opts = Socks5Options::new("s5", "127.0.0.1", s5.addr.port());
			let adapter = Socks5::new(opts, &SessionCache::default()).unwrap();
			let proxy = Proxy::new(Arc::new(adapter)).with_resolver(dns);
			let url = format!("http://test.example.com:{}/path", server.port());
			let report = proxy.url_test(&url, true).await.unwrap();
			assert_eq!(report.body.as_ref(), b"hello");
		});
	}

	#[test]
	fn test_url_test_unreachable() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
			let addr = listener.local_addr().unwrap();
			drop(listener);
			let proxy = Proxy::new(Arc::new(Direct::default()));
			let res = proxy.url_test(&format!("http://{}/", addr), false).await;
			assert!(matches!(res, Err(Error::Proxy(ProtocolError::Dial { .. }))));
		});
	}

	#[test]
	fn test_url_test_resolve_fails() {
		init_log();
		Runtime::new().unwrap().block_on(async {
			let dns = spawn_dns_server(Ipv4Addr::LOCALHOST).await;
			let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
			let closed = listener.local_addr().unwrap();
			drop(listener);
			let opts = Socks5Options::new("s5", "127.0.0.1", closed.port());
			let adapter = Socks5::new(opts, &SessionCache::default()).unwrap();
			let proxy = Proxy::new(Arc::new(adapter)).with_resolver(dns);
			let res = proxy.url_test("http://example.com/", true).await;
			assert!(matches!(res, Err(Error::Dns(_))));
		});
	}

	#[test]
	fn test_url_test_invalid_url() {
		Runtime::new().unwrap().block_on(async {
			let proxy = Proxy::new(Arc::new(Direct::default()));
			assert!(matches!(
				proxy.url_test("not a url", false).await,
				Err(Error::InvalidUrl(_))
			));
			assert!(matches!(
				proxy.url_test("ftp://example.com/", false).await,
				Err(Error::InvalidUrl(_))
			));
		});
	}
}

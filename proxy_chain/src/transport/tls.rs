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

//! TLS client layer over any [`BytesStream`].

use crate::{
	prelude::*,
	protocol::{BytesStream, SocksDestination},
};
use lazy_static::lazy_static;
use std::{io, time::SystemTime};
use tokio_rustls::rustls::{
	self,
	client::{ClientSessionMemoryCache, ServerCertVerified, ServerCertVerifier},
	Certificate, RootCertStore, ServerName,
};

pub const DEFAULT_SESSION_CACHE_SIZE: usize = 128;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("cannot read native certs ({0})")]
	NativeCerts(String),
	#[error("no valid root certificate")]
	NoRootCert,
}

lazy_static! {
	static ref NATIVE_ROOTS: Result<RootCertStore, String> = load_native_roots();
}

fn load_native_roots() -> Result<RootCertStore, String> {
	let certs = rustls_native_certs::load_native_certs().map_err(|e| e.to_string())?;
	let ders: Vec<Vec<u8>> = certs.into_iter().map(|c| c.0).collect();
	let mut roots = RootCertStore::empty();
	let (added, ignored) = roots.add_parsable_certificates(&ders);
	debug!("Loaded {} native root certs, {} ignored", added, ignored);
	Ok(roots)
}

/// TLS session resumption store shared by every adapter that uses TLS.
///
/// Create one and pass it to every adapter.
#[derive(Clone)]
pub struct SessionCache(Arc<ClientSessionMemoryCache>);

impl SessionCache {
	#[must_use]
	pub fn new(size: usize) -> Self {
		Self(ClientSessionMemoryCache::new(size))
	}
}

impl Default for SessionCache {
	fn default() -> Self {
		Self::new(DEFAULT_SESSION_CACHE_SIZE)
	}
}

/// Accepts any certificate.
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
	fn verify_server_cert(
		&self,
		_end_entity: &Certificate,
		_intermediates: &[Certificate],
		_server_name: &ServerName,
		_scts: &mut dyn Iterator<Item = &[u8]>,
		_ocsp_response: &[u8],
		_now: SystemTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}
}

#[derive(Clone)]
pub struct Connector {
	inner: tokio_rustls::TlsConnector,
}

impl Connector {
	/// Create a TLS connector.
	///
	/// If `skip_cert_verify` is false, the system's root certificates are used.
	/// Sessions are stored in `cache` if there is one.
	///
	/// # Errors
	///
	/// Returns a [`ConfigError`] if the native root certificates cannot be loaded.
	pub fn new<'a>(
		alpns: impl IntoIterator<Item = &'a str>,
		skip_cert_verify: bool,
		cache: Option<&SessionCache>,
	) -> Result<Self, ConfigError> {
		let builder = rustls::ClientConfig::builder().with_safe_defaults();
		let mut config = if skip_cert_verify {
			builder
				.with_custom_certificate_verifier(Arc::new(NoVerifier))
				.with_no_client_auth()
		} else {
			let roots = NATIVE_ROOTS
				.as_ref()
				.map_err(|e| ConfigError::NativeCerts(e.clone()))?;
			if roots.is_empty() {
				return Err(ConfigError::NoRootCert);
			}
			builder
				.with_root_certificates(roots.clone())
				.with_no_client_auth()
		};
		config.alpn_protocols = alpns.into_iter().map(|s| s.as_bytes().to_vec()).collect();
		if let Some(cache) = cache {
			config.session_storage = cache.0.clone();
		}
		Ok(Self {
			inner: Arc::new(config).into(),
		})
	}

	/// Run the TLS handshake over `stream` with `server_name` as SNI.
	///
	/// # Errors
	///
	/// Returns an IO error if the handshake fails or the name is invalid.
	pub async fn connect(
		&self,
		stream: BytesStream,
		server_name: &SocksDestination,
	) -> io::Result<BytesStream> {
		let name = match server_name {
			SocksDestination::Name(name) => ServerName::try_from(name.as_str()).map_err(|e| {
				io::Error::new(
					io::ErrorKind::InvalidInput,
					format!("invalid server name '{}' ({})", name, e),
				)
			})?,
			SocksDestination::Ip(ip) => ServerName::IpAddress(*ip),
		};
		trace!("TLS handshake with '{}'", server_name);
		let stream = self.inner.connect(name, stream).await?;
		Ok(BytesStream::from_io(stream))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_skip_verify_connector() {
		let cache = SessionCache::default();
		assert!(Connector::new(["h2", "http/1.1"], true, Some(&cache)).is_ok());
		assert!(Connector::new(None, true, None).is_ok());
	}

	#[test]
	fn test_connect_bad_peer() {
		// A plain TCP server that closes right away fails the handshake.
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async {
			let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
			let addr = listener.local_addr().unwrap();
			tokio::spawn(async move {
				let (stream, _) = listener.accept().await.unwrap();
				drop(stream);
			});
			let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
			let connector = Connector::new(None, true, None).unwrap();
			let dest = SocksDestination::from_str("example.com").unwrap();
			assert!(connector.connect(stream.into(), &dest).await.is_err());
		});
	}
}

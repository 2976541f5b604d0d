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

use super::{request_header, udp, Command};
use crate::{
	prelude::*,
	protocol::{
		AdapterKind, Base, BytesStream, Error as ProtocolError, Metadata, ProxyAdapter,
		ProxyPacketConn, TCP_TIMEOUT,
	},
	proxy::BuildError,
	transport::tls::{self, SessionCache},
	utils::crypto::sha224_hex,
};

const DEFAULT_ALPN: [&str; 2] = ["h2", "http/1.1"];

#[derive(Debug, Clone)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(rename_all = "kebab-case")
)]
pub struct Options {
	pub name: String,
	pub server: String,
	pub port: u16,
	pub password: String,
	/// Server name used in TLS instead of `server`.
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub sni: Option<String>,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub alpn: Option<Vec<String>>,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub skip_cert_verify: bool,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub udp: bool,
}

impl Options {
	#[must_use]
	pub fn new(
		name: impl Into<String>,
		server: impl Into<String>,
		port: u16,
		password: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			server: server.into(),
			port,
			password: password.into(),
			sni: None,
			alpn: None,
			skip_cert_verify: false,
			udp: false,
		}
	}
}

pub struct Trojan {
	base: Base,
	password_hex: String,
	server_name: SocksDestination,
	tls: tls::Connector,
}

impl Trojan {
	/// Creates a Trojan adapter.
	///
	/// # Errors
	///
	/// Returns a [`BuildError`] if the server address or SNI is invalid,
	/// or if the TLS connector cannot be created.
	pub fn new(opts: Options, cache: &SessionCache) -> Result<Self, BuildError> {
		let server_name =
			SocksDestination::from_str(opts.sni.as_deref().unwrap_or(&opts.server))?;
		let tls = match &opts.alpn {
			Some(alpn) => tls::Connector::new(
				alpn.iter().map(String::as_str),
				opts.skip_cert_verify,
				Some(cache),
			)?,
			None => tls::Connector::new(DEFAULT_ALPN, opts.skip_cert_verify, Some(cache))?,
		};
		let base = Base::new(
			opts.name,
			AdapterKind::Trojan,
			&opts.server,
			opts.port,
			opts.udp,
		)?;
		Ok(Self {
			base,
			password_hex: sha224_hex(opts.password.as_bytes()),
			server_name,
			tls,
		})
	}

	#[inline]
	#[must_use]
	pub fn server_name(&self) -> &SocksDestination {
		&self.server_name
	}

	/// Send the request header over an established (usually TLS) stream.
	pub(super) async fn handshake(
		&self,
		mut stream: BytesStream,
		cmd: Command,
		dst: &SocksAddr,
	) -> Result<BytesStream, ProtocolError> {
		let header = request_header(&self.password_hex, cmd, dst);
		trace!(
			"Sending Trojan request ({} bytes) to '{}'",
			header.len(),
			self.base.addr()
		);
		stream.write_all(&header).await?;
		stream.flush().await?;
		Ok(stream)
	}

	async fn connect(
		&self,
		stream: BytesStream,
		cmd: Command,
		dst: &SocksAddr,
	) -> Result<BytesStream, ProtocolError> {
		let stream = self.tls.connect(stream, &self.server_name).await?;
		self.handshake(stream, cmd, dst).await
	}
}

#[async_trait]
impl ProxyAdapter for Trojan {
	fn base(&self) -> &Base {
		&self.base
	}

	fn base_mut(&mut self) -> &mut Base {
		&mut self.base
	}

	async fn stream_conn(
		&self,
		stream: BytesStream,
		dst: &Metadata,
	) -> Result<BytesStream, ProtocolError> {
		let dst = dst.socks_addr()?;
		debug!(
			"Creating Trojan connection to '{}', dst: '{}'",
			self.base.addr(),
			dst
		);
		self.connect(stream, Command::Connect, &dst).await
	}

	async fn dial_udp(&self, dst: &Metadata) -> Result<ProxyPacketConn, ProtocolError> {
		let addr = dst.socks_addr()?;
		debug!(
			"Creating Trojan UDP tunnel to '{}', dst: '{}'",
			self.base.addr(),
			addr
		);
		let (stream, mut chain) = tokio::time::timeout(TCP_TIMEOUT, async {
			let (stream, chain) = self.base.dial_upstream().await?;
			let stream = self
				.connect(stream, Command::UdpAssociate, &addr)
				.await
				.map_err(|e| e.in_handshake(self.addr()))?;
			Ok::<_, ProtocolError>((stream, chain))
		})
		.await??;
		chain.push(self.name());
		Ok(ProxyPacketConn::new(udp::new_packet_stream(stream), chain))
	}
}

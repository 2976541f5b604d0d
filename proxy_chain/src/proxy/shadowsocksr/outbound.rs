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

use super::{obfs::Obfs, protocol::Protocol};
use crate::{
	prelude::*,
	protocol::{
		AdapterKind, Base, BytesStream, Error as ProtocolError, Metadata, Network, ProxyAdapter,
		ProxyPacketConn,
	},
	proxy::{
		shadowsocks::{stream, udp, Cipher, Method, MethodKind},
		BuildError,
	},
	utils::crypto::stream::Algorithm,
};

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
	pub cipher: String,
	pub obfs: String,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub obfs_param: String,
	pub protocol: String,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub protocol_param: String,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub udp: bool,
}

impl Options {
	/// Options with `plain` obfs and `origin` protocol.
	#[must_use]
	pub fn new(
		name: impl Into<String>,
		server: impl Into<String>,
		port: u16,
		cipher: impl Into<String>,
		password: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			server: server.into(),
			port,
			password: password.into(),
			cipher: cipher.into(),
			obfs: "plain".into(),
			obfs_param: String::new(),
			protocol: "origin".into(),
			protocol_param: String::new(),
			udp: false,
		}
	}
}

/// ShadowsocksR layers: obfs on the raw stream, then the stream cipher,
/// then the protocol.
pub struct ShadowsocksR {
	base: Base,
	cipher: Cipher,
	algo: Algorithm,
	obfs: Obfs,
	protocol: Protocol,
	overhead: usize,
}

impl ShadowsocksR {
	/// Creates a ShadowsocksR adapter.
	///
	/// # Errors
	///
	/// Returns a [`BuildError`] if the server address, cipher, obfs or protocol is invalid.
	pub fn new(opts: Options) -> Result<Self, BuildError> {
		let method = Method::new_from_str(&opts.cipher)
			.ok_or_else(|| BuildError::UnknownCipher(opts.cipher.clone()))?;
		let algo = match method.kind() {
			MethodKind::Stream(algo) => algo,
			MethodKind::Aead(_) | MethodKind::Plain => {
				return Err(BuildError::NotStreamCipher(opts.cipher))
			}
		};
		let cipher = Cipher::new(method, &opts.password);
		let obfs = Obfs::new(
			&opts.obfs,
			&opts.obfs_param,
			&opts.server,
			opts.port,
			algo.iv_len(),
		)?;
		let protocol = Protocol::new(
			&opts.protocol,
			&opts.protocol_param,
			cipher.key(),
			obfs.overhead(),
		)?;
		let overhead = obfs.overhead() + protocol.overhead();
		let base = Base::new(
			opts.name,
			AdapterKind::ShadowsocksR,
			&opts.server,
			opts.port,
			opts.udp,
		)?;
		Ok(Self {
			base,
			cipher,
			algo,
			obfs,
			protocol,
			overhead,
		})
	}

	/// Bytes added by obfs and protocol to each packet.
	#[inline]
	#[must_use]
	pub fn overhead(&self) -> usize {
		self.overhead
	}
}

#[async_trait]
impl ProxyAdapter for ShadowsocksR {
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
			"Creating ShadowsocksR connection to '{}', dst: '{}'",
			self.base.addr(),
			dst
		);
		let stream = self.obfs.wrap(stream);
		let (stream, iv) = stream::new_crypt_stream(stream, self.algo, self.cipher.key())?;
		let mut stream = self.protocol.wrap(stream, &iv);
		stream.write_all(&dst.to_vec()).await?;
		stream.flush().await?;
		Ok(stream)
	}

	async fn dial_udp(&self, dst: &Metadata) -> Result<ProxyPacketConn, ProtocolError> {
		let server_md = self.base.addr_metadata(Network::Udp)?;
		let server = server_md.socks_addr()?;
		debug!(
			"Creating ShadowsocksR UDP socket for '{}' through '{}'",
			dst, server
		);
		let (inner, mut chain) = self.base.dial_upstream_udp(&server_md).await?;
		let mut transforms = Vec::with_capacity(2);
		if let Some(t) = self.protocol.packet_transform() {
			transforms.push(t);
		}
		transforms.push(Arc::new(self.cipher.clone()) as Arc<dyn udp::PacketTransform>);
		let stream = udp::new_packet_stream(inner, server, transforms);
		chain.push(self.name());
		Ok(ProxyPacketConn::new(stream, chain))
	}
}

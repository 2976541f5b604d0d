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

use super::{
	obfs::{self, Obfs},
	udp,
	utils::{Cipher, Method},
	v2ray::V2rayWs,
};
use crate::{
	prelude::*,
	protocol::{
		AdapterKind, Base, BytesStream, Error as ProtocolError, Metadata, Network, ProxyAdapter,
		ProxyPacketConn,
	},
	proxy::BuildError,
	transport::{
		tls::{self, SessionCache},
		ws,
	},
};
use std::collections::BTreeMap;

const DEFAULT_PLUGIN_HOST: &str = "bing.com";
const OBFS_PLUGIN: &str = "obfs";
const V2RAY_PLUGIN: &str = "v2ray-plugin";
const V2RAY_MODE_WEBSOCKET: &str = "websocket";

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
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub udp: bool,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub plugin: Option<String>,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub plugin_opts: PluginOptions,
}

impl Options {
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
			udp: false,
			plugin: None,
			plugin_opts: PluginOptions::default(),
		}
	}
}

/// Options of `obfs` and `v2ray-plugin`.
///
/// `obfs` only reads `mode` and `host`.
#[derive(Debug, Clone, Default)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(rename_all = "kebab-case", default)
)]
pub struct PluginOptions {
	pub mode: String,
	pub host: Option<String>,
	pub path: String,
	pub tls: bool,
	pub skip_cert_verify: bool,
	pub headers: BTreeMap<String, String>,
	pub mux: Option<bool>,
}

enum Plugin {
	Obfs(Obfs),
	V2ray(V2rayWs),
}

impl Plugin {
	fn new(
		name: &str,
		opts: &PluginOptions,
		port: u16,
		cache: &SessionCache,
	) -> Result<Self, BuildError> {
		let host = opts.host.as_deref().unwrap_or(DEFAULT_PLUGIN_HOST);
		match name {
			OBFS_PLUGIN => {
				let mode = obfs::Mode::from_name(&opts.mode).ok_or_else(|| {
					BuildError::InvalidPluginMode {
						plugin: name.into(),
						mode: opts.mode.clone(),
					}
				})?;
				Ok(Plugin::Obfs(Obfs {
					mode,
					host: host.into(),
					port,
				}))
			}
			V2RAY_PLUGIN => {
				if opts.mode != V2RAY_MODE_WEBSOCKET {
					return Err(BuildError::InvalidPluginMode {
						plugin: name.into(),
						mode: opts.mode.clone(),
					});
				}
				let tls = if opts.tls {
					Some(tls::Connector::new(None, opts.skip_cert_verify, Some(cache))?)
				} else {
					None
				};
				let headers = opts.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()));
				let ws = V2rayWs::new(host, &opts.path, headers, tls, opts.mux.unwrap_or(true))
					.map_err(|e| match e {
						ws::BuildError::InvalidHeaderName(..)
						| ws::BuildError::InvalidHeaderValue(..) => {
							BuildError::InvalidHeader(e.to_string())
						}
						e => BuildError::Ws(e),
					})?;
				Ok(Plugin::V2ray(ws))
			}
			_ => Err(BuildError::UnknownPlugin(name.into())),
		}
	}
}

pub struct Shadowsocks {
	base: Base,
	cipher: Cipher,
	plugin: Option<Plugin>,
}

impl Shadowsocks {
	/// Creates a Shadowsocks adapter.
	///
	/// # Errors
	///
	/// Returns a [`BuildError`] if the server address, cipher or plugin is invalid.
	pub fn new(opts: Options, cache: &SessionCache) -> Result<Self, BuildError> {
		let method = Method::new_from_str(&opts.cipher)
			.ok_or_else(|| BuildError::UnknownCipher(opts.cipher.clone()))?;
		let plugin = opts
			.plugin
			.as_deref()
			.map(|name| Plugin::new(name, &opts.plugin_opts, opts.port, cache))
			.transpose()?;
		let base = Base::new(
			opts.name,
			AdapterKind::Shadowsocks,
			&opts.server,
			opts.port,
			opts.udp,
		)?;
		Ok(Self {
			base,
			cipher: Cipher::new(method, &opts.password),
			plugin,
		})
	}

	#[inline]
	#[must_use]
	pub fn method(&self) -> Method {
		self.cipher.method()
	}
}

#[async_trait]
impl ProxyAdapter for Shadowsocks {
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
			"Creating Shadowsocks connection to '{}', dst: '{}'",
			self.base.addr(),
			dst
		);
		let stream = match &self.plugin {
			Some(Plugin::Obfs(obfs)) => obfs.wrap(stream),
			Some(Plugin::V2ray(v2ray)) => v2ray.connect(stream).await?,
			None => stream,
		};
		let mut stream = self.cipher.stream_conn(stream)?;
		stream.write_all(&dst.to_vec()).await?;
		stream.flush().await?;
		Ok(stream)
	}

	async fn dial_udp(&self, dst: &Metadata) -> Result<ProxyPacketConn, ProtocolError> {
		let server_md = self.base.addr_metadata(Network::Udp)?;
		let server = server_md.socks_addr()?;
		debug!(
			"Creating Shadowsocks UDP socket for '{}' through '{}'",
			dst, server
		);
		let (inner, mut chain) = self.base.dial_upstream_udp(&server_md).await?;
		let transforms: Vec<Arc<dyn udp::PacketTransform>> = vec![Arc::new(self.cipher.clone())];
		let stream = udp::new_packet_stream(inner, server, transforms);
		chain.push(self.name());
		Ok(ProxyPacketConn::new(stream, chain))
	}
}

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
Outbound adapters and the option records that build them.
*/

pub mod direct;
pub mod shadowsocks;
pub mod shadowsocksr;
pub mod socks5;
pub mod trojan;

use crate::{
	protocol::{socks_addr::ReadError, ProxyAdapter},
	transport::{
		tls::{ConfigError, SessionCache},
		ws,
	},
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
	#[error("invalid server address ({0})")]
	InvalidServer(#[from] ReadError),
	#[error("unknown cipher '{0}'")]
	UnknownCipher(String),
	#[error("'{0}' is not a stream cipher")]
	NotStreamCipher(String),
	#[error("unknown plugin '{0}'")]
	UnknownPlugin(String),
	#[error("invalid mode '{mode}' for plugin '{plugin}'")]
	InvalidPluginMode { plugin: String, mode: String },
	#[error("invalid header ({0})")]
	InvalidHeader(String),
	#[error("websocket error ({0})")]
	Ws(ws::BuildError),
	#[error("unknown obfs '{0}'")]
	UnknownObfs(String),
	#[error("unknown protocol '{0}'")]
	UnknownProtocol(String),
	#[error("invalid parameter ({0})")]
	InvalidParam(String),
	#[error("TLS error ({0})")]
	Tls(#[from] ConfigError),
	#[error("unknown adapter type '{0}'")]
	UnknownType(String),
	#[cfg(feature = "use_serde")]
	#[error("cannot decode options ({0})")]
	Deserialize(serde_json::Error),
}

/// Options of any adapter, tagged by `type`.
#[derive(Debug, Clone)]
#[cfg_attr(
	feature = "use_serde",
	derive(serde::Deserialize),
	serde(tag = "type", rename_all = "lowercase")
)]
pub enum AdapterConfig {
	Direct(direct::Options),
	Socks5(socks5::Options),
	#[cfg_attr(feature = "use_serde", serde(rename = "ss"))]
	Shadowsocks(shadowsocks::Options),
	#[cfg_attr(feature = "use_serde", serde(rename = "ssr"))]
	ShadowsocksR(shadowsocksr::Options),
	Trojan(trojan::Options),
}

impl AdapterConfig {
	#[must_use]
	pub fn name(&self) -> &str {
		match self {
			AdapterConfig::Direct(o) => &o.name,
			AdapterConfig::Socks5(o) => &o.name,
			AdapterConfig::Shadowsocks(o) => &o.name,
			AdapterConfig::ShadowsocksR(o) => &o.name,
			AdapterConfig::Trojan(o) => &o.name,
		}
	}

	/// Validate the options and create the adapter.
	///
	/// # Errors
	///
	/// Returns a [`BuildError`] if any option is invalid.
	pub fn build(self, cache: &SessionCache) -> Result<Box<dyn ProxyAdapter>, BuildError> {
		Ok(match self {
			AdapterConfig::Direct(o) => Box::new(direct::Direct::new(o.name)),
			AdapterConfig::Socks5(o) => Box::new(socks5::Socks5::new(o, cache)?),
			AdapterConfig::Shadowsocks(o) => Box::new(shadowsocks::Shadowsocks::new(o, cache)?),
			AdapterConfig::ShadowsocksR(o) => Box::new(shadowsocksr::ShadowsocksR::new(o)?),
			AdapterConfig::Trojan(o) => Box::new(trojan::Trojan::new(o, cache)?),
		})
	}
}

const KNOWN_TYPES: [&str; 5] = ["direct", "socks5", "ss", "ssr", "trojan"];

/// Decode an adapter from a loosely typed map and build it.
///
/// # Errors
///
/// Returns [`BuildError::UnknownType`] if `type` is not a known adapter,
/// [`BuildError::Deserialize`] if `type` is missing or any field has the wrong shape,
/// or any error from [`AdapterConfig::build`].
#[cfg(feature = "use_serde")]
pub fn parse_proxy(
	map: &serde_json::Map<String, serde_json::Value>,
	cache: &SessionCache,
) -> Result<Box<dyn ProxyAdapter>, BuildError> {
	if let Some(kind) = map.get("type").and_then(serde_json::Value::as_str) {
		if !KNOWN_TYPES.contains(&kind) {
			return Err(BuildError::UnknownType(kind.into()));
		}
	}
	let config: AdapterConfig = serde_json::from_value(serde_json::Value::Object(map.clone()))
		.map_err(BuildError::Deserialize)?;
	config.build(cache)
}

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
	dialer, socks_addr::ReadError, BytesStream, Chain, Error, Metadata, Network, PacketStream,
	ProxyConn, ProxyPacketConn, SocksDestination,
};
use crate::prelude::*;
use std::{
	fmt::{self, Display},
	time::Duration,
};

/// Bound applied to dialing and handshakes when the caller gives none.
pub const TCP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
	Direct,
	Socks5,
	Shadowsocks,
	ShadowsocksR,
	Trojan,
}

impl AdapterKind {
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			AdapterKind::Direct => "Direct",
			AdapterKind::Socks5 => "Socks5",
			AdapterKind::Shadowsocks => "Shadowsocks",
			AdapterKind::ShadowsocksR => "ShadowsocksR",
			AdapterKind::Trojan => "Trojan",
		}
	}
}

impl Display for AdapterKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// State shared by every adapter.
pub struct Base {
	name: Tag,
	kind: AdapterKind,
	addr: Tag,
	addr_metadata: Option<Metadata>,
	udp: bool,
	dialer: Option<Arc<dyn ProxyAdapter>>,
}

impl Base {
	/// Create a base for an adapter whose server is `server:port`.
	///
	/// # Errors
	///
	/// Returns a [`ReadError`] if `server` is neither an IP nor a valid domain.
	pub fn new(
		name: impl Into<Tag>,
		kind: AdapterKind,
		server: &str,
		port: u16,
		udp: bool,
	) -> Result<Self, ReadError> {
		let dest = SocksDestination::from_str(server)?;
		let addr_metadata = Metadata::new(Network::Tcp, dest, port);
		Ok(Self {
			name: name.into(),
			kind,
			addr: addr_metadata.remote_address().into(),
			addr_metadata: Some(addr_metadata),
			udp,
			dialer: None,
		})
	}

	/// Create a base for an adapter that has no server of its own.
	#[must_use]
	pub fn without_addr(name: impl Into<Tag>, kind: AdapterKind, udp: bool) -> Self {
		Self {
			name: name.into(),
			kind,
			addr: Tag::default(),
			addr_metadata: None,
			udp,
			dialer: None,
		}
	}

	#[inline]
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[inline]
	#[must_use]
	pub fn kind(&self) -> AdapterKind {
		self.kind
	}

	#[inline]
	#[must_use]
	pub fn addr(&self) -> &str {
		&self.addr
	}

	#[inline]
	#[must_use]
	pub fn support_udp(&self) -> bool {
		self.udp
	}

	#[inline]
	pub fn set_dialer(&mut self, dialer: Arc<dyn ProxyAdapter>) {
		self.dialer = Some(dialer);
	}

	#[inline]
	#[must_use]
	pub fn dialer(&self) -> Option<&Arc<dyn ProxyAdapter>> {
		self.dialer.as_ref()
	}

	/// Own server address with `network`.
	///
	/// # Errors
	///
	/// Returns [`Error::Unsupported`] if the adapter has no server.
	pub fn addr_metadata(&self, network: Network) -> Result<Metadata, Error> {
		let md = self
			.addr_metadata
			.as_ref()
			.ok_or(Error::Unsupported("dialing an adapter without address"))?;
		Ok(Metadata::from_socks_addr(network, md.socks_addr()?))
	}

	/// Connect to this adapter's own address through the upstream,
	/// or through the OS if there is none.
	///
	/// # Errors
	///
	/// Returns [`Error::Dial`] annotated with this adapter's address.
	pub async fn dial_upstream(&self) -> Result<(BytesStream, Chain), Error> {
		let md = self.addr_metadata(Network::Tcp)?;
		let res = if let Some(dialer) = &self.dialer {
			dialer.dial_context(&md).await.map(ProxyConn::into_parts)
		} else {
			match md.socks_addr() {
				Ok(addr) => dialer::dial_tcp(&addr)
					.await
					.map(|s| (s.into(), Chain::new()))
					.map_err(Error::from),
				Err(e) => Err(e),
			}
		};
		res.map_err(|e| {
			debug!("{} '{}' cannot dial '{}' ({})", self.kind, self.name, self.addr, e);
			Error::new_dial(self.addr.clone(), e)
		})
	}

	/// Get a datagram socket from the upstream, or from the OS if there is none.
	///
	/// `dst` is the address datagrams will be sent to.
	///
	/// # Errors
	///
	/// Returns [`Error::Dial`] annotated with this adapter's address.
	pub async fn dial_upstream_udp(&self, dst: &Metadata) -> Result<(PacketStream, Chain), Error> {
		let res = if let Some(dialer) = &self.dialer {
			dialer.dial_udp(dst).await.map(ProxyPacketConn::into_parts)
		} else {
			match dst.socks_addr() {
				Ok(addr) => dialer::bind_udp(&addr)
					.await
					.map(|s| (s, Chain::new()))
					.map_err(Error::from),
				Err(e) => Err(e),
			}
		};
		res.map_err(|e| Error::new_dial(self.addr.clone(), e))
	}
}

#[cfg(feature = "use_serde")]
impl serde::Serialize for Base {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		use serde::ser::SerializeMap;
		let mut map = serializer.serialize_map(Some(1))?;
		map.serialize_entry("type", self.kind.as_str())?;
		map.end()
	}
}

/// Capabilities shared by every outbound protocol.
///
/// An adapter can be used directly, or as the upstream dialer of another
/// adapter through [`ProxyAdapter::set_dialer`].
#[async_trait]
pub trait ProxyAdapter: Send + Sync {
	fn base(&self) -> &Base;

	fn base_mut(&mut self) -> &mut Base;

	#[inline]
	fn name(&self) -> &str {
		self.base().name()
	}

	#[inline]
	fn kind(&self) -> AdapterKind {
		self.base().kind()
	}

	/// Own server address, not the destination.
	#[inline]
	fn addr(&self) -> &str {
		self.base().addr()
	}

	#[inline]
	fn support_udp(&self) -> bool {
		self.base().support_udp()
	}

	/// Use `dialer` to reach this adapter's own address.
	#[inline]
	fn set_dialer(&mut self, dialer: Arc<dyn ProxyAdapter>) {
		self.base_mut().set_dialer(dialer);
	}

	/// Do the handshake for `dst` over `stream` and return the transformed stream.
	///
	/// # Errors
	///
	/// Returns [`Error::Unsupported`] by default.
	async fn stream_conn(&self, stream: BytesStream, dst: &Metadata) -> Result<BytesStream, Error> {
		let _ = (stream, dst);
		Err(Error::Unsupported("stream_conn"))
	}

	/// Dial own address through the upstream, then run [`ProxyAdapter::stream_conn`].
	///
	/// # Errors
	///
	/// Returns [`Error::Dial`] if the upstream fails,
	/// or [`Error::Handshake`] if the handshake fails.
	async fn dial_context(&self, dst: &Metadata) -> Result<ProxyConn, Error> {
		let (stream, mut chain) = self.base().dial_upstream().await?;
		let stream = self
			.stream_conn(stream, dst)
			.await
			.map_err(|e| e.in_handshake(self.addr()))?;
		chain.push(self.name());
		Ok(ProxyConn::new(stream, chain))
	}

	/// Get a datagram socket that relays to `dst` through this adapter.
	///
	/// # Errors
	///
	/// Returns [`Error::Unsupported`] by default.
	async fn dial_udp(&self, dst: &Metadata) -> Result<ProxyPacketConn, Error> {
		let _ = dst;
		Err(Error::Unsupported("dial_udp"))
	}
}

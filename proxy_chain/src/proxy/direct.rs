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

use crate::{
	prelude::*,
	protocol::{
		dialer, AdapterKind, Base, BytesStream, Chain, Error, Metadata, ProxyAdapter, ProxyConn,
		ProxyPacketConn,
	},
};

pub const PROTOCOL_NAME: &str = "direct";
pub const DEFAULT_NAME: &str = "DIRECT";

#[derive(Debug, Clone)]
#[cfg_attr(feature = "use_serde", derive(serde::Deserialize))]
pub struct Options {
	#[cfg_attr(feature = "use_serde", serde(default = "default_name"))]
	pub name: String,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			name: default_name(),
		}
	}
}

fn default_name() -> String {
	DEFAULT_NAME.into()
}

/// Connects to the destination with the operating system's network.
///
/// Direct leaves no entry in the connection's [`Chain`].
pub struct Direct {
	base: Base,
}

impl Direct {
	#[must_use]
	pub fn new(name: impl Into<Tag>) -> Self {
		Self {
			base: Base::without_addr(name, AdapterKind::Direct, true),
		}
	}
}

impl Default for Direct {
	fn default() -> Self {
		Self::new(DEFAULT_NAME)
	}
}

#[async_trait]
impl ProxyAdapter for Direct {
	#[inline]
	fn base(&self) -> &Base {
		&self.base
	}

	#[inline]
	fn base_mut(&mut self) -> &mut Base {
		&mut self.base
	}

	async fn stream_conn(&self, stream: BytesStream, _dst: &Metadata) -> Result<BytesStream, Error> {
		Ok(stream)
	}

	async fn dial_context(&self, dst: &Metadata) -> Result<ProxyConn, Error> {
		let addr = dst.socks_addr()?;
		debug!("Creating direct connection to '{}'", addr);
		let stream = dialer::dial_tcp(&addr)
			.await
			.map_err(|e| Error::new_dial(addr.to_string(), e))?;
		Ok(ProxyConn::new(stream.into(), Chain::new()))
	}

	async fn dial_udp(&self, dst: &Metadata) -> Result<ProxyPacketConn, Error> {
		debug!("Creating direct UDP socket for '{}'", dst);
		let stream = dialer::bind_udp(&dst.socks_addr()?)
			.await
			.map_err(|e| Error::new_dial(dst.remote_address(), e))?;
		Ok(ProxyPacketConn::new(stream, Chain::new()))
	}
}

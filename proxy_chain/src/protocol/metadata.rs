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
	socks_addr::{AddrType, DomainName, ReadError},
	Error, Network, SocksAddr, SocksDestination,
};
use crate::prelude::*;
use std::fmt::{self, Display};

/// Where a connection should end up.
///
/// Holds either a host name or an IP. A host is replaced by an IP
/// at most once, by [`Metadata::resolve_to`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "use_serde", derive(serde::Serialize))]
pub struct Metadata {
	network: Network,
	#[cfg_attr(feature = "use_serde", serde(rename = "destinationIP"))]
	dst_ip: Option<IpAddr>,
	#[cfg_attr(feature = "use_serde", serde(rename = "destinationPort"))]
	dst_port: u16,
	host: Option<DomainName>,
}

impl Metadata {
	#[must_use]
	pub fn new(network: Network, dest: SocksDestination, port: u16) -> Self {
		let (dst_ip, host) = match dest {
			SocksDestination::Ip(ip) => (Some(ip), None),
			SocksDestination::Name(name) => (None, Some(name)),
		};
		Self {
			network,
			dst_ip,
			dst_port: port,
			host,
		}
	}

	/// Parse 'host:port', 'ipv4:port' or '\[ipv6\]:port'.
	///
	/// # Errors
	///
	/// Returns a [`ReadError`] if the port is missing or invalid,
	/// or the host is not a valid IP or domain.
	pub fn parse(network: Network, s: &str) -> Result<Self, ReadError> {
		let addr = SocksAddr::parse_str(s)?;
		Ok(Self::from_socks_addr(network, addr))
	}

	#[inline]
	#[must_use]
	pub fn from_socks_addr(network: Network, addr: SocksAddr) -> Self {
		Self::new(network, addr.dest, addr.port)
	}

	#[inline]
	#[must_use]
	pub fn network(&self) -> Network {
		self.network
	}

	#[inline]
	#[must_use]
	pub fn dst_ip(&self) -> Option<IpAddr> {
		self.dst_ip
	}

	#[inline]
	#[must_use]
	pub fn dst_port(&self) -> u16 {
		self.dst_port
	}

	#[inline]
	#[must_use]
	pub fn host(&self) -> Option<&str> {
		self.host.as_ref().map(DomainName::as_str)
	}

	#[inline]
	#[must_use]
	pub fn resolved(&self) -> bool {
		self.dst_ip.is_some()
	}

	#[inline]
	#[must_use]
	pub fn valid(&self) -> bool {
		self.host.is_some() || self.dst_ip.is_some()
	}

	#[must_use]
	pub fn addr_type(&self) -> AddrType {
		match (&self.host, self.dst_ip) {
			(None, Some(IpAddr::V4(_))) => AddrType::Ipv4,
			(None, Some(IpAddr::V6(_))) => AddrType::Ipv6,
			_ => AddrType::Name,
		}
	}

	/// Replace the host with `ip`.
	pub fn resolve_to(&mut self, ip: IpAddr) {
		self.dst_ip = Some(ip);
		self.host = None;
	}

	/// Destination in SOCKS5 wire form.
	///
	/// # Errors
	///
	/// Returns [`Error::InvalidDestination`] if neither host nor IP is set.
	pub fn socks_addr(&self) -> Result<SocksAddr, Error> {
		let dest = match (&self.host, self.dst_ip) {
			(Some(host), _) => SocksDestination::Name(host.clone()),
			(None, Some(ip)) => SocksDestination::Ip(ip),
			(None, None) => return Err(Error::InvalidDestination("empty metadata".into())),
		};
		Ok(SocksAddr::new(dest, self.dst_port))
	}

	/// 'host:port', with IPv6 in brackets.
	#[must_use]
	pub fn remote_address(&self) -> String {
		match (&self.host, self.dst_ip) {
			(Some(host), _) => format!("{}:{}", host, self.dst_port),
			(None, Some(ip)) => SocketAddr::new(ip, self.dst_port).to_string(),
			(None, None) => format!(":{}", self.dst_port),
		}
	}
}

impl Display for Metadata {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (&self.host, self.dst_ip) {
			(Some(host), _) => host.fmt(f),
			(None, Some(ip)) => ip.fmt(f),
			(None, None) => f.write_str("<nil>"),
		}
	}
}

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
SOCKS5 style address, used on the wire by SOCKS5, Shadowsocks,
ShadowsocksR and Trojan.

```not_rust
+------+----------+----------+
| ATYP | DST.ADDR | DST.PORT |
+------+----------+----------+
|  1   | Variable |    2     |
+------+----------+----------+
```

See more at <https://tools.ietf.org/html/rfc1928#section-5>
*/

use crate::{prelude::*, utils::ReadInt};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smol_str::SmolStr;
use std::{
	fmt::{self, Display},
	io,
};

const EMPTY_STRING: &str = "empty string";
/// Domain length is stored in a single byte.
pub const MAX_DOMAIN_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "use_serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum AddrType {
	Ipv4 = 1_u8,
	Name = 3_u8,
	Ipv6 = 4_u8,
}

impl AddrType {
	#[inline]
	#[must_use]
	pub const fn val(self) -> u8 {
		self as u8
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
	#[error("str is not utf8 ({0})")]
	StrNotUtf8(std::str::Utf8Error),
	#[error("unknown address type {0}")]
	UnknownAddressType(u8),
	#[error("invalid domain ({0})")]
	InvalidDomain(BoxStdErr),
	#[error("invalid port ({0})")]
	InvalidPort(BoxStdErr),
	#[error("invalid address ({0})")]
	InvalidAddress(BoxStdErr),
	#[error("IO error ({0})")]
	Io(#[from] io::Error),
}

impl ReadError {
	#[must_use]
	pub fn into_io_err(self) -> io::Error {
		if let Self::Io(e) = self {
			e
		} else {
			io::Error::new(io::ErrorKind::InvalidData, self)
		}
	}
}

// -------------------------------------------------------
//                     SocksDestination
// -------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SocksDestination {
	/// Must be a valid domain name.
	Name(DomainName),
	Ip(IpAddr),
}

impl SocksDestination {
	/// Create a new `SocksDestination` from [`str`].
	///
	/// # Errors
	///
	/// Return a [`ReadError`] if `value` is not a valid domain name.
	#[inline]
	pub fn new_domain(value: impl AsRef<str>) -> Result<Self, ReadError> {
		DomainName::from_str(value.as_ref()).map(SocksDestination::Name)
	}

	#[inline]
	#[must_use]
	pub fn atyp(&self) -> AddrType {
		match self {
			SocksDestination::Name(_) => AddrType::Name,
			SocksDestination::Ip(IpAddr::V4(_)) => AddrType::Ipv4,
			SocksDestination::Ip(IpAddr::V6(_)) => AddrType::Ipv6,
		}
	}

	/// Read a destination of address type `atyp` from `r`.
	///
	/// - [`AddrType::Ipv4`]: | 4 bytes |
	/// - [`AddrType::Ipv6`]: | 16 bytes |
	/// - [`AddrType::Name`]: | n, 1 byte | n bytes |
	///
	/// # Errors
	///
	/// Returns [`ReadError::InvalidDomain`] if the domain is empty or not UTF-8.
	pub fn read_from_atyp<R>(r: &mut R, atyp: AddrType) -> Result<Self, ReadError>
	where
		R: std::io::Read,
	{
		Ok(match atyp {
			AddrType::Ipv4 => Ipv4Addr::from(r.read_arr::<4>()?).into(),
			AddrType::Ipv6 => Ipv6Addr::from(r.read_arr::<16>()?).into(),
			AddrType::Name => {
				let len = usize::from(r.read_u8()?);
				let mut buffer = [0_u8; MAX_DOMAIN_LEN];
				let buffer = &mut buffer[..len];
				r.read_exact(buffer)?;
				Self::Name(DomainName::from_wire(buffer)?)
			}
		})
	}

	/// This is the async version of [`Self::read_from_atyp`].
	///
	/// # Errors
	///
	/// Same as [`Self::read_from_atyp`].
	pub async fn async_read_from_atyp(
		r: &mut (impl AsyncRead + Unpin),
		atyp: AddrType,
	) -> Result<Self, ReadError> {
		Ok(match atyp {
			AddrType::Ipv4 => Ipv4Addr::from(r.read_u32().await?).into(),
			AddrType::Ipv6 => Ipv6Addr::from(r.read_u128().await?).into(),
			AddrType::Name => {
				let len = usize::from(r.read_u8().await?);
				let mut buffer = [0_u8; MAX_DOMAIN_LEN];
				let buffer = &mut buffer[..len];
				r.read_exact(buffer).await?;
				Self::Name(DomainName::from_wire(buffer)?)
			}
		})
	}

	pub fn write_to_no_atyp(&self, buf: &mut impl BufMut) {
		match self {
			SocksDestination::Name(name) => {
				buf.put_u8(name.len());
				buf.put(name.as_bytes());
			}
			SocksDestination::Ip(IpAddr::V4(ip)) => buf.put_slice(&ip.octets()),
			SocksDestination::Ip(IpAddr::V6(ip)) => buf.put_slice(&ip.octets()),
		}
	}

	/// Length of the serialized destination, including ATYP.
	#[inline]
	#[must_use]
	pub fn serialized_len_atyp(&self) -> usize {
		1 + match self {
			SocksDestination::Ip(IpAddr::V4(_)) => 4,
			SocksDestination::Ip(IpAddr::V6(_)) => 16,
			SocksDestination::Name(name) => 1 + usize::from(name.len()),
		}
	}
}

impl FromStr for SocksDestination {
	type Err = ReadError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if let Ok(ip) = IpAddr::from_str(s) {
			return Ok(Self::Ip(ip));
		}
		DomainName::from_str(s).map(Self::Name)
	}
}

impl From<DomainName> for SocksDestination {
	#[inline]
	fn from(domain: DomainName) -> Self {
		Self::Name(domain)
	}
}

impl From<Ipv4Addr> for SocksDestination {
	#[inline]
	fn from(ip: Ipv4Addr) -> Self {
		Self::Ip(ip.into())
	}
}

impl From<Ipv6Addr> for SocksDestination {
	#[inline]
	fn from(ip: Ipv6Addr) -> Self {
		Self::Ip(ip.into())
	}
}

impl From<IpAddr> for SocksDestination {
	#[inline]
	fn from(ip: IpAddr) -> Self {
		Self::Ip(ip)
	}
}

impl Display for SocksDestination {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Ip(ip) => ip.fmt(f),
			Self::Name(name) => name.fmt(f),
		}
	}
}

// -------------------------------------------------------
//                       SocksAddr
// -------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocksAddr {
	pub dest: SocksDestination,
	pub port: u16,
}

impl SocksAddr {
	#[inline]
	#[must_use]
	pub fn new(dest: SocksDestination, port: u16) -> Self {
		Self { dest, port }
	}

	/// Read an address in SOCKS5 format from `r`.
	///
	/// # Errors
	///
	/// Returns [`ReadError::UnknownAddressType`] on a bad ATYP,
	/// or any error from [`SocksDestination::read_from_atyp`].
	pub fn read_from<R>(r: &mut R) -> Result<Self, ReadError>
	where
		R: std::io::Read,
	{
		let atyp_num = r.read_u8()?;
		let atyp =
			AddrType::try_from(atyp_num).map_err(|_| ReadError::UnknownAddressType(atyp_num))?;
		let dest = SocksDestination::read_from_atyp(r, atyp)?;
		let port = r.read_u16()?;
		Ok(Self::new(dest, port))
	}

	/// Read an address from the front of `buf`.
	///
	/// Returns the address and the number of bytes it takes.
	///
	/// # Errors
	///
	/// Same as [`Self::read_from`].
	#[inline]
	pub fn read_from_bytes(buf: &[u8]) -> Result<(Self, usize), ReadError> {
		let mut cur = std::io::Cursor::new(buf);
		let addr = Self::read_from(&mut cur)?;
		Ok((addr, buf.len() - cur.remaining()))
	}

	/// This is the async version of [`Self::read_from`].
	///
	/// # Errors
	///
	/// Same as [`Self::read_from`].
	pub async fn async_read_from<R>(r: &mut R) -> Result<Self, ReadError>
	where
		R: AsyncRead + Unpin,
	{
		let atyp_num = r.read_u8().await?;
		let atyp =
			AddrType::try_from(atyp_num).map_err(|_| ReadError::UnknownAddressType(atyp_num))?;
		let dest = SocksDestination::async_read_from_atyp(r, atyp).await?;
		let port = r.read_u16().await?;
		Ok(Self::new(dest, port))
	}

	/// Number of bytes the serialized address takes.
	#[inline]
	#[must_use]
	pub fn serialized_len_atyp(&self) -> usize {
		self.dest.serialized_len_atyp() + 2
	}

	/// Write the address into `buf` in SOCKS5 format.
	#[inline]
	pub fn write_to<B: BufMut>(&self, buf: &mut B) {
		buf.put_u8(self.dest.atyp().val());
		self.dest.write_to_no_atyp(buf);
		buf.put_u16(self.port);
	}

	#[must_use]
	pub fn to_vec(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(self.serialized_len_atyp());
		self.write_to(&mut buf);
		buf
	}

	/// Parse 'host:port', 'ipv4:port' or '\[ipv6\]:port'.
	///
	/// # Errors
	///
	/// Returns a [`ReadError`] if the port is missing or the host is invalid.
	pub fn parse_str(s: &str) -> Result<Self, ReadError> {
		if let Ok(addr) = s.parse::<SocketAddr>() {
			return Ok(addr.into());
		}
		if s.is_empty() {
			return Err(ReadError::InvalidAddress(EMPTY_STRING.into()));
		}
		let (host, port) = s
			.rsplit_once(':')
			.ok_or_else(|| ReadError::InvalidAddress("missing port".into()))?;
		if port.is_empty() {
			return Err(ReadError::InvalidAddress("missing port".into()));
		}
		if host.contains(':') || host.starts_with('[') {
			return Err(ReadError::InvalidAddress(
				format!("invalid host '{}'", host).into(),
			));
		}
		let port = port
			.parse::<u16>()
			.map_err(|e| ReadError::InvalidPort(e.into()))?;
		Ok(Self::new(SocksDestination::from_str(host)?, port))
	}
}

impl FromStr for SocksAddr {
	type Err = ReadError;

	#[inline]
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse_str(s)
	}
}

impl Display for SocksAddr {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.dest {
			SocksDestination::Name(name) => write!(f, "{}:{}", name, self.port),
			SocksDestination::Ip(ip) => SocketAddr::new(*ip, self.port).fmt(f),
		}
	}
}

impl From<SocketAddr> for SocksAddr {
	#[inline]
	fn from(addr: SocketAddr) -> Self {
		Self::new(addr.ip().into(), addr.port())
	}
}

// -------------------------------------------------------
//                     DomainName
// -------------------------------------------------------

/// An ASCII domain that's guaranteed to be 1 to 255 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "use_serde", derive(serde::Serialize))]
pub struct DomainName(SmolStr);

impl DomainName {
	#[inline]
	#[must_use]
	pub fn as_str(&self) -> &str {
		self.0.as_str()
	}

	#[inline]
	#[must_use]
	pub fn as_bytes(&self) -> &[u8] {
		self.0.as_bytes()
	}

	#[allow(clippy::cast_possible_truncation)]
	#[inline]
	#[must_use]
	pub fn len(&self) -> u8 {
		// Checked in constructors.
		self.0.len() as u8
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Domain read from the wire is not normalized, only checked.
	fn from_wire(buf: &[u8]) -> Result<Self, ReadError> {
		if buf.is_empty() {
			return Err(ReadError::InvalidDomain(EMPTY_STRING.into()));
		}
		let name = std::str::from_utf8(buf).map_err(ReadError::StrNotUtf8)?;
		Ok(Self(SmolStr::new(name)))
	}
}

impl FromStr for DomainName {
	type Err = ReadError;

	fn from_str(v: &str) -> Result<Self, ReadError> {
		if v.is_empty() {
			return Err(ReadError::InvalidDomain(EMPTY_STRING.into()));
		}
		let name = idna::Config::default()
			.use_std3_ascii_rules(true)
			.verify_dns_length(false)
			.to_ascii(v)
			.map_err(|e| ReadError::InvalidDomain(format!("{:?}", e).into()))?;
		if name.is_empty() {
			return Err(ReadError::InvalidDomain(EMPTY_STRING.into()));
		}
		if name.len() > MAX_DOMAIN_LEN {
			return Err(ReadError::InvalidDomain(
				format!("{} bytes is too long", name.len()).into(),
			));
		}
		Ok(Self(SmolStr::new(&name)))
	}
}

impl AsRef<str> for DomainName {
	#[inline]
	fn as_ref(&self) -> &str {
		self.0.as_ref()
	}
}

impl Display for DomainName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.0, f)
	}
}

// -------------------------------------------------------
//                          Tests
// -------------------------------------------------------

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
	protocol::{socks_addr::ReadError, Error as ProtocolError},
};
use num_enum::TryFromPrimitive;
use std::fmt::{self, Display};

pub const VER5: u8 = 5;
/// Subnegotiation version.
///
/// See more at <https://datatracker.ietf.org/doc/html/rfc1929#section-2>
pub const SUB_VERS: u8 = 1;
pub const AUTHENTICATION_SUCCESS: u8 = 0;

pub mod auth {
	pub const NO_AUTH: u8 = 0;
	pub const USERNAME: u8 = 2;
	pub const NO_ACCEPTABLE: u8 = 0xff;
}

#[derive(Debug, TryFromPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum CommandCode {
	Connect = 1,
	Bind = 2,
	Udp = 3,
}

impl Display for CommandCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CommandCode::Connect => f.write_str("CONNECT"),
			CommandCode::Bind => f.write_str("BIND"),
			CommandCode::Udp => f.write_str("UDP_ASSOCIATE"),
		}
	}
}

/// SOCKS5 reply code.
///
/// See more at <https://datatracker.ietf.org/doc/html/rfc1928#section-6>.
#[derive(Debug, TryFromPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum ReplyCode {
	Succeeded = 0,
	SocksFailure = 1,
	NotAllowedByRuleset = 2,
	NetworkUnreachable = 3,
	HostUnreachable = 4,
	ConnectionsRefused = 5,
	TtlExpired = 6,
	CommandNotSupported = 7,
	AddressTypeNotSupported = 8,
}

impl ReplyCode {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			ReplyCode::Succeeded => "succeeded",
			ReplyCode::SocksFailure => "socks failure",
			ReplyCode::NotAllowedByRuleset => "not allowed by ruleset",
			ReplyCode::NetworkUnreachable => "network unreachable",
			ReplyCode::HostUnreachable => "host unreachable",
			ReplyCode::ConnectionsRefused => "connection refused",
			ReplyCode::TtlExpired => "ttl expired",
			ReplyCode::CommandNotSupported => "command not supported",
			ReplyCode::AddressTypeNotSupported => "address type not supported",
		}
	}
}

impl Display for ReplyCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("wrong socks version '{0}'")]
	WrongVersion(u8),
	#[error("unsupported authentication method '{0}'")]
	UnsupportedMethod(u8),
	#[error("server requires authentication but none is configured")]
	AuthRequired,
	#[error("reply error code '{0}'")]
	FailedReply(ReplyCode),
	#[error("unknown reply code '{0}'")]
	UnknownReplyCode(u8),
	#[error("cannot read address ({0})")]
	CannotReadAddr(ReadError),
	#[error("UDP fragment {0} not supported")]
	Fragmented(u8),
	#[error("UDP packet ({0} bytes) too small")]
	PacketTooSmall(usize),
	#[error("username or password longer than 255 bytes")]
	CredentialTooLong,
}

impl From<Error> for ProtocolError {
	#[inline]
	fn from(e: Error) -> Self {
		ProtocolError::Protocol(e.into())
	}
}

pub struct Authentication<'a> {
	pub user: &'a [u8],
	pub pass: &'a [u8],
}

impl Authentication<'_> {
	/// Write the authentication into `buf` in the following format:
	///```not_rust
	/// +----+------+----------+------+----------+
	/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
	/// +----+------+----------+------+----------+
	/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
	/// +----+------+----------+------+----------+
	///```
	///
	/// # Errors
	///
	/// Returns [`Error::CredentialTooLong`] if either field exceeds 255 bytes.
	pub fn write_to(&self, buf: &mut impl BufMut) -> Result<(), Error> {
		let user_len = u8::try_from(self.user.len()).map_err(|_| Error::CredentialTooLong)?;
		let pass_len = u8::try_from(self.pass.len()).map_err(|_| Error::CredentialTooLong)?;
		buf.put_u8(SUB_VERS);
		buf.put_u8(user_len);
		buf.put_slice(self.user);
		buf.put_u8(pass_len);
		buf.put_slice(self.pass);
		Ok(())
	}
}

/// Write methods into `buf` in the following format:
///```not_rust
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
///```
pub fn write_methods_to(methods: &[u8], buf: &mut impl BufMut) {
	// At most 2 methods are ever offered.
	#[allow(clippy::cast_possible_truncation)]
	let len = methods.len() as u8;
	buf.put_slice(&[VER5, len]);
	buf.put_slice(methods);
}

pub struct Request {
	pub code: u8,
	pub addr: SocksAddr,
}

pub type Reply = Request;

impl Request {
	/// Read the request/reply in the following format:
	///```not_rust
	/// +----+-----+-------+------+-------------------+----------+
	/// |VER | CMD |  RSV  | ATYP | DST.ADDR/BND.ADDR | DST.PORT |
	/// +----+-----+-------+------+-------------------+----------+
	/// | 1  |  1  | X'00' |  1   |     Variable      |    2     |
	/// +----+-----+-------+------+-------------------+----------+
	///```
	///
	/// # Errors
	///
	/// Returns an IO error, or [`Error`] if the reply is malformed.
	pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
		let mut tmp_buf = [0_u8; 3];
		reader.read_exact(&mut tmp_buf).await?;
		let (ver, code) = (tmp_buf[0], tmp_buf[1]);
		if ver != VER5 {
			return Err(Error::WrongVersion(ver).into());
		}
		let addr = SocksAddr::async_read_from(reader)
			.await
			.map_err(|e| match e {
				ReadError::Io(e) => ProtocolError::Io(e),
				e => Error::CannotReadAddr(e).into(),
			})?;
		Ok(Self { code, addr })
	}

	/// Write the request/reply into `buf`, format is the same as [`Request::read`].
	pub fn write_to(&self, buf: &mut impl BufMut) {
		buf.put_u8(VER5);
		buf.put_u8(self.code);
		buf.put_u8(0);
		self.addr.write_to(buf);
	}
}

/// Prepend the SOCKS5 UDP request header to `payload`:
///```not_rust
/// +----+------+------+----------+----------+----------+
/// |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
/// +----+------+------+----------+----------+----------+
/// | 2  |  1   |  1   | Variable |    2     | Variable |
/// +----+------+------+----------+----------+----------+
///```
pub fn encode_udp_packet(addr: &SocksAddr, payload: &[u8], buf: &mut Vec<u8>) {
	buf.reserve(3 + addr.serialized_len_atyp() + payload.len());
	buf.put_slice(&[0, 0, 0]);
	addr.write_to(buf);
	buf.put_slice(payload);
}

/// Parse a SOCKS5 UDP packet, returning the address and
/// the position of the payload in `packet`.
///
/// # Errors
///
/// Returns an [`Error`] if the packet is fragmented or malformed.
pub fn decode_udp_packet(packet: &[u8]) -> Result<(SocksAddr, usize), Error> {
	if packet.len() < 4 {
		return Err(Error::PacketTooSmall(packet.len()));
	}
	let frag = packet[2];
	if frag != 0 {
		return Err(Error::Fragmented(frag));
	}
	let (addr, addr_len) = SocksAddr::read_from_bytes(&packet[3..]).map_err(Error::CannotReadAddr)?;
	Ok((addr, 3 + addr_len))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protocol::MAX_UDP_PAYLOAD;

	#[test]
	fn test_udp_packet_round_trip() {
		let addrs = [
			SocksAddr::new(Ipv4Addr::new(8, 8, 8, 8).into(), 53),
			SocksAddr::new(Ipv6Addr::LOCALHOST.into(), 65535),
			SocksAddr::new(SocksDestination::new_domain("example.com").unwrap(), 0),
		];
		for addr in &addrs {
			for size in [0, 1, MAX_UDP_PAYLOAD] {
				let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
				let mut buf = Vec::new();
				encode_udp_packet(addr, &payload, &mut buf);
				assert_eq!(&buf[..3], &[0, 0, 0]);
				let (out_addr, pos) = decode_udp_packet(&buf).unwrap();
				assert_eq!(&out_addr, addr);
				assert_eq!(&buf[pos..], payload.as_slice());
			}
		}
	}

	#[test]
	fn test_udp_packet_errors() {
		let addr = SocksAddr::new(Ipv4Addr::new(1, 2, 3, 4).into(), 80);
		let mut buf = Vec::new();
		encode_udp_packet(&addr, b"data", &mut buf);
		buf[2] = 1;
		assert!(matches!(decode_udp_packet(&buf), Err(Error::Fragmented(1))));
		assert!(matches!(
			decode_udp_packet(&[0, 0, 0]),
			Err(Error::PacketTooSmall(3))
		));
		assert!(matches!(
			decode_udp_packet(&[0, 0, 0, 9, 1, 2]),
			Err(Error::CannotReadAddr(_))
		));
	}

	#[test]
	fn test_auth_too_long() {
		let long = vec![b'a'; 256];
		let auth = Authentication {
			user: &long,
			pass: b"pass",
		};
		let mut buf = Vec::new();
		assert!(matches!(
			auth.write_to(&mut buf),
			Err(Error::CredentialTooLong)
		));
	}
}

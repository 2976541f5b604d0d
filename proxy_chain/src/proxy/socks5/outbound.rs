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
	udp,
	utils::{
		auth, write_methods_to, Authentication, CommandCode, Error, Reply, ReplyCode, Request,
		AUTHENTICATION_SUCCESS, SUB_VERS,
	},
};
use crate::{
	prelude::*,
	protocol::{
		AdapterKind, Base, BytesStream, Error as ProtocolError, Metadata, ProxyAdapter,
		ProxyPacketConn, TCP_TIMEOUT,
	},
	proxy::BuildError,
	transport::tls::{self, SessionCache},
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
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub username: Option<String>,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub password: Option<String>,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub tls: bool,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub udp: bool,
	#[cfg_attr(feature = "use_serde", serde(default))]
	pub skip_cert_verify: bool,
}

impl Options {
	#[must_use]
	pub fn new(name: impl Into<String>, server: impl Into<String>, port: u16) -> Self {
		Self {
			name: name.into(),
			server: server.into(),
			port,
			username: None,
			password: None,
			tls: false,
			udp: false,
			skip_cert_verify: false,
		}
	}
}

pub struct Socks5 {
	base: Base,
	server: SocksDestination,
	user_pass: Option<(String, String)>,
	tls: Option<tls::Connector>,
}

impl Socks5 {
	/// Creates a SOCKS5 adapter.
	///
	/// # Errors
	///
	/// Returns a [`BuildError`] if the server address is invalid,
	/// or the TLS connector cannot be created.
	pub fn new(opts: Options, cache: &SessionCache) -> Result<Self, BuildError> {
		let base = Base::new(
			opts.name,
			AdapterKind::Socks5,
			&opts.server,
			opts.port,
			opts.udp,
		)
		.map_err(BuildError::InvalidServer)?;
		let server = SocksDestination::from_str(&opts.server).map_err(BuildError::InvalidServer)?;
		let user_pass = match (opts.username, opts.password) {
			(None, None) => None,
			(user, pass) => Some((user.unwrap_or_default(), pass.unwrap_or_default())),
		};
		let tls = if opts.tls {
			Some(tls::Connector::new(None, opts.skip_cert_verify, Some(cache))?)
		} else {
			None
		};
		Ok(Self {
			base,
			server,
			user_pass,
			tls,
		})
	}

	pub(super) async fn wrap_tls(&self, stream: BytesStream) -> Result<BytesStream, ProtocolError> {
		Ok(match &self.tls {
			Some(connector) => connector.connect(stream, &self.server).await?,
			None => stream,
		})
	}

	/// Run the client side of the SOCKS5 handshake with command `cmd`.
	///
	/// Returns the address in the server's reply.
	pub(super) async fn handshake<S>(
		&self,
		stream: &mut S,
		cmd: CommandCode,
		dst: &SocksAddr,
	) -> Result<SocksAddr, ProtocolError>
	where
		S: AsyncRead + AsyncWrite + Unpin,
	{
		debug!(
			"Creating SOCKS5 connection to '{}', dst: '{}'",
			self.base.addr(),
			dst
		);

		let mut buf = Vec::with_capacity(512);

		let methods: &[u8] = if self.user_pass.is_some() {
			&[auth::USERNAME]
		} else {
			&[auth::NO_AUTH]
		};
		write_methods_to(methods, &mut buf);
		stream.write_all(&buf).await?;

		let method = {
			let mut tmp = [0_u8; 2];
			stream.read_exact(&mut tmp).await?;
			if tmp[0] != super::utils::VER5 {
				return Err(Error::WrongVersion(tmp[0]).into());
			}
			tmp[1]
		};
		trace!("Server asked for authentication with method {}", method);

		match method {
			auth::NO_AUTH => {}
			auth::USERNAME => {
				let (user, pass) = self.user_pass.as_ref().ok_or(Error::AuthRequired)?;
				buf.clear();
				Authentication {
					user: user.as_bytes(),
					pass: pass.as_bytes(),
				}
				.write_to(&mut buf)?;
				stream.write_all(&buf).await?;

				let auth_reply = read_auth_reply(stream).await?;
				if auth_reply != AUTHENTICATION_SUCCESS {
					let msg = format!(
						"SOCKS5 username/password authentication failed with reply code {}",
						auth_reply
					);
					return Err(ProtocolError::FailedAuthentication(msg.into()));
				}
			}
			_ => return Err(Error::UnsupportedMethod(method).into()),
		}

		trace!("Sending {} request for {} to server.", cmd, dst);
		buf.clear();
		Request {
			code: cmd as u8,
			addr: dst.clone(),
		}
		.write_to(&mut buf);
		stream.write_all(&buf).await?;

		let reply = Reply::read(stream).await?;
		let rep_code =
			ReplyCode::try_from(reply.code).map_err(|_| Error::UnknownReplyCode(reply.code))?;
		if rep_code != ReplyCode::Succeeded {
			return Err(Error::FailedReply(rep_code).into());
		}
		Ok(reply.addr)
	}
}

#[async_trait]
impl ProxyAdapter for Socks5 {
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
		let mut stream = self.wrap_tls(stream).await?;
		self.handshake(&mut stream, CommandCode::Connect, &dst)
			.await?;
		Ok(stream)
	}

	async fn dial_udp(&self, dst: &Metadata) -> Result<ProxyPacketConn, ProtocolError> {
		tokio::time::timeout(TCP_TIMEOUT, udp::associate(self, dst)).await?
	}
}

async fn read_auth_reply<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8, ProtocolError> {
	let mut tmp_buf = [0_u8; 2];
	reader.read_exact(&mut tmp_buf).await?;
	let ver = tmp_buf[0];
	let status = tmp_buf[1];

	if ver != SUB_VERS {
		return Err(Error::WrongVersion(ver).into());
	}

	Ok(status)
}

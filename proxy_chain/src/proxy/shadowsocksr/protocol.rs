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

use super::auth_aes128::{self, AuthAes128, Hash};
use crate::{
	prelude::*, protocol::BytesStream, proxy::shadowsocks::udp::PacketTransform,
	proxy::BuildError,
};

pub enum Protocol {
	Origin,
	AuthAes128(Arc<AuthAes128>),
}

impl Protocol {
	/// # Errors
	///
	/// Returns [`BuildError::UnknownProtocol`] if `name` is not supported,
	/// or [`BuildError::InvalidParam`] if `param` is invalid.
	pub fn new(
		name: &str,
		param: &str,
		key: &[u8],
		obfs_overhead: usize,
	) -> Result<Self, BuildError> {
		let hash = match name {
			"origin" => return Ok(Protocol::Origin),
			"auth_aes128_md5" => Hash::Md5,
			"auth_aes128_sha1" => Hash::Sha1,
			_ => return Err(BuildError::UnknownProtocol(name.into())),
		};
		Ok(Protocol::AuthAes128(Arc::new(AuthAes128::new(
			hash,
			key,
			param,
			obfs_overhead,
		)?)))
	}

	#[must_use]
	pub fn overhead(&self) -> usize {
		match self {
			Protocol::Origin => 0,
			Protocol::AuthAes128(_) => auth_aes128::OVERHEAD,
		}
	}

	/// Wrap the encrypted `stream`, whose write IV is `iv`.
	#[must_use]
	pub fn wrap(&self, stream: BytesStream, iv: &[u8]) -> BytesStream {
		match self {
			Protocol::Origin => stream,
			Protocol::AuthAes128(auth) => auth.new_stream(stream, iv),
		}
	}

	#[must_use]
	pub fn packet_transform(&self) -> Option<Arc<dyn PacketTransform>> {
		match self {
			Protocol::Origin => None,
			Protocol::AuthAes128(auth) => Some(auth.clone()),
		}
	}
}

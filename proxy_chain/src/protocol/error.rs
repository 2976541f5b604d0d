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

use super::socks_addr::ReadError;
use crate::prelude::*;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("IO error ({0})")]
	Io(#[from] io::Error),
	#[error("cannot dial '{addr}' ({source})")]
	Dial { addr: Tag, source: BoxStdErr },
	#[error("handshake with '{addr}' failed ({source})")]
	Handshake { addr: Tag, source: BoxStdErr },
	#[error("protocol error ({0})")]
	Protocol(BoxStdErr),
	#[error("failed authentication ({0})")]
	FailedAuthentication(BoxStdErr),
	#[error("{0} not supported")]
	Unsupported(&'static str),
	#[error("domain '{0}' cannot be resolved")]
	NotResolved(String),
	#[error("timeout")]
	Timeout,
	#[error("invalid destination ({0})")]
	InvalidDestination(BoxStdErr),
}

impl Error {
	#[inline]
	pub fn new_dial(addr: impl Into<Tag>, source: impl Into<BoxStdErr>) -> Self {
		Self::Dial {
			addr: addr.into(),
			source: source.into(),
		}
	}

	/// Annotate an error that happened during the handshake with `addr`.
	///
	/// [`Error::Unsupported`] and [`Error::Timeout`] are kept as they are.
	pub fn in_handshake(self, addr: impl Into<Tag>) -> Self {
		match self {
			Self::Unsupported(_) | Self::Timeout | Self::Handshake { .. } => self,
			e => Self::Handshake {
				addr: addr.into(),
				source: e.into(),
			},
		}
	}

	#[must_use]
	pub fn is_timeout(&self) -> bool {
		match self {
			Self::Timeout => true,
			Self::Io(e) => e.kind() == io::ErrorKind::TimedOut,
			_ => false,
		}
	}

	#[must_use]
	pub fn into_io_err(self) -> io::Error {
		match self {
			Self::Io(e) => e,
			Self::Timeout => io::ErrorKind::TimedOut.into(),
			e => io::Error::new(io::ErrorKind::Other, e),
		}
	}
}

impl From<ReadError> for Error {
	fn from(e: ReadError) -> Self {
		match e {
			ReadError::Io(e) => Self::Io(e),
			e => Self::Protocol(e.into()),
		}
	}
}

impl From<tokio::time::error::Elapsed> for Error {
	#[inline]
	fn from(_: tokio::time::error::Elapsed) -> Self {
		Self::Timeout
	}
}

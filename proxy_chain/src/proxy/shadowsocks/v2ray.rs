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

//! v2ray-plugin client: websocket with optional TLS and mux-cool.

use crate::{
	prelude::*,
	protocol::BytesStream,
	transport::{tls, ws},
	utils::{
		codec::{self, FrameReader, FrameWriteHalf},
		poll_write_all,
	},
};
use futures::ready;
use std::{
	io,
	num::NonZeroUsize,
	task::{Context, Poll},
};

const SESSION_ID: [u8; 2] = [0, 0];
const MAX_META_LEN: usize = 512;
const OPTION_DATA: u8 = 1;

mod status {
	pub const NEW: u8 = 1;
	pub const KEEP: u8 = 2;
	pub const END: u8 = 3;
	pub const KEEP_ALIVE: u8 = 4;
}

/// Opens a TCP sub-stream to a placeholder address.
const NEW_FRAME: [u8; 14] = [
	0,
	12,
	SESSION_ID[0],
	SESSION_ID[1],
	status::NEW,
	0,
	// network tcp
	1,
	// port
	0,
	0,
	// ipv4
	1,
	127,
	0,
	0,
	1,
];

const END_FRAME: [u8; 6] = [0, 4, SESSION_ID[0], SESSION_ID[1], status::END, 0];

pub struct V2rayWs {
	ws: ws::Connector,
	mux: bool,
}

impl V2rayWs {
	/// # Errors
	///
	/// Returns a [`ws::BuildError`] if `host`, `path` or any header is invalid.
	pub fn new<'a>(
		host: &str,
		path: &str,
		headers: impl IntoIterator<Item = (&'a str, &'a str)>,
		tls: Option<tls::Connector>,
		mux: bool,
	) -> Result<Self, ws::BuildError> {
		Ok(Self {
			ws: ws::Connector::new(host, path, headers, tls)?,
			mux,
		})
	}

	/// # Errors
	///
	/// Returns an IO error if the TLS or websocket handshake fails.
	pub async fn connect(&self, stream: BytesStream) -> io::Result<BytesStream> {
		let stream = self.ws.connect(stream).await?;
		Ok(if self.mux { mux_stream(stream) } else { stream })
	}
}

fn mux_stream(stream: BytesStream) -> BytesStream {
	let r = FrameReader::new(MuxDecoder::new(), stream.r);
	let w = MuxWriteHalf {
		inner: FrameWriteHalf::new(codec::BUFFER_CAPACITY, MuxEncoder { first: true }, stream.w),
		end_pos: None,
	};
	BytesStream::new(Box::new(r), Box::new(w))
}

struct MuxEncoder {
	first: bool,
}

impl codec::Encode for MuxEncoder {
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		if self.first {
			self.first = false;
			buf.put_slice(&NEW_FRAME);
		}
		let len = u16::try_from(src.len()).map_err(|_| "mux payload too large")?;
		buf.put_slice(&[0, 4]);
		buf.put_slice(&SESSION_ID);
		buf.put_slice(&[status::KEEP, OPTION_DATA]);
		buf.put_u16(len);
		buf.put_slice(src);
		Ok(())
	}
}

/// Sends the End frame on shutdown.
struct MuxWriteHalf<W: AsyncWrite + Unpin> {
	inner: FrameWriteHalf<MuxEncoder, W>,
	end_pos: Option<usize>,
}

impl<W: AsyncWrite + Unpin> AsyncWrite for MuxWriteHalf<W> {
	#[inline]
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		src: &[u8],
	) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.get_mut().inner).poll_write(cx, src)
	}

	#[inline]
	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_flush(cx)
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let me = self.get_mut();
		// Nothing to end if the sub-stream was never opened.
		if !me.inner.encoder.first {
			let pos = me.end_pos.get_or_insert(0);
			ready!(poll_write_all(Pin::new(&mut me.inner.w), cx, pos, &END_FRAME))?;
		}
		Pin::new(&mut me.inner).poll_shutdown(cx)
	}
}

#[derive(Debug, Clone, Copy)]
enum ReadState {
	MetaLen,
	Meta(NonZeroUsize),
	DataLen { discard: bool },
	Data { len: NonZeroUsize, discard: bool },
}

struct MuxDecoder {
	state: ReadState,
}

impl MuxDecoder {
	fn new() -> Self {
		Self {
			state: ReadState::MetaLen,
		}
	}
}

impl codec::Decode for MuxDecoder {
	fn expected_len(&self) -> Option<NonZeroUsize> {
		match self.state {
			ReadState::MetaLen | ReadState::DataLen { .. } => NonZeroUsize::new(2),
			ReadState::Meta(len) | ReadState::Data { len, .. } => Some(len),
		}
	}

	fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr> {
		if buf.is_empty() {
			if let ReadState::MetaLen = self.state {
				return Ok(true);
			}
			return Err("EOF in the middle of a mux frame".into());
		}
		let expected = self.expected_len().map_or(0, NonZeroUsize::get);
		if buf.len() < expected {
			return Err("EOF in the middle of a mux frame".into());
		}
		match self.state {
			ReadState::MetaLen => {
				let len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
				if !(4..=MAX_META_LEN).contains(&len) {
					return Err(format!("invalid mux metadata length {}", len).into());
				}
				self.state = NonZeroUsize::new(len).map_or(ReadState::MetaLen, ReadState::Meta);
				Ok(false)
			}
			ReadState::Meta(_) => {
				let (frame_status, option) = (buf[2], buf[3]);
				trace!("mux frame status {} option {}", frame_status, option);
				if frame_status == status::END {
					buf.clear();
					return Ok(true);
				}
				self.state = if option & OPTION_DATA == 0 {
					ReadState::MetaLen
				} else {
					ReadState::DataLen {
						discard: frame_status == status::KEEP_ALIVE,
					}
				};
				Ok(false)
			}
			ReadState::DataLen { discard } => {
				let len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
				self.state = match NonZeroUsize::new(len) {
					Some(len) => ReadState::Data { len, discard },
					None => ReadState::MetaLen,
				};
				Ok(false)
			}
			ReadState::Data { discard, .. } => {
				self.state = ReadState::MetaLen;
				if discard {
					buf.clear();
					return Ok(false);
				}
				Ok(true)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::runtime::Runtime;

	#[test]
	fn test_mux_write() {
		Runtime::new().unwrap().block_on(async {
			let (client, mut server) = tokio::io::duplex(4096);
			let mut client = mux_stream(BytesStream::from_io(client));
			client.write_all(b"abc").await.unwrap();
			client.write_all(b"de").await.unwrap();
			client.shutdown().await.unwrap();
			drop(client);

			let mut out = Vec::new();
			server.read_to_end(&mut out).await.unwrap();
			let mut expected = NEW_FRAME.to_vec();
			expected.extend_from_slice(&[0, 4, 0, 0, 2, 1, 0, 3, b'a', b'b', b'c']);
			expected.extend_from_slice(&[0, 4, 0, 0, 2, 1, 0, 2, b'd', b'e']);
			expected.extend_from_slice(&END_FRAME);
			assert_eq!(out, expected);
		});
	}

	#[test]
	fn test_mux_read() {
		Runtime::new().unwrap().block_on(async {
			let (client, mut server) = tokio::io::duplex(4096);
			let mut client = mux_stream(BytesStream::from_io(client));
			let mut frames = Vec::new();
			// Keep alive with data is skipped.
			frames.extend_from_slice(&[0, 4, 0, 0, 4, 1, 0, 2, b'x', b'x']);
			frames.extend_from_slice(&[0, 4, 0, 0, 2, 1, 0, 5]);
			frames.extend_from_slice(b"hello");
			// Keep without data.
			frames.extend_from_slice(&[0, 4, 0, 0, 2, 0]);
			frames.extend_from_slice(&[0, 4, 0, 0, 2, 1, 0, 1, b'!']);
			frames.extend_from_slice(&END_FRAME);
			frames.extend_from_slice(b"ignored");
			server.write_all(&frames).await.unwrap();

			let mut out = Vec::new();
			client.read_to_end(&mut out).await.unwrap();
			assert_eq!(out, b"hello!");
		});
	}

	#[test]
	fn test_mux_bad_meta_len() {
		Runtime::new().unwrap().block_on(async {
			let src: &[u8] = &[0x10, 0, 0, 0];
			let mut r = FrameReader::new(MuxDecoder::new(), src);
			let mut out = Vec::new();
			assert!(r.read_to_end(&mut out).await.is_err());
		});
	}
}

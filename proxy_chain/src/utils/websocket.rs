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

use crate::{prelude::*, utils::PollBuffer};
use async_tungstenite::{
	tokio::{client_async, TokioAdapter},
	tungstenite::{error::Error as WsError, handshake::client::Request, Message},
	WebSocketStream,
};
use futures::{ready, Sink, Stream};
use std::{
	io,
	task::{Context, Poll},
};
use tokio::io::ReadBuf;

pub type MessageStream<IO> = WebSocketStream<TokioAdapter<IO>>;

/// Run the websocket client handshake over `stream`.
///
/// # Errors
///
/// Returns an IO error if the handshake fails or the server
/// does not switch protocols.
pub async fn connect<IO>(stream: IO, request: Request) -> io::Result<StreamWrapper<MessageStream<IO>>>
where
	IO: 'static + AsyncRead + AsyncWrite + Unpin,
{
	debug!("Websocket handshake with '{}'", request.uri());
	let (stream, response) = client_async(request, stream).await.map_err(to_io_err)?;
	if response.status() != http::StatusCode::SWITCHING_PROTOCOLS {
		return Err(io::Error::new(
			io::ErrorKind::Other,
			format!("websocket handshake status {}", response.status()),
		));
	}
	Ok(StreamWrapper::new(stream))
}

enum ReadState {
	Reading,
	Buffering(PollBuffer),
	Closed,
}

/// Byte stream over binary websocket messages.
pub struct StreamWrapper<S> {
	inner: S,
	state: ReadState,
}

impl<S> StreamWrapper<S>
where
	S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
	fn new(inner: S) -> Self {
		Self {
			inner,
			state: ReadState::Reading,
		}
	}
}

impl<S> AsyncRead for StreamWrapper<S>
where
	S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		dst: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		let me = self.get_mut();
		loop {
			match &mut me.state {
				ReadState::Reading => {
					let msg = match ready!(Pin::new(&mut me.inner).poll_next(cx)) {
						Some(msg) => msg.map_err(to_io_err)?,
						None => {
							me.state = ReadState::Closed;
							continue;
						}
					};
					match msg {
						Message::Binary(buf) => {
							if !buf.is_empty() {
								me.state = ReadState::Buffering(PollBuffer::new(buf));
							}
						}
						Message::Text(text) => {
							if !text.is_empty() {
								me.state = ReadState::Buffering(PollBuffer::new(text.into_bytes()));
							}
						}
						Message::Close(_) => me.state = ReadState::Closed,
						// Pings are answered by tungstenite.
						Message::Ping(_) | Message::Pong(_) => {}
					}
				}
				ReadState::Buffering(buf) => {
					if buf.copy_to(dst) {
						me.state = ReadState::Reading;
					}
					return Poll::Ready(Ok(()));
				}
				ReadState::Closed => return Poll::Ready(Ok(())),
			}
		}
	}
}

impl<S> AsyncWrite for StreamWrapper<S>
where
	S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		let me = self.get_mut();
		ready!(Pin::new(&mut me.inner).poll_ready(cx)).map_err(to_io_err)?;
		Pin::new(&mut me.inner)
			.start_send(Message::Binary(buf.to_vec()))
			.map_err(to_io_err)?;
		Poll::Ready(Ok(buf.len()))
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let me = self.get_mut();
		ready!(Pin::new(&mut me.inner).poll_flush(cx)).map_err(to_io_err)?;
		Poll::Ready(Ok(()))
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let me = self.get_mut();
		ready!(Pin::new(&mut me.inner).poll_close(cx)).map_err(to_io_err)?;
		Poll::Ready(Ok(()))
	}
}

#[inline]
fn to_io_err(err: WsError) -> io::Error {
	if let WsError::Io(err) = err {
		return err;
	}
	io::Error::new(io::ErrorKind::Other, err)
}

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

//! A single HTTP/1.1 GET over an established connection.

use super::Error;
use crate::{
	prelude::*,
	protocol::BytesStream,
	transport::tls,
};
use bytes::Bytes;
use futures::future::{self, Either};
use hyper::{header, Body, Request};
use std::time::Instant;

pub(super) struct Target {
	pub https: bool,
	/// Value of the `Host` header.
	pub host_header: String,
	pub server_name: SocksDestination,
	/// Path and query of the URL.
	pub uri: String,
}

impl Target {
	pub fn from_url(url: &url::Url) -> Result<(Self, SocksAddr), Error> {
		let https = match url.scheme() {
			"http" => false,
			"https" => true,
			s => return Err(Error::InvalidUrl(format!("unsupported scheme '{}'", s))),
		};
		let host = url
			.host()
			.ok_or_else(|| Error::InvalidUrl(format!("'{}' has no host", url)))?;
		let dest = match host {
			url::Host::Domain(d) => SocksDestination::new_domain(d)
				.map_err(|e| Error::InvalidUrl(format!("invalid host '{}' ({})", d, e)))?,
			url::Host::Ipv4(ip) => SocksDestination::Ip(ip.into()),
			url::Host::Ipv6(ip) => SocksDestination::Ip(ip.into()),
		};
		let port = url
			.port_or_known_default()
			.ok_or_else(|| Error::InvalidUrl(format!("'{}' has no port", url)))?;
		let mut host_header = url.host_str().unwrap_or_default().to_owned();
		if let Some(port) = url.port() {
			host_header.push(':');
			host_header.push_str(&port.to_string());
		}
		let uri = url[url::Position::BeforePath..url::Position::AfterQuery].to_owned();
		let target = Self {
			https,
			host_header,
			server_name: dest.clone(),
			uri,
		};
		Ok((target, SocksAddr::new(dest, port)))
	}
}

pub(super) struct Response {
	pub body: Bytes,
	/// Time when the response header was received.
	pub received: Instant,
}

/// Send a GET for `target` over `stream` and read the full body.
pub(super) async fn get(stream: BytesStream, target: &Target) -> Result<Response, Error> {
	let stream = if target.https {
		let connector = tls::Connector::new(["http/1.1"], true, None)?;
		connector
			.connect(stream, &target.server_name)
			.await
			.map_err(Error::Tls)?
	} else {
		stream
	};

	let (mut sender, conn) = hyper::client::conn::handshake(stream).await?;
	let exchange = async move {
		let req = Request::get(target.uri.as_str())
			.header(header::HOST, target.host_header.as_str())
			.header(header::USER_AGENT, concat!("proxy_chain/", env!("CARGO_PKG_VERSION")))
			.body(Body::empty())?;
		trace!("Sending HTTP request {:?}", req);
		let resp = sender.send_request(req).await?;
		let received = Instant::now();
		debug!("HTTP response status: {}", resp.status());
		let body = hyper::body::to_bytes(resp.into_body()).await?;
		Ok::<_, Error>(Response { body, received })
	};

	// The connection is driven here until the exchange is done.
	match future::select(Box::pin(exchange), Box::pin(conn)).await {
		Either::Left((res, _)) => res,
		Either::Right((conn_res, exchange)) => {
			if let Err(e) = conn_res {
				debug!("HTTP connection closed with error ({})", e);
				return Err(e.into());
			}
			exchange.await
		}
	}
}

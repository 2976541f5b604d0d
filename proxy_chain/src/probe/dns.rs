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

//! Name resolution routed through an adapter's datagram socket.

use super::Error;
use crate::{
	prelude::*,
	protocol::{Metadata, Network, ProxyAdapter, RecvPacket, SendPacket},
};
use std::time::Duration;
use trust_dns_client::{
	op::{Message, MessageType, OpCode, Query},
	rr::{Name, RData, RecordType},
};

pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_DNS_MESSAGE: usize = 4 * 1024;

#[must_use]
pub fn default_resolver() -> SocketAddr {
	SocketAddr::new(Ipv4Addr::new(8, 8, 8, 8).into(), 53)
}

/// Resolve `host` by sending an A query (then AAAA if needed)
/// to `resolver` through `adapter`.
///
/// Every failure is an [`Error::Dns`], except an empty answer
/// which is [`Error::NotResolved`].
pub(super) async fn resolve(
	adapter: &dyn ProxyAdapter,
	resolver: SocketAddr,
	host: &str,
) -> Result<IpAddr, Error> {
	debug!("Resolving '{}' with '{}' through '{}'", host, resolver, adapter.name());
	let task = async {
		let name = Name::from_str(host).map_err(|e| Error::Dns(e.into()))?;
		let md = Metadata::from_socks_addr(Network::Udp, resolver.into());
		let mut conn = adapter.dial_udp(&md).await?;
		let server = SocksAddr::from(resolver);
		for rtype in [RecordType::A, RecordType::AAAA] {
			if let Some(ip) = query(&mut conn, &server, &name, rtype).await? {
				return Ok(ip);
			}
		}
		Err(Error::NotResolved(host.into()))
	};
	match tokio::time::timeout(RESOLVE_TIMEOUT, task).await {
		Ok(Ok(ip)) => Ok(ip),
		Ok(Err(e @ (Error::Dns(_) | Error::NotResolved(_)))) => Err(e),
		Ok(Err(e)) => Err(Error::Dns(e.into())),
		Err(e) => Err(Error::Dns(e.into())),
	}
}

async fn query<P>(
	conn: &mut P,
	server: &SocksAddr,
	name: &Name,
	rtype: RecordType,
) -> Result<Option<IpAddr>, Error>
where
	P: RecvPacket + SendPacket,
{
	let id: u16 = rand::thread_rng().gen();
	let mut msg = Message::new();
	msg.set_id(id)
		.set_message_type(MessageType::Query)
		.set_op_code(OpCode::Query)
		.set_recursion_desired(true);
	msg.add_query(Query::query(name.clone(), rtype));
	let data = msg.to_vec().map_err(|e| Error::Dns(e.into()))?;
	conn.send_dst(server, &data).await?;

	let mut buf = vec![0_u8; MAX_DNS_MESSAGE];
	loop {
		let (len, src) = conn.recv_src(&mut buf).await?;
		let resp = match Message::from_vec(&buf[..len]) {
			Ok(m) => m,
			Err(e) => {
				debug!("Invalid DNS message from '{}' ({})", src, e);
				continue;
			}
		};
		if resp.id() != id || resp.message_type() != MessageType::Response {
			trace!("Ignoring DNS message {} from '{}'", resp.id(), src);
			continue;
		}
		let ip = resp.answers().iter().find_map(|r| match r.rdata() {
			RData::A(ip) => Some(IpAddr::V4(*ip)),
			RData::AAAA(ip) => Some(IpAddr::V6(*ip)),
			_ => None,
		});
		trace!("{:?} query for '{}' answered with {:?}", rtype, name, ip);
		return Ok(ip);
	}
}

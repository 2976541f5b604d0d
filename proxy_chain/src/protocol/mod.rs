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

pub mod socks_addr;

mod adapter;
mod chain;
mod common;
pub mod dialer;
mod error;
mod metadata;
mod packet;

pub use adapter::{AdapterKind, Base, ProxyAdapter, TCP_TIMEOUT};
pub use chain::{Chain, ProxyConn, ProxyPacketConn};
pub use common::{BoxRead, BoxWrite, BytesStream, Network};
pub use error::Error;
pub use metadata::Metadata;
pub use packet::{PacketStream, RecvPacket, SendPacket, UdpSocketWrapper, MAX_UDP_PAYLOAD};
pub use socks_addr::{SocksAddr, SocksDestination};

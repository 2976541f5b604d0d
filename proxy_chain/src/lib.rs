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

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/*!
Outbound proxy adapters that can be chained through each other.

Every adapter implements [`ProxyAdapter`]. An adapter reaches its own server
through an optional upstream adapter (see [`ProxyAdapter::set_dialer`]),
so `A -> B -> direct` is built by giving `A` the upstream `B`.

[`Proxy`] wraps an adapter with default timeouts and a URL latency probe.
*/

#[forbid(unsafe_code)]
mod prelude;
#[forbid(unsafe_code)]
pub mod probe;
#[forbid(unsafe_code)]
pub mod protocol;
#[forbid(unsafe_code)]
pub mod proxy;
#[cfg(test)]
#[forbid(unsafe_code)]
mod test_utils;
#[forbid(unsafe_code)]
pub mod transport;
#[forbid(unsafe_code)]
mod utils;

pub use probe::{Proxy, UrlTestReport};
pub use protocol::{
	AdapterKind, Chain, Error, Metadata, Network, ProxyAdapter, ProxyConn, ProxyPacketConn,
};
#[cfg(feature = "use_serde")]
pub use proxy::parse_proxy;
pub use proxy::{AdapterConfig, BuildError};
pub use transport::tls::SessionCache;

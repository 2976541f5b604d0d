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

/*!
ShadowsocksR client.

Only stream ciphers are supported. Obfs can be `plain`, `http_simple` or `http_post`,
protocol can be `origin`, `auth_aes128_md5` or `auth_aes128_sha1`.
*/

mod auth_aes128;
mod obfs;
mod outbound;
mod protocol;

pub use outbound::{Options, ShadowsocksR};

pub const PROTOCOL_NAME: &str = "ssr";

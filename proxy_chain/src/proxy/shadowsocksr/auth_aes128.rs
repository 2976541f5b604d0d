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
`auth_aes128_md5` and `auth_aes128_sha1`.

The first packet of a connection is
```plain
+------+----------+-----+---------------+------+----------+------+------+
| RAND | HMAC[:6] | UID | ENCRYPTED(16) | HMAC | RAND_PAD | DATA | HMAC |
+------+----------+-----+---------------+------+----------+------+------+
|  1   |    6     |  4  |      16       |  4   | Variable | Var. |  4   |
+------+----------+-----+---------------+------+----------+------+------+
```
Every following packet is
```plain
+-----+----------+------------+----------+------+------+
| LEN | HMAC[:2] | PAD_PREFIX | RAND_PAD | DATA | HMAC |
+-----+----------+------------+----------+------+------+
|  2  |    2     |   1 or 3   | Variable | Var. |  4   |
+-----+----------+------------+----------+------+------+
```
*/

use crate::{
	prelude::*,
	protocol::BytesStream,
	proxy::{shadowsocks::udp::PacketTransform, BuildError},
	utils::{
		codec::{self, FrameReader, FrameWriteHalf},
		crypto::{evp_bytes_to_key, hmac_md5, hmac_sha1, md5, sha1, stream::aes128_encrypt_block},
		timestamp_now,
	},
};
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub const OVERHEAD: usize = 9;

const MAX_DATA_PER_PACK: usize = 8100;
const TCP_MSS: usize = 1460;
/// Head, padding prefix and HMAC.
const MIN_PACK_LEN: usize = 9;
const MAX_PACK_LEN: usize = 8192;
const DEFAULT_HEAD_SIZE: usize = 30;
const FULL_DATA_LIMIT: usize = 32 * 1024;
const PACK_HEAD_LEN: usize = 4;
const HMAC_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hash {
	Md5,
	Sha1,
}

impl Hash {
	fn salt(self) -> &'static str {
		match self {
			Hash::Md5 => "auth_aes128_md5",
			Hash::Sha1 => "auth_aes128_sha1",
		}
	}

	fn digest(self, data: &[u8]) -> Vec<u8> {
		match self {
			Hash::Md5 => md5(data).to_vec(),
			Hash::Sha1 => sha1(data).to_vec(),
		}
	}

	fn hmac(self, key: &[u8], data: &[&[u8]]) -> Vec<u8> {
		match self {
			Hash::Md5 => hmac_md5(key, data).to_vec(),
			Hash::Sha1 => hmac_sha1(key, data).to_vec(),
		}
	}
}

/// Client id and connection counter, shared by every connection of an adapter.
struct AuthData {
	client_id: [u8; 4],
	connection_id: u32,
}

impl AuthData {
	fn next(&mut self) -> ([u8; 4], u32) {
		if self.connection_id > 0xff00_0000 || self.connection_id == 0 {
			let mut rng = rand::thread_rng();
			rng.fill_bytes(&mut self.client_id);
			self.connection_id = rng.gen::<u32>() & 0x00ff_ffff;
		}
		self.connection_id += 1;
		(self.client_id, self.connection_id)
	}
}

pub struct AuthAes128 {
	hash: Hash,
	key: Vec<u8>,
	user_key: Vec<u8>,
	user_id: [u8; 4],
	/// Key of the encrypted block in the first packet.
	header_key: [u8; 16],
	overhead: usize,
	auth_data: Mutex<AuthData>,
}

impl AuthAes128 {
	/// `param` is either empty or `uid:password`.
	///
	/// # Errors
	///
	/// Returns [`BuildError::InvalidParam`] if the uid is not a u32.
	pub fn new(
		hash: Hash,
		key: &[u8],
		param: &str,
		obfs_overhead: usize,
	) -> Result<Self, BuildError> {
		let (user_id, user_key) = match param.split_once(':') {
			Some((uid, password)) => {
				let uid = uid.trim().parse::<u32>().map_err(|_| {
					BuildError::InvalidParam(format!("invalid uid '{}' in protocol-param", uid))
				})?;
				(uid.to_le_bytes(), hash.digest(password.as_bytes()))
			}
			None => {
				let mut user_id = [0_u8; 4];
				rand::thread_rng().fill_bytes(&mut user_id);
				(user_id, key.to_vec())
			}
		};
		let mut header_key = [0_u8; 16];
		let password = base64::encode(&user_key) + hash.salt();
		header_key.copy_from_slice(&evp_bytes_to_key(password.as_bytes(), 16));
		Ok(Self {
			hash,
			key: key.to_vec(),
			user_key,
			user_id,
			header_key,
			overhead: obfs_overhead + OVERHEAD,
			auth_data: Mutex::new(AuthData {
				client_id: [0; 4],
				connection_id: 0,
			}),
		})
	}

	/// Wrap a stream whose write IV is `iv`.
	pub fn new_stream(self: &Arc<Self>, stream: BytesStream, iv: &[u8]) -> BytesStream {
		let ids = self.auth_data.lock().next();
		let w = FrameWriteHalf::new(
			codec::BUFFER_CAPACITY,
			Encoder {
				auth: self.clone(),
				iv: iv.to_vec(),
				ids: Some(ids),
				pack_id: 1,
			},
			stream.w,
		);
		let r = FrameReader::new(Decoder::new(self.clone()), stream.r);
		BytesStream::new(Box::new(r), Box::new(w))
	}

	#[allow(clippy::cast_possible_truncation)]
	fn pack_auth_data(&self, iv: &[u8], ids: ([u8; 4], u32), data: &[u8], buf: &mut Vec<u8>) {
		let mut rng = rand::thread_rng();
		let rand_len = if data.len() > 400 {
			rng.gen_range(0..512)
		} else {
			rng.gen_range(0..1024)
		};
		let packed_len = 7 + 4 + 16 + 4 + rand_len + data.len() + HMAC_LEN;
		let mac_key = [iv, self.key.as_slice()].concat();
		let start = buf.len();

		buf.put_u8(rng.gen());
		let check = self.hash.hmac(&mac_key, &[&buf[start..]]);
		buf.put_slice(&check[..6]);
		buf.put_slice(&self.user_id);

		let (client_id, connection_id) = ids;
		let mut block = [0_u8; 16];
		{
			let mut b = &mut block[..];
			// Timestamp truncated into 32 bits.
			b.put_u32_le(timestamp_now() as u32);
			b.put_slice(&client_id);
			b.put_u32_le(connection_id);
			// Both are far below u16::MAX.
			b.put_u16_le(packed_len as u16);
			b.put_u16_le(rand_len as u16);
		}
		aes128_encrypt_block(&self.header_key, &mut block);
		buf.put_slice(&block);
		let check = self.hash.hmac(&mac_key, &[&buf[start + 7..]]);
		buf.put_slice(&check[..HMAC_LEN]);

		put_random(&mut rng, buf, rand_len);
		buf.put_slice(data);
		let check = self.hash.hmac(&self.user_key, &[&buf[start..]]);
		buf.put_slice(&check[..HMAC_LEN]);
	}

	#[allow(clippy::cast_possible_truncation)]
	fn pack_data(&self, pack_id: u32, data: &[u8], full_len: usize, buf: &mut Vec<u8>) {
		let mut rng = rand::thread_rng();
		let rand_len = self.rand_len_for_data(&mut rng, data.len(), full_len);
		let mut packed_len = PACK_HEAD_LEN + 3 + rand_len + data.len() + HMAC_LEN;
		if rand_len < 128 {
			packed_len -= 2;
		}
		let mac_key = [&self.user_key[..], &pack_id.to_le_bytes()[..]].concat();
		let start = buf.len();

		// At most MAX_DATA_PER_PACK + 32 + 11 bytes.
		let len_bytes = (packed_len as u16).to_le_bytes();
		buf.put_slice(&len_bytes);
		buf.put_slice(&self.hash.hmac(&mac_key, &[&len_bytes[..]])[..2]);
		if rand_len < 128 {
			buf.put_u8(rand_len as u8 + 1);
		} else {
			buf.put_u8(255);
			buf.put_u16_le((rand_len + 3) as u16);
		}
		put_random(&mut rng, buf, rand_len);
		buf.put_slice(data);
		let check = self.hash.hmac(&mac_key, &[&buf[start..]]);
		buf.put_slice(&check[..HMAC_LEN]);
	}

	fn rand_len_for_data(&self, rng: &mut impl Rng, data_len: usize, full_len: usize) -> usize {
		if full_len + self.overhead >= FULL_DATA_LIMIT {
			return 0;
		}
		let used = data_len + self.overhead;
		if used == TCP_MSS {
			return 0;
		}
		if used > TCP_MSS {
			let over = used - TCP_MSS;
			return if over < TCP_MSS {
				trapezoid_random(rng, TCP_MSS - over)
			} else {
				rng.gen_range(0..32)
			};
		}
		let rev = TCP_MSS - used;
		if data_len > 900 {
			rng.gen_range(0..rev)
		} else {
			trapezoid_random(rng, rev)
		}
	}
}

impl PacketTransform for AuthAes128 {
	fn encode_packet(&self, packet: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		packet.extend_from_slice(&self.user_id);
		let check = self.hash.hmac(&self.user_key, &[packet]);
		packet.extend_from_slice(&check[..HMAC_LEN]);
		Ok(())
	}

	fn decode_packet(&self, packet: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		if packet.len() < HMAC_LEN {
			return Err(format!("auth_aes128 datagram of {} bytes too small", packet.len()).into());
		}
		let data_len = packet.len() - HMAC_LEN;
		let check = self.hash.hmac(&self.key, &[&packet[..data_len]]);
		if check[..HMAC_LEN] != packet[data_len..] {
			return Err("auth_aes128 datagram checksum mismatch".into());
		}
		packet.truncate(data_len);
		Ok(())
	}
}

/// Random value in `0..max`, leaning towards small values.
#[allow(
	clippy::cast_possible_truncation,
	clippy::cast_sign_loss,
	clippy::cast_precision_loss
)]
fn trapezoid_random(rng: &mut impl Rng, max: usize) -> usize {
	const D: f64 = -0.3;
	let a = 1.0 - D;
	let base: f64 = rng.gen();
	let base = ((a * a + 4.0 * D * base).sqrt() - a) / (2.0 * D);
	(base * max as f64) as usize
}

fn put_random(rng: &mut impl Rng, buf: &mut Vec<u8>, len: usize) {
	let pos = buf.len();
	buf.resize(pos + len, 0);
	rng.fill_bytes(&mut buf[pos..]);
}

/// Length of the address at the start of `buf`.
fn head_size(buf: &[u8]) -> usize {
	if buf.len() < 2 {
		return DEFAULT_HEAD_SIZE;
	}
	match buf[0] & 7 {
		1 => 7,
		4 => 19,
		3 => 4 + usize::from(buf[1]),
		_ => DEFAULT_HEAD_SIZE,
	}
}

struct Encoder {
	auth: Arc<AuthAes128>,
	iv: Vec<u8>,
	/// Taken by the first packet.
	ids: Option<([u8; 4], u32)>,
	pack_id: u32,
}

impl codec::Encode for Encoder {
	fn encode_into(&mut self, src: &[u8], buf: &mut Vec<u8>) -> Result<(), BoxStdErr> {
		let full_len = src.len();
		let mut src = src;
		if let Some(ids) = self.ids.take() {
			let head_len = head_size(src) + rand::thread_rng().gen_range(0..32);
			let (head, rest) = src.split_at(std::cmp::min(head_len, src.len()));
			self.auth.pack_auth_data(&self.iv, ids, head, buf);
			src = rest;
		}
		for chunk in src.chunks(MAX_DATA_PER_PACK) {
			self.auth.pack_data(self.pack_id, chunk, full_len, buf);
			self.pack_id = self.pack_id.wrapping_add(1);
		}
		Ok(())
	}
}

enum ReadState {
	Head,
	Body { head: [u8; PACK_HEAD_LEN], len: NonZeroUsize },
}

struct Decoder {
	auth: Arc<AuthAes128>,
	recv_id: u32,
	state: ReadState,
}

impl Decoder {
	fn new(auth: Arc<AuthAes128>) -> Self {
		Self {
			auth,
			recv_id: 1,
			state: ReadState::Head,
		}
	}

	fn mac_key(&self) -> Vec<u8> {
		[&self.auth.user_key[..], &self.recv_id.to_le_bytes()[..]].concat()
	}
}

impl codec::Decode for Decoder {
	fn expected_len(&self) -> Option<NonZeroUsize> {
		match &self.state {
			ReadState::Head => NonZeroUsize::new(PACK_HEAD_LEN),
			ReadState::Body { len, .. } => Some(*len),
		}
	}

	fn decode_inplace(&mut self, buf: &mut Vec<u8>) -> Result<bool, BoxStdErr> {
		if buf.is_empty() {
			if let ReadState::Head = self.state {
				return Ok(true);
			}
			return Err("EOF in the middle of an auth_aes128 packet".into());
		}
		let expected = self.expected_len().map_or(0, NonZeroUsize::get);
		if buf.len() < expected {
			return Err("EOF in the middle of an auth_aes128 packet".into());
		}
		let mac_key = self.mac_key();
		match self.state {
			ReadState::Head => {
				let check = self.auth.hash.hmac(&mac_key, &[&buf[..2]]);
				if check[..2] != buf[2..4] {
					return Err("auth_aes128 packet length MAC mismatch".into());
				}
				let len = usize::from(u16::from_le_bytes([buf[0], buf[1]]));
				if !(MIN_PACK_LEN..MAX_PACK_LEN).contains(&len) {
					return Err(format!("invalid auth_aes128 packet length {}", len).into());
				}
				let mut head = [0_u8; PACK_HEAD_LEN];
				head.copy_from_slice(&buf[..PACK_HEAD_LEN]);
				let body_len = NonZeroUsize::new(len - PACK_HEAD_LEN)
					.ok_or("empty auth_aes128 packet body")?;
				self.state = ReadState::Body {
					head,
					len: body_len,
				};
				Ok(false)
			}
			ReadState::Body { head, .. } => {
				let data_end = buf.len() - HMAC_LEN;
				let check = self.auth.hash.hmac(&mac_key, &[&head[..], &buf[..data_end]]);
				if check[..HMAC_LEN] != buf[data_end..] {
					return Err("auth_aes128 packet checksum mismatch".into());
				}
				self.recv_id = self.recv_id.wrapping_add(1);
				self.state = ReadState::Head;
				let data_start = if buf[0] < 255 {
					usize::from(buf[0])
				} else {
					usize::from(u16::from_le_bytes([buf[1], buf[2]]))
				};
				if data_start > data_end {
					return Err(format!("invalid auth_aes128 padding length {}", data_start).into());
				}
				trace!(
					"auth_aes128 packet of {} bytes data",
					data_end - data_start
				);
				buf.truncate(data_end);
				buf.drain(..data_start);
				// An empty buffer would be taken as EOF.
				Ok(!buf.is_empty())
			}
		}
	}
}

pub mod http_server;
pub mod socks5;

use lazy_static::lazy_static;

lazy_static! {
	pub static ref SERVED_DATA: String = "This is something, what do you expect.".repeat(256);
}

pub fn setup_logger() {
	let _ = env_logger::builder().is_test(true).try_init();
}

#![cfg(feature = "use_serde")]

mod common;

use common::{http_server, setup_logger, socks5, SERVED_DATA};
use proxy_chain::{
	parse_proxy, BuildError, Metadata, Network, Proxy, ProxyAdapter, SessionCache,
};
use serde_json::{json, Map, Value};
use std::{net::SocketAddr, sync::Arc};

fn socks5_conf(name: &str, addr: SocketAddr) -> Map<String, Value> {
	let v = json!({
		"type": "socks5",
		"name": name,
		"server": addr.ip().to_string(),
		"port": addr.port(),
	});
	match v {
		Value::Object(m) => m,
		_ => unreachable!(),
	}
}

#[test]
fn test_integration_chain() {
	setup_logger();
	let rt = tokio::runtime::Runtime::new().unwrap();
	rt.block_on(async {
		let http_addr = http_server::spawn();
		let inner_addr = socks5::spawn().await;
		let outer_addr = socks5::spawn().await;

		let cache = SessionCache::default();
		let inner: Arc<dyn ProxyAdapter> =
			Arc::from(parse_proxy(&socks5_conf("inner", inner_addr), &cache).unwrap());
		let mut outer = parse_proxy(&socks5_conf("outer", outer_addr), &cache).unwrap();
		outer.set_dialer(inner);
		let proxy = Proxy::new(Arc::from(outer));

		let dst = Metadata::from_socks_addr(Network::Tcp, http_addr.into());
		let conn = proxy.dial(&dst).await.unwrap();
		assert_eq!(conn.chain.to_string(), "outer -> inner");
		drop(conn);

		let report = proxy
			.url_test(&format!("http://{}/", http_addr), false)
			.await
			.unwrap();
		assert_eq!(report.body.as_ref(), SERVED_DATA.as_bytes());
	});
}

#[test]
fn test_integration_broken_chain() {
	setup_logger();
	let rt = tokio::runtime::Runtime::new().unwrap();
	rt.block_on(async {
		let http_addr = http_server::spawn();
		let outer_addr = socks5::spawn().await;
		let closed = {
			let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
			l.local_addr().unwrap()
		};

		let cache = SessionCache::default();
		let inner: Arc<dyn ProxyAdapter> =
			Arc::from(parse_proxy(&socks5_conf("inner", closed), &cache).unwrap());
		let mut outer = parse_proxy(&socks5_conf("outer", outer_addr), &cache).unwrap();
		outer.set_dialer(inner);
		let proxy = Proxy::new(Arc::from(outer));

		let res = proxy
			.url_test(&format!("http://{}/", http_addr), false)
			.await;
		assert!(res.is_err());
	});
}

#[test]
fn test_integration_parse_errors() {
	let cache = SessionCache::default();
	let mut conf = socks5_conf("s5", "127.0.0.1:1080".parse().unwrap());
	conf.insert("type".into(), json!("vmess"));
	assert!(matches!(
		parse_proxy(&conf, &cache),
		Err(BuildError::UnknownType(t)) if t == "vmess"
	));
}

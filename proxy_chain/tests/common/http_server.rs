use hyper::{
	service::{make_service_fn, service_fn},
	Body, Request, Response, Server,
};
use log::info;
use std::{convert::Infallible, net::SocketAddr};

async fn serve_something(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
	let something = super::SERVED_DATA.as_str();
	info!(
		"Serving HTTP request with {} bytes of something",
		something.len()
	);
	Ok(Response::new(something.into()))
}

/// Run an HTTP server on a random local port in the background.
pub fn spawn() -> SocketAddr {
	let make_service =
		make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(serve_something)) });
	let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_service);
	let addr = server.local_addr();
	info!("Running HTTP server on {}", addr);
	tokio::spawn(server);
	addr
}

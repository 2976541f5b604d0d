use log::{debug, info};
use proxy_chain::protocol::SocksAddr;
use std::{io, net::SocketAddr};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{TcpListener, TcpStream},
};

const SUCCEEDED: [u8; 10] = [5, 0, 0, 1, 0, 0, 0, 0, 0, 0];

/// Run a SOCKS5 server without authentication that only supports CONNECT.
pub async fn spawn() -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	info!("Running SOCKS5 server on {}", addr);
	tokio::spawn(async move {
		while let Ok((stream, _)) = listener.accept().await {
			tokio::spawn(async move {
				if let Err(e) = serve(stream).await {
					debug!("SOCKS5 server error ({})", e);
				}
			});
		}
	});
	addr
}

async fn serve(mut stream: TcpStream) -> io::Result<()> {
	let mut head = [0_u8; 2];
	stream.read_exact(&mut head).await?;
	let mut methods = vec![0_u8; usize::from(head[1])];
	stream.read_exact(&mut methods).await?;
	stream.write_all(&[5, 0]).await?;

	let mut req = [0_u8; 3];
	stream.read_exact(&mut req).await?;
	if req[1] != 1 {
		stream.write_all(&[5, 7, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
		return Ok(());
	}
	let dst = SocksAddr::async_read_from(&mut stream)
		.await
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
	let mut target = TcpStream::connect(dst.to_string()).await?;
	stream.write_all(&SUCCEEDED).await?;
	tokio::io::copy_bidirectional(&mut stream, &mut target).await?;
	Ok(())
}

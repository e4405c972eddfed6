use log::*;
use wsnest::Server;

#[tokio::main]
async fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9003";
    let server = Server::bind(addr, None).await.expect("can't listen");
    info!("listening on: {addr}");

    let broadcaster = server.clone();
    server.on("message", move |conn| {
        let data = conn.get_data();
        let server = broadcaster.clone();
        let conn = conn.clone();
        tokio::spawn(async move {
            info!(
                "relaying {} bytes from {} to {} other connection(s)",
                data.len(),
                conn.peer_addr(),
                server.current_connections().saturating_sub(1)
            );
            server.broadcast_to_others(&data, &conn).await;
        });
    });

    server.on("close", |conn| {
        info!("connection {} closed", conn.peer_addr());
    });

    server.run().await;
}

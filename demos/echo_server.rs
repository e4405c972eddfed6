use log::*;
use wsnest::Server;

#[tokio::main]
async fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9002";
    let server = Server::bind(addr, None).await.expect("can't listen");
    info!("listening on: {addr}");

    server.on("message", |conn| {
        let data = conn.get_data();
        let conn = conn.clone();
        tokio::spawn(async move {
            if conn.send(&data).await.is_err() {
                error!("failed to echo message back to {}", conn.peer_addr());
            }
        });
    });

    server.on("error", |conn| {
        error!("error on connection {}: {:?}", conn.peer_addr(), conn.get_err());
    });

    server.run().await;
}

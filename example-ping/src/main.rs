use std::{sync::Arc, time::Duration};

use packetsocket::{
    Configuration, Connection, DispatchContext, FieldType, Packet, PacketDescriptor,
    PacketRegistry, SchemaSelector, Value,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let registry = PacketRegistry::global();
    register_packets(&registry)?;
    log::info!(
        "schema:\n{}",
        registry.export(&SchemaSelector::All).to_json()?
    );

    let address = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1:9000".to_string());
    let listener = TcpListener::bind(&address).await?;
    let server_registry = registry.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    log::info!("new connection from {peer:?}");
                    let mut configuration = Configuration::default();
                    configuration.allow_group("g");
                    Connection::spawn(stream, server_registry.clone(), configuration);
                }
                Err(e) => {
                    log::error!("accept failed: {e:?}");
                    break;
                }
            }
        }
    });

    let stream = tokio::net::TcpStream::connect(&address).await?;
    stream.set_nodelay(true)?;
    let client = Connection::spawn(stream, registry.clone(), Configuration::default());
    let ping = registry.resolve("p")?;

    let requests = (0..5).map(|seq| {
        let client = client.clone();
        let ping = ping.clone();
        async move {
            let request = Packet::builder(&ping).set("seq", seq).build()?;
            client
                .request_timeout(&request, Duration::from_secs(1))
                .await
        }
    });
    for reply in futures::future::join_all(requests).await {
        match reply {
            Ok(pong) => log::info!("reply: {pong:?}"),
            Err(e) => log::error!("request failed: {e}"),
        }
    }

    client.close();
    Ok(())
}

/// `p` is a ping; the receiving side answers with a `q` carrying the same seq.
fn register_packets(registry: &PacketRegistry) -> packetsocket::Result<()> {
    let pong = registry.register(
        PacketDescriptor::builder("q")
            .group("g")
            .field("seq", FieldType::Integer)
            .build()?,
    )?;
    registry.register(
        PacketDescriptor::builder("p")
            .group("g")
            .field("seq", FieldType::Integer)
            .on_recv(move |ping: Packet, context: DispatchContext| {
                let pong = pong.clone();
                async move {
                    let seq = ping.get("seq").cloned().unwrap_or(Value::Null);
                    log::debug!("ping {seq:?}");
                    let reply = match Packet::builder(&pong).set("seq", seq).build() {
                        Ok(reply) => reply,
                        Err(e) => {
                            log::error!("could not build reply: {e}");
                            return;
                        }
                    };
                    if let Err(e) = context.respond(&reply).await {
                        log::warn!("could not respond: {e}");
                    }
                }
            })
            .build()?,
    )?;
    Ok(())
}

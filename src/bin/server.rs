use anyhow::{bail, Context, Result};
use log::{error, info};
use raft_kv_store::message;
use raft_kv_store::raft::{RaftConfig, RaftNode};
use raft_kv_store::Address;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    if let Err(e) = run().await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    // `server <ip> <port>` starts the sole initial leader of a new cluster.
    // `server <ip> <port> <contactIp> <contactPort>` joins the cluster reachable at the contact address.
    if args.len() != 3 && args.len() != 5 {
        bail!("usage: {} <ip> <port> [<contactIp> <contactPort>]", args[0]);
    }

    let ip = args[1].clone();
    let port: u16 = args[2].parse().context("port must be a u16")?;
    let address = Address::new(ip, port);

    let config = RaftConfig { storage_dir: "storage".to_string(), ..RaftConfig::default() };
    let node = RaftNode::new(address.clone(), config).await?;

    if args.len() == 5 {
        let contact_ip = args[3].clone();
        let contact_port: u16 = args[4].parse().context("contact port must be a u16")?;
        let contact = Address::new(contact_ip, contact_port);
        node.join(contact).await?;
    } else {
        node.bootstrap_as_leader().await;
    }

    node.start().await;

    let listener = TcpListener::bind(address.socket_addr())
        .await
        .with_context(|| format!("binding to {address}"))?;
    info!("{address} listening for RPCs");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(node, stream).await {
                        error!("connection error: {e:#}");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("{address} shutting down");
                node.shutdown().await;
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(node: Arc<raft_kv_store::raft::RaftNode>, mut stream: TcpStream) -> Result<()> {
    let request = message::read_message(&mut stream).await?;
    if let Some(response) = node.handle_message(request).await {
        message::write_message(&mut stream, &response).await?;
    }
    Ok(())
}

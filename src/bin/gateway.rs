use anyhow::{bail, Result};
use clap::Parser;
use log::{error, info};
use raft_kv_store::message::{self, RaftMessage, Status};
use raft_kv_store::state_machine::validate_command;
use raft_kv_store::Address;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use thiserror::Error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// HTTP front door for the cluster: translates `POST /execute_command` into
/// the peer `execute` RPC against whichever replica the caller named,
/// following `redirected` replies (bounded, spaced by a heartbeat interval)
/// until a non-redirect answer comes back or the retry budget runs out.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address the gateway's HTTP server binds to.
    #[arg(long, default_value = "127.0.0.1:3030")]
    bind: std::net::SocketAddr,

    /// How long to wait for a single RPC round trip before giving up.
    #[arg(long, default_value = "2000")]
    rpc_timeout_ms: u64,

    /// How many redirects to follow before giving up on a request.
    #[arg(long, default_value = "5")]
    retry_count: u32,

    /// How long to wait between following redirects.
    #[arg(long, default_value = "1000")]
    heartbeat_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    address: Address,
    command: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Error)]
enum GatewayError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl warp::reject::Reject for GatewayError {}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    rpc_timeout: Duration,
    retry_count: u32,
    heartbeat_interval: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let retry_policy = RetryPolicy {
        rpc_timeout: Duration::from_millis(cli.rpc_timeout_ms),
        retry_count: cli.retry_count,
        heartbeat_interval: Duration::from_millis(cli.heartbeat_interval_ms),
    };

    let execute_route = warp::path("execute_command")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_retry_policy(retry_policy))
        .and_then(execute_command);

    let health_route = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::html("raft-kv-store gateway is up"));

    let routes = execute_route.or(health_route).recover(handle_rejection);

    info!("gateway listening on {}", cli.bind);
    warp::serve(routes).run(cli.bind).await;
    Ok(())
}

fn with_retry_policy(policy: RetryPolicy) -> impl Filter<Extract = (RetryPolicy,), Error = Infallible> + Clone {
    warp::any().map(move || policy)
}

async fn execute_command(req: CommandRequest, policy: RetryPolicy) -> Result<impl Reply, Rejection> {
    validate_command(&req.command).map_err(|e| warp::reject::custom(GatewayError::InvalidCommand(e.to_string())))?;

    let response = forward_execute(req.address, req.command, policy)
        .await
        .map_err(|e| warp::reject::custom(GatewayError::Upstream(e.to_string())))?;

    Ok(warp::reply::json(&response))
}

/// Send `command` to `target`, the replica the caller asked to be dialed.
/// Each `redirected` reply retargets to the address it names and retries,
/// spaced by `policy.heartbeat_interval`, bounded by `policy.retry_count` —
/// the same bounded-retry shape as `RaftNode::join`.
async fn forward_execute(mut target: Address, command: String, policy: RetryPolicy) -> Result<RaftMessage> {
    let request = RaftMessage::Execute { command, value: String::new() };

    for attempt in 0..policy.retry_count {
        match message::call(&target, &request, policy.rpc_timeout).await {
            Ok(RaftMessage::ExecuteResponse { status: Status::Redirected, address, .. }) => {
                target = address;
                tokio::time::sleep(policy.heartbeat_interval).await;
            }
            Ok(response) => return Ok(response),
            Err(e) => {
                if attempt + 1 == policy.retry_count {
                    return Err(e);
                }
                tokio::time::sleep(policy.heartbeat_interval).await;
            }
        }
    }

    bail!("{target} kept redirecting after {} attempts, giving up", policy.retry_count)
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<GatewayError>() {
        match e {
            GatewayError::InvalidCommand(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            GatewayError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
        }
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "malformed request body".to_string())
    } else {
        error!("unhandled rejection: {err:?}");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };

    Ok(warp::reply::with_status(warp::reply::json(&ErrorBody { error: message }), code))
}

use crate::{Address, LogEntry};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Status carried by every RPC reply, per the external interface table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Redirected,
    Failed,
    OnProcess,
}

/// One request or response variant of the peer/client RPC protocol. Every
/// variant is framed the same way on the wire: a u32 length prefix followed
/// by that many bytes of this enum serialized as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rpc")]
pub enum RaftMessage {
    Heartbeat {
        leader_addr: Address,
        election_term: u64,
        prev_last_index: u64,
        prev_last_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },
    HeartbeatResponse {
        status: Status,
        election_term: u64,
        ack: u64,
        sync: bool,
        address: Address,
        reason: String,
    },
    Vote {
        candidate_addr: Address,
        election_term: u64,
        last_log_index: u64,
        last_log_term: u64,
    },
    VoteResponse {
        status: Status,
        election_term: u64,
        address: Address,
        reason: String,
    },
    ApplyMembership {
        address: Address,
    },
    ApplyMembershipResponse {
        status: Status,
        address: Address,
        cluster_addr_list: Vec<Address>,
        log: Vec<LogEntry>,
        reason: String,
    },
    UpdateMembership {
        address: Address,
    },
    UpdateMembershipResponse {
        status: Status,
        address: Address,
        reason: String,
    },
    Execute {
        command: String,
        value: String,
    },
    ExecuteResponse {
        status: Status,
        address: Address,
        data: String,
        reason: String,
    },
}

/// Write one length-prefixed JSON message.
pub async fn write_message<W>(writer: &mut W, message: &RaftMessage) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message).context("serializing RaftMessage")?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON message.
pub async fn read_message<R>(reader: &mut R) -> Result<RaftMessage>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let len = reader.read_u32().await.context("reading message length")?;
    const MAX_MESSAGE_BYTES: u32 = 64 * 1024 * 1024;
    if len > MAX_MESSAGE_BYTES {
        bail!("refusing to read oversized message ({len} bytes)");
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.context("reading message body")?;
    let message = serde_json::from_slice(&buf).context("deserializing RaftMessage")?;
    Ok(message)
}

/// Connect to `addr`, send `request`, and read back the single reply.
/// Bounded by `timeout`; expiry surfaces as an ordinary `Err`.
pub async fn call(
    addr: &Address,
    request: &RaftMessage,
    timeout: std::time::Duration,
) -> Result<RaftMessage> {
    tokio::time::timeout(timeout, async {
        let mut stream = tokio::net::TcpStream::connect(addr.socket_addr())
            .await
            .with_context(|| format!("connecting to {addr}"))?;
        write_message(&mut stream, request).await?;
        read_message(&mut stream).await
    })
    .await
    .with_context(|| format!("RPC to {addr} timed out"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_over_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let msg = RaftMessage::Vote {
            candidate_addr: Address::new("127.0.0.1", 9000),
            election_term: 3,
            last_log_index: 5,
            last_log_term: 2,
        };
        write_message(&mut a, &msg).await.unwrap();
        let got = read_message(&mut b).await.unwrap();
        match got {
            RaftMessage::Vote { election_term, last_log_index, .. } => {
                assert_eq!(election_term, 3);
                assert_eq!(last_log_index, 5);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Status::OnProcess).unwrap(), "\"onprocess\"");
        assert_eq!(serde_json::to_string(&Status::Redirected).unwrap(), "\"redirected\"");
    }
}

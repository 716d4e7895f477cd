//! # Subscription Server Module / 订阅服务器模块
//!
//! This module exposes the broadcast protocol to external subscribers over a
//! persistent bidirectional TCP connection carrying newline-delimited JSON.
//! A client subscribes to one run (or to all runs) and receives one snapshot
//! message followed by the live delta feed, each delta numbered with the
//! run's strictly increasing sequence.
//!
//! 此模块通过承载换行分隔 JSON 的持久双向 TCP 连接，将广播协议暴露给
//! 外部订阅者。客户端订阅一次运行（或全部运行），先收到一条快照消息，
//! 随后是实时增量流，每条增量带有该运行严格递增的序号。
//!
//! Fan-in of multiple run feeds into one connection goes through a
//! `StreamMap`; a connection that falls behind a run's bounded feed gets an
//! `overrun` notice for that run only and must re-subscribe to it.

use std::sync::Arc;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::hub::{BroadcastHub, HubNotice, UnknownRun};
use crate::core::models::{Delta, RunId, RunSnapshot};

/// Upper bound on one inbound request line.
const MAX_REQUEST_LINE: usize = 8 * 1024;

/// A request sent by a subscriber.
/// 订阅者发送的请求。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRequest {
    Subscribe(SubscribeTarget),
    Unsubscribe { run: RunId },
}

/// What to subscribe to: one run id, or the literal `"all"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscribeTarget {
    Run { run: RunId },
    All(AllRuns),
}

/// The wire literal `"all"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum AllRuns {
    #[serde(rename = "all")]
    All,
}

/// A message sent to a subscriber.
/// 发送给订阅者的消息。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full current tree of one run; always precedes that run's deltas.
    Snapshot {
        #[serde(flatten)]
        snapshot: RunSnapshot,
    },
    /// One incremental change, strictly ordered per run.
    Delta {
        #[serde(flatten)]
        delta: Delta,
    },
    /// A new run appeared (sent to "all runs" subscribers).
    RunOpened { run: RunId, name: String },
    /// This connection fell behind the run's feed and was dropped from it;
    /// re-subscribe to receive a fresh snapshot.
    Overrun { run: RunId, missed: u64 },
    /// The previous request could not be honored.
    Error { message: String },
}

type Conn = Framed<TcpStream, LinesCodec>;

/// Accepts subscriber connections until `shutdown` fires, one task per
/// connection.
/// 接受订阅者连接直至 `shutdown` 触发，每个连接一个任务。
pub async fn serve(
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "subscription server listening");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "subscriber connected");
                    let hub = Arc::clone(&hub);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, &hub, shutdown).await {
                            debug!(%peer, "subscriber session ended: {e}");
                        }
                    });
                }
                Err(e) => warn!("accept failed: {e}"),
            }
        }
    }
    Ok(())
}

/// One subscriber session: reads requests, forwards snapshots and deltas.
async fn handle_client(
    stream: TcpStream,
    hub: &BroadcastHub,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut conn = Framed::new(stream, LinesCodec::new_with_max_length(MAX_REQUEST_LINE));
    let mut feeds: StreamMap<RunId, BroadcastStream<Delta>> = StreamMap::new();
    let mut notices: Option<BroadcastStream<HubNotice>> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),

            request = conn.next() => {
                let Some(request) = request else { return Ok(()) };
                handle_request(&request?, hub, &mut conn, &mut feeds, &mut notices).await?;
            }

            Some((run, item)) = feeds.next(), if !feeds.is_empty() => match item {
                Ok(delta) => {
                    send(&mut conn, &ServerMessage::Delta { delta }).await?;
                }
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    // Only this subscriber pays for being slow: it loses the
                    // run and has to come back for a fresh snapshot.
                    feeds.remove(&run);
                    send(&mut conn, &ServerMessage::Overrun { run, missed }).await?;
                }
            },

            Some(notice) = next_notice(&mut notices), if notices.is_some() => match notice {
                Ok(HubNotice::RunOpened { run, name }) => {
                    send(&mut conn, &ServerMessage::RunOpened { run, name }).await?;
                    if !feeds.contains_key(&run) {
                        attach(run, hub, &mut conn, &mut feeds).await?;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(_)) => {
                    // Missed some announcements; reconcile against the full
                    // run list (runs are never evicted).
                    attach_missing(hub, &mut conn, &mut feeds).await?;
                }
            },
        }
    }
}

async fn handle_request(
    line: &str,
    hub: &BroadcastHub,
    conn: &mut Conn,
    feeds: &mut StreamMap<RunId, BroadcastStream<Delta>>,
    notices: &mut Option<BroadcastStream<HubNotice>>,
) -> Result<()> {
    match serde_json::from_str::<ClientRequest>(line) {
        Ok(ClientRequest::Subscribe(SubscribeTarget::Run { run })) => {
            attach(run, hub, conn, feeds).await?;
        }
        Ok(ClientRequest::Subscribe(SubscribeTarget::All(_))) => {
            // Listen for future runs before listing the current ones, so a
            // run opened in between cannot be missed.
            if notices.is_none() {
                *notices = Some(BroadcastStream::new(hub.notices()));
            }
            attach_missing(hub, conn, feeds).await?;
        }
        Ok(ClientRequest::Unsubscribe { run }) => {
            // Idempotent: removing an absent feed is a no-op.
            feeds.remove(&run);
        }
        Err(e) => {
            send(
                conn,
                &ServerMessage::Error {
                    message: format!("bad request: {e}"),
                },
            )
            .await?;
        }
    }
    Ok(())
}

/// Subscribes `run` for this connection: snapshot first, then the live feed
/// joins the fan-in map.
async fn attach(
    run: RunId,
    hub: &BroadcastHub,
    conn: &mut Conn,
    feeds: &mut StreamMap<RunId, BroadcastStream<Delta>>,
) -> Result<()> {
    match hub.subscribe(run).await {
        Ok(sub) => {
            send(
                conn,
                &ServerMessage::Snapshot {
                    snapshot: sub.snapshot,
                },
            )
            .await?;
            feeds.insert(run, BroadcastStream::new(sub.deltas));
        }
        Err(UnknownRun(run)) => {
            send(
                conn,
                &ServerMessage::Error {
                    message: format!("unknown run {run}"),
                },
            )
            .await?;
        }
    }
    Ok(())
}

/// Attaches every hub run this connection is not yet subscribed to.
async fn attach_missing(
    hub: &BroadcastHub,
    conn: &mut Conn,
    feeds: &mut StreamMap<RunId, BroadcastStream<Delta>>,
) -> Result<()> {
    for snapshot in hub.list().await {
        let run = snapshot.run;
        if !feeds.contains_key(&run) {
            attach(run, hub, conn, feeds).await?;
        }
    }
    Ok(())
}

async fn next_notice(
    notices: &mut Option<BroadcastStream<HubNotice>>,
) -> Option<Result<HubNotice, BroadcastStreamRecvError>> {
    match notices {
        Some(stream) => stream.next().await,
        None => None,
    }
}

async fn send(conn: &mut Conn, message: &ServerMessage) -> Result<()> {
    let json = serde_json::to_string(message)?;
    conn.send(json).await?;
    Ok(())
}

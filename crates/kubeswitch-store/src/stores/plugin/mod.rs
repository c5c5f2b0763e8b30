//! Out-of-process plugin store
//!
//! The plugin runs as a child process serving a small gRPC service. One actor
//! task owns the process and the client; `PluginStore` talks to it through a
//! typed mailbox and never sees the underlying streams.

pub mod handshake;
pub mod proto;

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use kubeswitch_core::{StoreConfig, StoreKind};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::store::{SearchResult, Store, Tags};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const RPC_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest wait for the next streamed search record
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginSettings {
    cmd_path: String,
    #[serde(default)]
    args: Vec<String>,
}

enum Request {
    Prefix {
        key: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Verify {
        reply: oneshot::Sender<Result<()>>,
    },
    Fetch {
        key: String,
        tags: Tags,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    Search {
        out: mpsc::Sender<SearchResult>,
        cancel: CancellationToken,
        done: oneshot::Sender<()>,
    },
}

pub struct PluginStore {
    id: String,
    config: StoreConfig,
    mailbox: mpsc::Sender<Request>,
}

impl PluginStore {
    /// Launch the plugin process, wait for its handshake and connect
    pub async fn start(config: StoreConfig) -> Result<Self> {
        let id = config.store_id();
        let settings: PluginSettings = config.typed_config()?;
        let cmd_path = kubeswitch_core::config::expand_path(&settings.cmd_path)?;

        let mut child = Command::new(&cmd_path)
            .args(&settings.args)
            .env(handshake::MAGIC_COOKIE_KEY, handshake::MAGIC_COOKIE_VALUE)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StoreError::plugin(&id, format!("cannot start '{}': {}", cmd_path.display(), e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StoreError::plugin(&id, "plugin stdout unavailable"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(id.clone(), "stderr", stderr));
        }

        let mut lines = BufReader::new(stdout).lines();
        let line = tokio::time::timeout(HANDSHAKE_TIMEOUT, lines.next_line())
            .await
            .map_err(|_| StoreError::timeout("plugin handshake", HANDSHAKE_TIMEOUT))?
            .map_err(|e| StoreError::plugin(&id, format!("reading handshake: {}", e)))?
            .ok_or_else(|| StoreError::plugin(&id, "plugin exited before the handshake"))?;
        let handshake = handshake::parse(&line).map_err(|m| StoreError::plugin(&id, m))?;
        tokio::spawn(forward_lines(id.clone(), "stdout", lines));

        debug!(store = %id, address = %handshake.address, "plugin handshake complete");

        let channel = Endpoint::from_shared(format!("http://{}", handshake.address))
            .map_err(|e| StoreError::plugin(&id, format!("invalid address: {}", e)))?
            .connect_timeout(RPC_TIMEOUT)
            .connect()
            .await
            .map_err(|e| StoreError::plugin(&id, format!("cannot connect: {}", e)))?;

        let mut client = Grpc::new(channel);
        let remote: proto::GetIdResponse =
            unary(&mut client, proto::GET_ID, proto::GetIdRequest {}).await?;
        debug!(store = %id, plugin_id = %remote.id, "plugin ready");

        let (mailbox, requests) = mpsc::channel(16);
        tokio::spawn(
            PluginActor {
                store_id: id.clone(),
                child,
                client,
            }
            .run(requests),
        );

        Ok(Self {
            id,
            config,
            mailbox,
        })
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(make(reply))
            .await
            .map_err(|_| StoreError::plugin(&self.id, "plugin actor stopped"))?;
        response
            .await
            .map_err(|_| StoreError::plugin(&self.id, "plugin actor dropped the request"))?
    }
}

#[async_trait]
impl Store for PluginStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Plugin
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn verify(&self) -> Result<()> {
        self.call(|reply| Request::Verify { reply }).await
    }

    async fn prefix(&self, key: &str) -> Result<String> {
        let key = key.to_string();
        self.call(|reply| Request::Prefix { key, reply }).await
    }

    async fn start_search(&self, out: mpsc::Sender<SearchResult>, cancel: CancellationToken) {
        let (done, finished) = oneshot::channel();
        let request = Request::Search {
            out: out.clone(),
            cancel,
            done,
        };
        if self.mailbox.send(request).await.is_err() {
            let _ = out
                .send(SearchResult::error("plugin actor stopped"))
                .await;
            return;
        }
        drop(out);
        let _ = finished.await;
    }

    async fn fetch(&self, key: &str, tags: &Tags) -> Result<Vec<u8>> {
        let key = key.to_string();
        let tags = tags.clone();
        self.call(|reply| Request::Fetch { key, tags, reply }).await
    }
}

/// Owner of the plugin process and its gRPC client
struct PluginActor {
    store_id: String,
    child: Child,
    client: Grpc<Channel>,
}

impl PluginActor {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        while let Some(request) = requests.recv().await {
            // the channel multiplexes, so a running search never blocks other calls
            let client = self.client.clone();
            let store_id = self.store_id.clone();
            tokio::spawn(handle(store_id, client, request));
        }

        debug!(store = %self.store_id, "stopping plugin");
        if let Err(e) = self.child.kill().await {
            debug!(store = %self.store_id, error = %e, "plugin already exited");
        }
    }
}

async fn handle(store_id: String, mut client: Grpc<Channel>, request: Request) {
    match request {
        Request::Prefix { key, reply } => {
            let result = unary::<_, proto::GetContextPrefixResponse>(
                &mut client,
                proto::GET_CONTEXT_PREFIX,
                proto::GetContextPrefixRequest { path: key },
            )
            .await
            .map(|r| r.prefix);
            let _ = reply.send(result);
        }
        Request::Verify { reply } => {
            let result = unary::<_, proto::VerifyKubeconfigPathsResponse>(
                &mut client,
                proto::VERIFY_KUBECONFIG_PATHS,
                proto::VerifyKubeconfigPathsRequest {},
            )
            .await
            .map(|_| ());
            let _ = reply.send(result);
        }
        Request::Fetch { key, tags, reply } => {
            let result = unary::<_, proto::GetKubeconfigForPathResponse>(
                &mut client,
                proto::GET_KUBECONFIG_FOR_PATH,
                proto::GetKubeconfigForPathRequest {
                    path: key,
                    tags: tags.into_iter().collect(),
                },
            )
            .await
            .map(|r| r.kubeconfig);
            let _ = reply.send(result);
        }
        Request::Search { out, cancel, done } => {
            stream_search(&store_id, &mut client, &out, &cancel).await;
            let _ = done.send(());
        }
    }
}

/// Forward the server-streaming search into `out`, bounded by idle timeouts and `cancel`
async fn stream_search(
    store_id: &str,
    client: &mut Grpc<Channel>,
    out: &mpsc::Sender<SearchResult>,
    cancel: &CancellationToken,
) {
    let opened = tokio::time::timeout(RPC_TIMEOUT, async {
        ready(client).await?;
        let codec = ProstCodec::<proto::StartSearchRequest, proto::StartSearchResponse>::default();
        client
            .server_streaming(
                tonic::Request::new(proto::StartSearchRequest {}),
                PathAndQuery::from_static(proto::START_SEARCH),
                codec,
            )
            .await
    })
    .await;

    let mut stream = match opened {
        Ok(Ok(response)) => response.into_inner(),
        Ok(Err(status)) => {
            let _ = out
                .send(SearchResult::error(format!("starting search: {}", status.message())))
                .await;
            return;
        }
        Err(_) => {
            let _ = out
                .send(SearchResult::error(format!(
                    "starting search timed out after {}s",
                    RPC_TIMEOUT.as_secs()
                )))
                .await;
            return;
        }
    };

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.message()) => next,
        };

        let result = match next {
            Ok(Ok(Some(message))) if !message.error.is_empty() => {
                SearchResult::error(message.error)
            }
            Ok(Ok(Some(message))) => SearchResult::with_tags(
                message.kubeconfig_path,
                message.tags.into_iter().collect(),
            ),
            Ok(Ok(None)) => return,
            Ok(Err(status)) => {
                warn!(store = %store_id, status = %status, "plugin search stream closed");
                let _ = out
                    .send(SearchResult::error(format!(
                        "search stream closed: {}",
                        status.message()
                    )))
                    .await;
                return;
            }
            Err(_) => {
                let _ = out
                    .send(SearchResult::error(format!(
                        "no search result within {}s",
                        STREAM_IDLE_TIMEOUT.as_secs()
                    )))
                    .await;
                return;
            }
        };

        if out.send(result).await.is_err() {
            return;
        }
    }
}

async fn ready(client: &mut Grpc<Channel>) -> std::result::Result<(), tonic::Status> {
    client
        .ready()
        .await
        .map_err(|e| tonic::Status::unavailable(format!("plugin not ready: {}", e)))
}

/// One unary call with the per-RPC deadline
async fn unary<Req, Resp>(client: &mut Grpc<Channel>, method: &'static str, request: Req) -> Result<Resp>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let call = async {
        ready(client).await?;
        client
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(method),
                ProstCodec::<Req, Resp>::default(),
            )
            .await
    };

    match tokio::time::timeout(RPC_TIMEOUT, call).await {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) => Err(StoreError::Rpc(status)),
        Err(_) => Err(StoreError::timeout(method, RPC_TIMEOUT)),
    }
}

async fn forward_output<R>(store_id: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    forward_lines(store_id, stream, BufReader::new(reader).lines()).await;
}

/// Plugin output goes to the debug log so it never reaches the terminal UI
async fn forward_lines<R>(
    store_id: String,
    stream: &'static str,
    mut lines: tokio::io::Lines<BufReader<R>>,
) where
    R: AsyncRead + Unpin,
{
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(store = %store_id, stream, "{}", line);
    }
}

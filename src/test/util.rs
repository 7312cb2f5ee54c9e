use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use bson::{doc, Document};
use tokio::sync::mpsc;

use crate::{
    client::options::TestOptions,
    cmap::conn::wire::{Message, RawChannel},
    cmap::establish::Connector,
    error::{ErrorKind, Result},
    hello::HELLO_COMMAND_NAME,
    options::{ClientOptions, ServerAddress},
    runtime,
    BoxFuture,
};

/// Scripted behavior for one host of a [`MockDeployment`].
#[derive(Clone, Debug)]
pub(crate) struct HostSpec {
    pub(crate) up: bool,
    pub(crate) is_master: bool,
    pub(crate) read_only: bool,
    pub(crate) hosts: Vec<String>,
    pub(crate) passives: Vec<String>,
    /// When set, non-handshake commands are swallowed without a reply, leaving
    /// them in flight until the connection dies.
    pub(crate) stall_commands: bool,
}

impl HostSpec {
    pub(crate) fn primary(hosts: &[&str]) -> Self {
        Self {
            up: true,
            is_master: true,
            read_only: false,
            hosts: hosts.iter().map(|s| s.to_string()).collect(),
            passives: Vec::new(),
            stall_commands: false,
        }
    }

    pub(crate) fn secondary(hosts: &[&str]) -> Self {
        Self {
            is_master: false,
            read_only: true,
            ..Self::primary(hosts)
        }
    }

    pub(crate) fn down() -> Self {
        Self {
            up: false,
            ..Self::primary(&[])
        }
    }

    pub(crate) fn stalled(mut self) -> Self {
        self.stall_commands = true;
        self
    }

    pub(crate) fn with_passives(mut self, passives: &[&str]) -> Self {
        self.passives = passives.iter().map(|s| s.to_string()).collect();
        self
    }
}

struct MockHost {
    spec: HostSpec,
    kill_switches: Vec<mpsc::UnboundedSender<()>>,
    connects: usize,
}

/// An in-memory deployment of scripted servers, substituted for the TCP
/// connector through `ClientOptions::test_options`.
///
/// Each accepted connect spawns a server task that answers `hello` from the
/// host's current spec and echoes everything else, preserving per-connection
/// reply order the way the transport contract requires.
pub(crate) struct MockDeployment {
    hosts: Arc<Mutex<HashMap<ServerAddress, MockHost>>>,
    connect_attempts: AtomicUsize,
}

pub(crate) fn addr(address: &str) -> ServerAddress {
    ServerAddress::parse(address).unwrap()
}

impl MockDeployment {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            hosts: Arc::new(Mutex::new(HashMap::new())),
            connect_attempts: AtomicUsize::new(0),
        })
    }

    /// Sets (or replaces) the scripted behavior of one host. Existing
    /// connections keep running and pick up the new spec on their next request.
    pub(crate) fn set(&self, address: &str, spec: HostSpec) {
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts.entry(addr(address)).or_insert_with(|| MockHost {
            spec: spec.clone(),
            kill_switches: Vec::new(),
            connects: 0,
        });
        host.spec = spec;
    }

    /// Abruptly closes every open connection to the given host.
    pub(crate) fn kill_connections(&self, address: &str) {
        let switches = {
            let mut hosts = self.hosts.lock().unwrap();
            match hosts.get_mut(&addr(address)) {
                Some(host) => std::mem::take(&mut host.kill_switches),
                None => Vec::new(),
            }
        };
        for switch in switches {
            let _ = switch.send(());
        }
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn connects_to(&self, address: &str) -> usize {
        self.hosts
            .lock()
            .unwrap()
            .get(&addr(address))
            .map(|host| host.connects)
            .unwrap_or(0)
    }

    /// Client options seeded with `seeds` and wired to this deployment.
    pub(crate) fn client_options(self: &Arc<Self>, seeds: &[&str]) -> ClientOptions {
        let mut options = ClientOptions::builder()
            .hosts(seeds.iter().map(|s| addr(s)).collect::<Vec<_>>())
            .build();
        options.test_options = Some(TestOptions {
            connector: Some(self.clone() as Arc<dyn Connector>),
        });
        options
    }
}

impl Connector for MockDeployment {
    fn connect<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, Result<RawChannel>> {
        Box::pin(async move {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);

            let (kill_tx, kill_rx) = mpsc::unbounded_channel();
            {
                let mut hosts = self.hosts.lock().unwrap();
                let host = match hosts.get_mut(address) {
                    Some(host) if host.spec.up => host,
                    _ => return Err(ErrorKind::from(std::io::ErrorKind::ConnectionRefused).into()),
                };
                host.connects += 1;
                host.kill_switches.push(kill_tx);
            }

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            runtime::execute(serve(
                self.hosts.clone(),
                address.clone(),
                outbound_rx,
                inbound_tx,
                kill_rx,
            ));

            Ok(RawChannel {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
        })
    }
}

async fn serve(
    hosts: Arc<Mutex<HashMap<ServerAddress, MockHost>>>,
    address: ServerAddress,
    mut requests: mpsc::UnboundedReceiver<Message>,
    replies: mpsc::UnboundedSender<Result<Message>>,
    mut kill: mpsc::UnboundedReceiver<()>,
) {
    loop {
        tokio::select! {
            _ = kill.recv() => break,
            request = requests.recv() => {
                let request = match request {
                    Some(request) => request,
                    None => break,
                };
                let spec = hosts
                    .lock()
                    .unwrap()
                    .get(&address)
                    .map(|host| host.spec.clone());
                let spec = match spec {
                    Some(spec) if spec.up => spec,
                    _ => break,
                };

                if request.body.contains_key(HELLO_COMMAND_NAME) {
                    let mut body = doc! {
                        "ok": 1,
                        "ismaster": spec.is_master,
                        "readOnly": spec.read_only,
                        "logicalSessionTimeoutMinutes": 30_i64,
                    };
                    body.insert("hosts", spec.hosts.clone());
                    body.insert("passives", spec.passives.clone());
                    if replies.send(Ok(reply_to(&request, body))).is_err() {
                        break;
                    }
                } else if spec.stall_commands {
                    // Swallowed: the command stays in flight until the
                    // connection dies.
                } else {
                    let body = doc! { "ok": 1, "echo": request.body.clone() };
                    if replies.send(Ok(reply_to(&request, body))).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

fn reply_to(request: &Message, body: Document) -> Message {
    Message {
        request_id: 0,
        response_to: request.request_id,
        body,
    }
}

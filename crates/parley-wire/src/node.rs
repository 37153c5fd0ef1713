//! Parley node — listens for labeled streams and talks to peers.
//!
//! A [`Node`] owns the ownership registry, the contact directory, the
//! services it offers, its key and the shutdown signal. Each accepted stream is
//! authenticated, then handed to the handler for its label in its own task.
//! Outbound operations open one stream each and race the configured I/O
//! timeout and the shutdown signal.

use crate::config::default_key_path;
use crate::contacts::ContactDirectory;
use crate::discovery::exchange;
use crate::dispatch::{Dispatcher, RESPONSE_ERR, RESPONSE_OK};
use crate::error::WireError;
use crate::event::Event;
use crate::frame::{read_frame, write_frame};
use crate::identity::NodeIdentity;
use crate::ownership::OwnershipRegistry;
use crate::store::{ContactRecord, ContactStore};
use crate::transport::{accept_stream, open_stream, PeerStream, StreamLabel};
use parley_types::{NodeConfig, PeerId, Protocol, ProtocolError, Reasoner, Role, Service};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// A running Parley node.
pub struct Node {
    config: NodeConfig,
    /// Key the node id is derived from; `None` for configured ids.
    identity: Option<NodeIdentity>,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
    contacts: ContactDirectory,
    services: RwLock<Vec<Service>>,
    dispatcher: Dispatcher,
    store: Option<Arc<dyn ContactStore>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Node {
    /// Bind the listener and start accepting streams.
    pub async fn start(
        config: NodeConfig,
        reasoner: Arc<dyn Reasoner>,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), WireError> {
        Self::start_with_store(config, reasoner, None).await
    }

    /// Like [`Node::start`], persisting discovered contacts to `store`.
    ///
    /// With no configured `node_id` the id comes from the key at `key_file`
    /// (default `~/.parley/node.key`), created on first start.
    pub async fn start_with_store(
        config: NodeConfig,
        reasoner: Arc<dyn Reasoner>,
        store: Option<Arc<dyn ContactStore>>,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), WireError> {
        require_secret(&config)?;
        let identity = if config.node_id.is_empty() {
            let path = config.key_file.clone().unwrap_or_else(default_key_path);
            Some(NodeIdentity::load_or_create(&path)?)
        } else {
            None
        };
        Self::launch(config, reasoner, store, identity).await
    }

    /// Start under `identity`, replacing any configured node id.
    pub async fn start_with_identity(
        config: NodeConfig,
        reasoner: Arc<dyn Reasoner>,
        identity: NodeIdentity,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), WireError> {
        require_secret(&config)?;
        Self::launch(config, reasoner, None, Some(identity)).await
    }

    async fn launch(
        mut config: NodeConfig,
        reasoner: Arc<dyn Reasoner>,
        store: Option<Arc<dyn ContactStore>>,
        identity: Option<NodeIdentity>,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), WireError> {
        if let Some(identity) = &identity {
            config.node_id = identity.node_id();
        }

        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            %local_addr,
            node_id = %config.node_id,
            node_name = %config.node_name,
            rendezvous = %config.rendezvous,
            "Parley node listening"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let node = Arc::new(Self {
            config,
            identity,
            local_addr,
            contacts: ContactDirectory::new(),
            services: RwLock::new(Vec::new()),
            dispatcher: Dispatcher::new(OwnershipRegistry::new(), reasoner),
            store,
            shutdown_tx,
            shutdown_rx,
        });

        let node_clone = Arc::clone(&node);
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, node_clone).await;
        });

        Ok((node, accept_handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn node_id(&self) -> PeerId {
        PeerId::new(self.config.node_id.clone())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn ownership(&self) -> &OwnershipRegistry {
        self.dispatcher.ownership()
    }

    pub fn contacts(&self) -> &ContactDirectory {
        &self.contacts
    }

    /// Offer `roles` of `protocol`. Repeated calls for the same protocol add
    /// the roles not yet offered.
    pub fn add_protocol(&self, protocol: Protocol, roles: Vec<Role>) -> Result<(), WireError> {
        if roles.is_empty() {
            return Err(ProtocolError::NoRoles(protocol.name.clone()).into());
        }
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        let merged = match services.iter().position(|s| s.key() == protocol.key()) {
            Some(index) => {
                let mut all = services[index].roles.clone();
                for role in roles {
                    if !all.contains(&role) {
                        all.push(role);
                    }
                }
                let service = Service::new(protocol, all)?;
                services[index] = service.clone();
                service
            }
            None => {
                let service = Service::new(protocol, roles)?;
                services.push(service.clone());
                service
            }
        };
        info!(protocol = %merged.key(), roles = ?merged.roles, "Offering protocol");
        Ok(())
    }

    /// Snapshot of the services this node announces.
    pub fn services(&self) -> Vec<Service> {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Remember where `peer` accepts streams.
    pub fn add_peer(&self, peer: &PeerId, addr: SocketAddr) {
        self.contacts.set_address(peer, addr);
    }

    /// Peers whose service for `protocol_key` includes `role`.
    pub fn find_contacts(&self, protocol_key: &str, role: &Role) -> Vec<PeerId> {
        self.contacts.find_contacts(protocol_key, role)
    }

    /// Instances opened by peers on this node, with their owners.
    pub fn open_instances(&self) -> Vec<(String, PeerId)> {
        self.ownership().open_instances()
    }

    /// Send one event to `peer`. `Ok(true)` when the peer answered `ok`,
    /// `Ok(false)` when it answered `err`.
    pub async fn send_event(&self, peer: &PeerId, event: &Event) -> Result<bool, WireError> {
        let payload = event.marshal()?;
        info!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            instance_key = %event.instance_key(),
            %peer,
            "Send event"
        );
        self.guarded(async {
            let mut stream = self.open_to(peer, StreamLabel::Event).await?;
            write_frame(&mut stream.writer, &payload).await?;
            let response = read_frame(&mut stream.reader, self.config.max_frame_bytes).await?;
            if response == RESPONSE_OK {
                Ok(true)
            } else if response == RESPONSE_ERR {
                Ok(false)
            } else {
                Err(WireError::UnexpectedResponse(
                    String::from_utf8_lossy(&response).into_owned(),
                ))
            }
        })
        .await
    }

    /// Run a discovery exchange with the node at `addr`. Returns its identity.
    pub async fn discover(&self, addr: SocketAddr) -> Result<PeerId, WireError> {
        self.guarded(async {
            let mut stream = open_stream(
                &self.config,
                self.identity.as_ref(),
                Some(self.local_addr),
                addr,
                StreamLabel::Discovery,
            )
            .await?;
            self.contacts.set_address(&stream.remote, addr);
            self.run_discovery(&mut stream).await?;
            Ok(stream.remote)
        })
        .await
    }

    /// Discover every configured bootstrap peer concurrently.
    pub async fn bootstrap(&self) -> Vec<(SocketAddr, Result<PeerId, WireError>)> {
        let addrs = self.config.bootstrap_peers.clone();
        let results =
            futures::future::join_all(addrs.iter().map(|addr| self.discover(*addr))).await;
        for (addr, result) in addrs.iter().zip(&results) {
            match result {
                Ok(peer) => info!(%addr, %peer, "Bootstrap peer discovered"),
                Err(e) => warn!(%addr, error = %e, "Bootstrap peer failed"),
            }
        }
        addrs.into_iter().zip(results).collect()
    }

    /// Send `payload` to `peer` and return what it echoes back.
    pub async fn echo(&self, peer: &PeerId, payload: &[u8]) -> Result<Vec<u8>, WireError> {
        self.guarded(async {
            let mut stream = self.open_to(peer, StreamLabel::Echo).await?;
            write_frame(&mut stream.writer, payload).await?;
            Ok(read_frame(&mut stream.reader, self.config.max_frame_bytes).await?)
        })
        .await
    }

    /// Load `peer`'s stored record into the contact directory.
    /// `Ok(false)` when no store is configured or nothing is stored.
    pub fn restore_contact(&self, peer: &PeerId) -> Result<bool, WireError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(bytes) = store.get(peer)? else {
            return Ok(false);
        };
        let record = ContactRecord::from_bytes(&bytes)?;
        record.restore_into(&self.contacts)?;
        debug!(%peer, "Restored contact from store");
        Ok(true)
    }

    /// Stop accepting streams and cancel pending outbound operations.
    pub fn shutdown(&self) {
        info!(node_id = %self.config.node_id, "Parley node shutting down");
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn open_to(&self, peer: &PeerId, label: StreamLabel) -> Result<PeerStream, WireError> {
        let addr = self
            .contacts
            .address(peer)
            .ok_or_else(|| WireError::UnknownPeer(peer.clone()))?;
        let stream = open_stream(
            &self.config,
            self.identity.as_ref(),
            Some(self.local_addr),
            addr,
            label,
        )
        .await?;
        if stream.remote != *peer {
            return Err(WireError::HandshakeFailed(format!(
                "Expected peer {peer} at {addr}, reached {}",
                stream.remote
            )));
        }
        Ok(stream)
    }

    async fn run_discovery(&self, stream: &mut PeerStream) -> Result<usize, WireError> {
        let services = self.services();
        let learned = exchange(
            &mut stream.reader,
            &mut stream.writer,
            &services,
            &stream.remote,
            &self.contacts,
            self.config.max_frame_bytes,
            self.config.io_timeout(),
        )
        .await?;
        self.persist_contact(&stream.remote);
        Ok(learned)
    }

    fn persist_contact(&self, peer: &PeerId) {
        let Some(store) = &self.store else {
            return;
        };
        let stored = ContactRecord::from_directory(&self.contacts, peer)
            .map_err(WireError::from)
            .and_then(|record| Ok(record.to_bytes()?))
            .and_then(|bytes| Ok(store.put(peer, bytes)?));
        if let Err(e) = stored {
            warn!(%peer, error = %e, "Failed to persist contact");
        }
    }

    /// Run `op` under the I/O timeout, abandoning it on shutdown.
    async fn guarded<T, F>(&self, op: F) -> Result<T, WireError>
    where
        F: Future<Output = Result<T, WireError>>,
    {
        let mut shutdown = self.shutdown_rx.clone();
        if *shutdown.borrow_and_update() {
            return Err(WireError::Cancelled);
        }
        tokio::select! {
            result = tokio::time::timeout(self.config.io_timeout(), op) => {
                result.map_err(|_| WireError::Timeout)?
            }
            _ = shutdown_signal(&mut shutdown) => Err(WireError::Cancelled),
        }
    }

    async fn accept_loop(listener: TcpListener, node: Arc<Node>) {
        let mut shutdown = node.shutdown_rx.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(remote = %addr, "Accepted connection");
                        let node = Arc::clone(&node);
                        let mut stream_shutdown = node.shutdown_rx.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                result = node.handle_inbound(stream, addr) => {
                                    if let Err(e) = result {
                                        debug!(remote = %addr, error = %e, "Inbound stream ended");
                                    }
                                }
                                _ = shutdown_signal(&mut stream_shutdown) => {
                                    debug!(remote = %addr, "Inbound stream closed on shutdown");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                },
                _ = shutdown_signal(&mut shutdown) => {
                    info!(local_addr = %node.local_addr, "Accept loop stopped");
                    return;
                }
            }
        }
    }

    async fn handle_inbound(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), WireError> {
        let timeout = self.config.io_timeout();
        let accepted = tokio::time::timeout(
            timeout,
            accept_stream(&self.config, self.identity.as_ref(), stream, addr),
        )
        .await
        .map_err(|_| WireError::Timeout)??;
        let mut stream = accepted.stream;

        if let Some(listen_addr) = accepted.listen_addr {
            let reachable = if listen_addr.ip().is_unspecified() {
                SocketAddr::new(addr.ip(), listen_addr.port())
            } else {
                listen_addr
            };
            self.contacts.set_address(&stream.remote, reachable);
        }

        debug!(label = %stream.label, peer = %stream.remote, "Stream authenticated");
        match stream.label {
            StreamLabel::Event => {
                self.dispatcher
                    .handle_stream(
                        &mut stream.reader,
                        &mut stream.writer,
                        &stream.remote,
                        self.config.max_frame_bytes,
                        timeout,
                    )
                    .await
            }
            StreamLabel::Discovery => {
                self.run_discovery(&mut stream).await?;
                Ok(())
            }
            StreamLabel::Echo => {
                let payload = tokio::time::timeout(
                    timeout,
                    read_frame(&mut stream.reader, self.config.max_frame_bytes),
                )
                .await
                .map_err(|_| WireError::Timeout)??;
                tokio::time::timeout(timeout, write_frame(&mut stream.writer, &payload))
                    .await
                    .map_err(|_| WireError::Timeout)??;
                Ok(())
            }
        }
    }
}

fn require_secret(config: &NodeConfig) -> Result<(), WireError> {
    if config.shared_secret.is_empty() {
        return Err(WireError::HandshakeFailed(
            "Parley requires shared_secret. Set shared_secret in config.toml".into(),
        ));
    }
    Ok(())
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::read_framed_list;
    use crate::ownership::AuthorizationError;
    use crate::store::MemoryContactStore;
    use tokio::io::AsyncReadExt;
    use parley_types::{Instance, MemoryReasoner, Message, ReasonerCall};

    const SECRET: &str = "test-secret";

    fn config(node_id: &str) -> NodeConfig {
        NodeConfig {
            node_id: node_id.to_string(),
            shared_secret: SECRET.to_string(),
            io_timeout_secs: 5,
            ..NodeConfig::default()
        }
    }

    async fn node(node_id: &str) -> (Arc<Node>, Arc<MemoryReasoner>) {
        let reasoner = Arc::new(MemoryReasoner::new());
        let (node, _handle) = Node::start(config(node_id), reasoner.clone()).await.unwrap();
        (node, reasoner)
    }

    fn purchase() -> Protocol {
        Protocol::new("Purchase", [Role::from("Buyer"), Role::from("Seller")]).with_keys(["ID"])
    }

    fn instance(key: &str) -> Instance {
        Instance::new("Purchase", [("ID", key)])
    }

    #[tokio::test]
    async fn test_start_requires_secret() {
        let config = NodeConfig {
            shared_secret: String::new(),
            ..NodeConfig::default()
        };
        let result = Node::start(config, Arc::new(MemoryReasoner::new())).await;
        assert!(matches!(result, Err(WireError::HandshakeFailed(_))));
    }

    #[tokio::test]
    async fn test_node_id_from_persisted_key() {
        let dir = tempfile::tempdir().unwrap();
        let keyed = || NodeConfig {
            node_id: String::new(),
            key_file: Some(dir.path().join("node.key")),
            ..config("")
        };
        let (b, _) = node("b").await;

        let (a, handle) = Node::start(keyed(), Arc::new(MemoryReasoner::new()))
            .await
            .unwrap();
        let first_id = a.node_id();
        assert_eq!(first_id.as_str().len(), 64);
        a.add_peer(&b.node_id(), b.local_addr());
        assert!(a
            .send_event(&b.node_id(), &Event::new_instance(instance("K7")))
            .await
            .unwrap());
        a.shutdown();
        handle.await.unwrap();

        // Restarted from the same key, it still owns what it opened.
        let (a, _) = Node::start(keyed(), Arc::new(MemoryReasoner::new()))
            .await
            .unwrap();
        assert_eq!(a.node_id(), first_id);
        a.add_peer(&b.node_id(), b.local_addr());
        assert!(a
            .send_event(&b.node_id(), &Event::drop_instance("K7", "restarted"))
            .await
            .unwrap());
        assert!(!b.ownership().contains("K7"));
        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn test_ephemeral_identity_not_persisted() {
        let identity = NodeIdentity::generate();
        let expected = PeerId::new(identity.node_id());
        let (a, _) = Node::start_with_identity(
            config("configured"),
            Arc::new(MemoryReasoner::new()),
            identity,
        )
        .await
        .unwrap();
        assert_eq!(a.node_id(), expected);
        a.shutdown();
    }

    #[tokio::test]
    async fn test_add_protocol_merges_roles() {
        let (a, _) = node("a").await;
        a.add_protocol(purchase(), vec![Role::from("Buyer")]).unwrap();
        a.add_protocol(purchase(), vec![Role::from("Seller"), Role::from("Buyer")])
            .unwrap();
        let services = a.services();
        assert_eq!(services.len(), 1);
        assert_eq!(
            services[0].roles,
            vec![Role::from("Buyer"), Role::from("Seller")]
        );
        assert!(a
            .add_protocol(purchase(), vec![Role::from("Auditor")])
            .is_err());
        assert!(a.add_protocol(purchase(), Vec::new()).is_err());
        a.shutdown();
    }

    #[tokio::test]
    async fn test_event_lifecycle_between_nodes() {
        let (a, _) = node("a").await;
        let (b, reasoner) = node("b").await;
        let (c, _) = node("c").await;
        a.add_peer(&b.node_id(), b.local_addr());
        c.add_peer(&b.node_id(), b.local_addr());

        assert!(a
            .send_event(&b.node_id(), &Event::new_instance(instance("X42")))
            .await
            .unwrap());
        assert_eq!(b.ownership().owner("X42"), Some(a.node_id()));

        assert!(a
            .send_event(
                &b.node_id(),
                &Event::new_message("X42", Message::new("rfq", "X42"))
            )
            .await
            .unwrap());

        assert!(a
            .send_event(&b.node_id(), &Event::drop_instance("X42", "changed my mind"))
            .await
            .unwrap());
        assert!(!b.ownership().contains("X42"));

        // Once dropped, nobody may update it.
        assert!(!c
            .send_event(&b.node_id(), &Event::update(instance("X42")))
            .await
            .unwrap());
        assert_eq!(
            b.ownership()
                .authorize(crate::event::EventType::Update, "X42", &c.node_id()),
            Err(AuthorizationError::NotFound("X42".to_string()))
        );

        assert_eq!(
            reasoner.calls().last(),
            Some(&ReasonerCall::DropInstance {
                instance_key: "X42".to_string(),
                motive: "changed my mind".to_string(),
            })
        );

        // The acceptor learned where the openers listen.
        assert_eq!(b.contacts().address(&a.node_id()), Some(a.local_addr()));
        for n in [a, b, c] {
            n.shutdown();
        }
    }

    #[tokio::test]
    async fn test_non_owner_abort_refused() {
        let (a, _) = node("a").await;
        let (b, reasoner) = node("b").await;
        let (c, _) = node("c").await;
        a.add_peer(&b.node_id(), b.local_addr());
        c.add_peer(&b.node_id(), b.local_addr());

        assert!(a
            .send_event(&b.node_id(), &Event::new_instance(instance("Y1")))
            .await
            .unwrap());
        assert!(!c
            .send_event(&b.node_id(), &Event::abort("Y1", "_"))
            .await
            .unwrap());
        assert_eq!(b.ownership().owner("Y1"), Some(a.node_id()));
        assert_eq!(reasoner.calls().len(), 1);

        assert!(!a
            .send_event(&b.node_id(), &Event::new_instance(instance("Y1")))
            .await
            .unwrap());
        for n in [a, b, c] {
            n.shutdown();
        }
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let (a, _) = node("a").await;
        let err = a
            .send_event(&PeerId::new("ghost"), &Event::abort("k", "_"))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::UnknownPeer(_)));
        a.shutdown();
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let (a, _) = node("a").await;
        let (b, _) = node("b").await;
        a.add_peer(&b.node_id(), b.local_addr());
        let reply = a.echo(&b.node_id(), b"are you there").await.unwrap();
        assert_eq!(reply, b"are you there");
        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn test_discovery_between_nodes() {
        let (a, _) = node("a").await;
        let (b, _) = node("b").await;
        a.add_protocol(purchase(), vec![Role::from("Buyer")]).unwrap();
        b.add_protocol(purchase(), vec![Role::from("Seller")]).unwrap();

        let found = a.discover(b.local_addr()).await.unwrap();
        assert_eq!(found, b.node_id());
        assert_eq!(
            a.find_contacts("Purchase", &Role::from("Seller")),
            vec![b.node_id()]
        );
        assert!(a.find_contacts("Purchase", &Role::from("Buyer")).is_empty());

        // The acceptor's half of the exchange finishes in its own task.
        let mut learned = false;
        for _ in 0..50 {
            if !b.find_contacts("Purchase", &Role::from("Buyer")).is_empty() {
                learned = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(learned);
        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn test_bootstrap_reports_each_peer() {
        let (b, _) = node("b").await;
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = unused.local_addr().unwrap();
        drop(unused);

        let reasoner = Arc::new(MemoryReasoner::new());
        let mut cfg = config("a");
        cfg.bootstrap_peers = vec![b.local_addr(), dead];
        let (a, _handle) = Node::start(cfg, reasoner).await.unwrap();

        let results = a.bootstrap().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, b.local_addr());
        assert_eq!(results[0].1.as_ref().unwrap(), &b.node_id());
        assert!(results[1].1.is_err());
        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn test_operations_cancelled_after_shutdown() {
        let (a, _) = node("a").await;
        let (b, _) = node("b").await;
        a.add_peer(&b.node_id(), b.local_addr());
        a.shutdown();
        assert!(a.is_shutting_down());
        let err = a.echo(&b.node_id(), b"ping").await.unwrap_err();
        assert!(matches!(err, WireError::Cancelled));
        let err = a.discover(b.local_addr()).await.unwrap_err();
        assert!(matches!(err, WireError::Cancelled));
        b.shutdown();
    }

    #[tokio::test]
    async fn test_accept_loop_exits_on_shutdown() {
        let reasoner = Arc::new(MemoryReasoner::new());
        let (a, handle) = Node::start(config("a"), reasoner).await.unwrap();
        a.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_inbound_streams() {
        let (b, _) = node("b").await;
        b.add_protocol(purchase(), vec![Role::from("Seller")]).unwrap();

        // Open a discovery stream and never send our half of the exchange.
        let mut stream = open_stream(&config("c"), None, None, b.local_addr(), StreamLabel::Discovery)
            .await
            .unwrap();
        let announced = read_framed_list(&mut stream.reader, 64 * 1024).await.unwrap();
        assert_eq!(announced.len(), 1);

        b.shutdown();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            stream.reader.read(&mut buf),
        )
        .await
        .expect("stream still open after shutdown")
        .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_discovered_contact_persisted_and_restored() {
        let store: Arc<dyn ContactStore> = Arc::new(MemoryContactStore::new());
        let (a, _handle) = Node::start_with_store(
            config("a"),
            Arc::new(MemoryReasoner::new()),
            Some(Arc::clone(&store)),
        )
        .await
        .unwrap();
        let (b, _) = node("b").await;
        b.add_protocol(purchase(), vec![Role::from("Seller")]).unwrap();

        let peer = a.discover(b.local_addr()).await.unwrap();
        assert!(store.has(&peer));

        a.contacts().remove(&peer);
        assert!(a.find_contacts("Purchase", &Role::from("Seller")).is_empty());
        assert!(a.restore_contact(&peer).unwrap());
        assert_eq!(
            a.find_contacts("Purchase", &Role::from("Seller")),
            vec![peer.clone()]
        );
        assert_eq!(a.contacts().address(&peer), Some(b.local_addr()));
        assert!(!a.restore_contact(&PeerId::new("stranger")).unwrap());
        a.shutdown();
        b.shutdown();
    }
}

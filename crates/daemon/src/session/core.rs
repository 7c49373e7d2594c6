//! The session command loop.
//!
//! All session state transitions happen on a single task: commands are
//! dequeued from a mailbox strictly one at a time, each transition
//! producing the next [`Environment`] value plus a list of effects. The
//! new environment is committed before the next command is dequeued,
//! which serializes concurrent client requests without any locking —
//! two racing opens of the same vacant file are applied in queue order,
//! so exactly one of them observes vacancy and wins the write grant.
//!
//! Commands arriving before [`Command::Initialize`] are stashed and
//! replayed in arrival order exactly once after initialization.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use protocol::messages::{
    CapabilityForceReleased, CapabilityGranted, CloseFileResult, CreateFileDescriptor,
    CreateFileResult, CreateKind, Message, OpenFileResponse, OpenedFile, ReadContent,
    ReadFileResult, WriteFileResult,
};
use protocol::{
    Capability, CapabilityIdGen, CapabilityRegistration, CapabilityRegistrationId, ClientId,
    OperationError, RootId, WorkspacePath,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::files::FileAccess;
use crate::session::environment::{Client, Environment, OpenBuffer};

/// Session-scoped configuration: the content roots workspace paths
/// resolve against.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    roots: BTreeMap<RootId, PathBuf>,
}

impl SessionConfig {
    /// Build a configuration from a root-name → directory mapping.
    pub fn new(roots: BTreeMap<RootId, PathBuf>) -> Self {
        Self { roots }
    }

    /// Resolve a content root by name.
    pub fn content_root(&self, root: &RootId) -> Result<&Path, OperationError> {
        self.roots
            .get(root)
            .map(PathBuf::as_path)
            .ok_or_else(|| OperationError::RootNotFound { root: root.clone() })
    }

    /// Resolve a workspace path to an absolute filesystem path.
    pub fn resolve(&self, path: &WorkspacePath) -> Result<PathBuf, OperationError> {
        Ok(self.content_root(path.root())?.join(path.relative()))
    }

    /// Number of configured roots.
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }
}

/// Commands accepted by the session core.
///
/// Requests that expect an answer carry a oneshot reply sender; the
/// answer is always a protocol [`Message`] ready for the transport to
/// forward.
#[derive(Debug)]
pub enum Command {
    /// Provide the session configuration and start processing.
    Initialize {
        /// Content roots for this session.
        config: SessionConfig,
    },
    /// A client connected.
    Connect {
        /// The new client's id.
        client: ClientId,
        /// Channel the daemon pushes notifications through.
        outbound: mpsc::UnboundedSender<Message>,
    },
    /// A client disconnected.
    Disconnect {
        /// The departing client's id.
        client: ClientId,
    },
    /// Claim a capability, revoking any conflicting grant.
    AcquireCapability {
        /// The requesting client.
        client: ClientId,
        /// The registration to grant, minted by the session's id generator.
        registration: CapabilityRegistration,
    },
    /// Release a held capability.
    ReleaseCapability {
        /// The releasing client.
        client: ClientId,
        /// Registration to release.
        id: CapabilityRegistrationId,
    },
    /// Open a file, joining or creating its shared buffer.
    OpenFile {
        /// The opening client.
        client: ClientId,
        /// Path to open.
        path: WorkspacePath,
        /// Reply channel.
        reply: oneshot::Sender<Message>,
    },
    /// Close a previously opened file.
    CloseFile {
        /// The closing client.
        client: ClientId,
        /// Path to close.
        path: WorkspacePath,
        /// Reply channel.
        reply: oneshot::Sender<Message>,
    },
    /// Read a file from disk.
    ReadFile {
        /// Path to read.
        path: WorkspacePath,
        /// Reply channel.
        reply: oneshot::Sender<Message>,
    },
    /// Write content to a file on disk.
    WriteFile {
        /// Path to write.
        path: WorkspacePath,
        /// Content to write.
        content: Vec<u8>,
        /// Reply channel.
        reply: oneshot::Sender<Message>,
    },
    /// Create a file or directory.
    CreateFile {
        /// What to create.
        descriptor: CreateFileDescriptor,
        /// Reply channel.
        reply: oneshot::Sender<Message>,
    },
}

impl Command {
    /// Command name for log lines.
    fn name(&self) -> &'static str {
        match self {
            Command::Initialize { .. } => "Initialize",
            Command::Connect { .. } => "Connect",
            Command::Disconnect { .. } => "Disconnect",
            Command::AcquireCapability { .. } => "AcquireCapability",
            Command::ReleaseCapability { .. } => "ReleaseCapability",
            Command::OpenFile { .. } => "OpenFile",
            Command::CloseFile { .. } => "CloseFile",
            Command::ReadFile { .. } => "ReadFile",
            Command::WriteFile { .. } => "WriteFile",
            Command::CreateFile { .. } => "CreateFile",
        }
    }
}

/// Side effects of one state transition, performed after the new
/// environment value is committed.
#[derive(Debug)]
pub enum Effect {
    /// Push a notification to a client's outbound channel.
    Notify {
        /// Receiving client.
        client: ClientId,
        /// The notification.
        message: Message,
    },
    /// Answer the command's reply channel.
    Reply {
        /// The requester's reply channel.
        to: oneshot::Sender<Message>,
        /// The response.
        message: Message,
    },
}

/// Lifecycle of the session core.
#[derive(Debug)]
enum SessionState {
    /// Waiting for `Initialize`; arriving commands are stashed.
    Uninitialized { pending: VecDeque<Command> },
    /// Processing commands against the current environment.
    Initialized {
        config: SessionConfig,
        environment: Environment,
    },
}

/// The session core task has stopped and can no longer answer.
#[derive(Debug, Error)]
#[error("session core is gone")]
pub struct SessionGone;

/// Cloneable handle for submitting commands to the session core.
///
/// The handle owns the capability id generator, so registrations for
/// explicit acquire requests are minted before the command is queued.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
    idgen: Arc<CapabilityIdGen>,
}

impl SessionHandle {
    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("Session core is gone; command dropped");
        }
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<Message>) -> Command,
    ) -> Result<Message, SessionGone> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(build(reply_tx)).map_err(|_| SessionGone)?;
        reply_rx.await.map_err(|_| SessionGone)
    }

    /// Provide the session configuration and start processing.
    pub fn initialize(&self, config: SessionConfig) {
        self.send(Command::Initialize { config });
    }

    /// Announce a connected client and its outbound channel.
    pub fn connect(&self, client: ClientId, outbound: mpsc::UnboundedSender<Message>) {
        self.send(Command::Connect { client, outbound });
    }

    /// Announce a disconnected client.
    pub fn disconnect(&self, client: ClientId) {
        self.send(Command::Disconnect { client });
    }

    /// Request a capability for the client, revoking conflicting holders.
    ///
    /// The grant is announced through the client's outbound channel as a
    /// `CapabilityGranted` notification.
    pub fn acquire_capability(&self, client: ClientId, capability: Capability) {
        let registration = CapabilityRegistration::new(self.idgen.next_id(), capability);
        self.send(Command::AcquireCapability {
            client,
            registration,
        });
    }

    /// Release a capability held by the client.
    pub fn release_capability(&self, client: ClientId, id: CapabilityRegistrationId) {
        self.send(Command::ReleaseCapability { client, id });
    }

    /// Open a file and await the response message.
    pub async fn open_file(
        &self,
        client: ClientId,
        path: WorkspacePath,
    ) -> Result<Message, SessionGone> {
        self.request(|reply| Command::OpenFile {
            client,
            path,
            reply,
        })
        .await
    }

    /// Close a file and await the response message.
    pub async fn close_file(
        &self,
        client: ClientId,
        path: WorkspacePath,
    ) -> Result<Message, SessionGone> {
        self.request(|reply| Command::CloseFile {
            client,
            path,
            reply,
        })
        .await
    }

    /// Read a file and await the response message.
    pub async fn read_file(&self, path: WorkspacePath) -> Result<Message, SessionGone> {
        self.request(|reply| Command::ReadFile { path, reply }).await
    }

    /// Write a file and await the response message.
    pub async fn write_file(
        &self,
        path: WorkspacePath,
        content: Vec<u8>,
    ) -> Result<Message, SessionGone> {
        self.request(|reply| Command::WriteFile {
            path,
            content,
            reply,
        })
        .await
    }

    /// Create a file or directory and await the response message.
    pub async fn create_file(
        &self,
        descriptor: CreateFileDescriptor,
    ) -> Result<Message, SessionGone> {
        self.request(|reply| Command::CreateFile { descriptor, reply })
            .await
    }
}

/// The message-driven session core.
pub struct SessionCore<F> {
    state: SessionState,
    files: F,
    idgen: Arc<CapabilityIdGen>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl<F: FileAccess + 'static> SessionCore<F> {
    /// Spawn the core onto the runtime, returning its handle.
    pub fn spawn(files: F, idgen: Arc<CapabilityIdGen>) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = Self {
            state: SessionState::Uninitialized {
                pending: VecDeque::new(),
            },
            files,
            idgen: Arc::clone(&idgen),
            rx,
        };
        tokio::spawn(core.run());
        SessionHandle { tx, idgen }
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        debug!("Session command channel closed; core stopping");
    }

    fn handle(&mut self, command: Command) {
        match &mut self.state {
            SessionState::Uninitialized { pending } => match command {
                Command::Initialize { config } => {
                    let deferred = std::mem::take(pending);
                    info!(
                        roots = config.root_count(),
                        deferred = deferred.len(),
                        "Session initialized"
                    );
                    self.state = SessionState::Initialized {
                        config,
                        environment: Environment::new(),
                    };
                    for queued in deferred {
                        self.handle(queued);
                    }
                }
                other => {
                    debug!(command = other.name(), "Deferring until initialized");
                    pending.push_back(other);
                }
            },
            SessionState::Initialized {
                config,
                environment,
            } => {
                if matches!(command, Command::Initialize { .. }) {
                    warn!("Ignoring repeated Initialize");
                    return;
                }
                let (next, effects) =
                    transition(config, environment, &self.files, &self.idgen, command);
                *environment = next;
                perform(environment, effects);
            }
        }
    }
}

/// Deliver the effects of a committed transition.
fn perform(environment: &Environment, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Notify { client, message } => match environment.client(client) {
                Some(target) => target.send(message),
                None => {
                    debug!(client_id = %client, "Dropping notification for unknown client");
                }
            },
            Effect::Reply { to, message } => {
                if to.send(message).is_err() {
                    debug!("Requester went away before the reply");
                }
            }
        }
    }
}

/// Apply one command to the environment.
///
/// Pure with respect to session state: the caller commits the returned
/// environment and performs the effects. File I/O runs inline; the
/// serialization of transitions is the contract that matters.
fn transition<F: FileAccess>(
    config: &SessionConfig,
    environment: &Environment,
    files: &F,
    idgen: &CapabilityIdGen,
    command: Command,
) -> (Environment, Vec<Effect>) {
    match command {
        // Handled at the state layer.
        Command::Initialize { .. } => (environment.clone(), Vec::new()),

        Command::Connect { client, outbound } => {
            match environment.add_client(Client::new(client, outbound)) {
                Ok(next) => {
                    info!(client_id = %client, "Client connected");
                    (next, Vec::new())
                }
                Err(err) => {
                    warn!(client_id = %client, "Ignoring connect: {err}");
                    (environment.clone(), Vec::new())
                }
            }
        }

        Command::Disconnect { client } => {
            let (next, released) = environment.remove_capabilities_of(client);
            if !released.is_empty() {
                debug!(
                    client_id = %client,
                    count = released.len(),
                    "Released capabilities held by departing client"
                );
            }
            let next = next.release_buffers_of(client).remove_client(client);
            info!(client_id = %client, "Client disconnected");
            (next, Vec::new())
        }

        Command::AcquireCapability {
            client,
            registration,
        } => {
            if environment.client(client).is_none() {
                warn!(client_id = %client, "Ignoring capability request from unknown client");
                return (environment.clone(), Vec::new());
            }
            match &registration.capability {
                Capability::CanEdit(path) => {
                    let path = path.clone();
                    // Exclusivity: evict every conflicting grant before
                    // granting anew, whoever holds it.
                    let (next, revoked) = environment.remove_capabilities_by(|capability| {
                        matches!(capability, Capability::CanEdit(p) if *p == path)
                    });
                    let mut effects = Vec::new();
                    for (holder, registrations) in revoked {
                        for old in registrations {
                            debug!(
                                client_id = %holder,
                                registration = %old.id,
                                path = %path,
                                "Force-releasing capability"
                            );
                            effects.push(Effect::Notify {
                                client: holder,
                                message: Message::CapabilityForceReleased(
                                    CapabilityForceReleased { id: old.id },
                                ),
                            });
                        }
                    }
                    let next = next.grant_capability(client, registration.clone());
                    info!(
                        client_id = %client,
                        registration = %registration.id,
                        path = %path,
                        "Granted edit capability"
                    );
                    effects.push(Effect::Notify {
                        client,
                        message: Message::CapabilityGranted(CapabilityGranted { registration }),
                    });
                    (next, effects)
                }
            }
        }

        Command::ReleaseCapability { client, id } => {
            let (next, released) = environment.release_capability(client, id);
            if released {
                debug!(client_id = %client, registration = %id, "Capability released");
            } else {
                warn!(
                    client_id = %client,
                    registration = %id,
                    "Ignoring release of unknown or non-owned capability"
                );
            }
            (next, Vec::new())
        }

        Command::OpenFile {
            client,
            path,
            reply,
        } => {
            let open = match environment.file(&path) {
                Some(existing) => existing.with_client(client),
                None => {
                    let loaded = config
                        .resolve(&path)
                        .and_then(|file| files.read(&file).map_err(OperationError::from));
                    match loaded {
                        Ok(content) => OpenBuffer::new(content).with_client(client),
                        Err(err) => {
                            debug!(client_id = %client, path = %path, "Open failed: {err}");
                            let message = Message::OpenFileResponse(OpenFileResponse {
                                result: Err(err),
                            });
                            return (
                                environment.clone(),
                                vec![Effect::Reply { to: reply, message }],
                            );
                        }
                    }
                }
            };
            let (write_capability, next) =
                environment.grant_can_edit_if_vacant(client, &path, idgen);
            if let Some(granted) = &write_capability {
                debug!(
                    client_id = %client,
                    registration = %granted.id,
                    path = %path,
                    "Auto-granted edit capability on open"
                );
            }
            let opened = OpenedFile {
                content: open.buffer().content.clone(),
                version: open.buffer().version,
                write_capability,
            };
            let next = next.set_file(path.clone(), open);
            debug!(client_id = %client, path = %path, "File opened");
            let message = Message::OpenFileResponse(OpenFileResponse { result: Ok(opened) });
            (next, vec![Effect::Reply { to: reply, message }])
        }

        Command::CloseFile {
            client,
            path,
            reply,
        } => {
            let next = match environment.file(&path) {
                Some(open) if open.open_by().contains(&client) => {
                    let remaining = open.without_client(client);
                    let next = if remaining.is_orphaned() {
                        debug!(path = %path, "Evicting buffer with no remaining openers");
                        environment.remove_file(&path)
                    } else {
                        environment.set_file(path.clone(), remaining)
                    };
                    // The closer's edit grant does not outlive its view of
                    // the file.
                    match next.can_edit_registration(client, &path) {
                        Some(id) => next.release_capability(client, id).0,
                        None => next,
                    }
                }
                _ => {
                    debug!(client_id = %client, path = %path, "Close of file not open by client");
                    environment.clone()
                }
            };
            let message = Message::CloseFileResult(CloseFileResult { result: Ok(()) });
            (next, vec![Effect::Reply { to: reply, message }])
        }

        Command::ReadFile { path, reply } => {
            let result = config
                .resolve(&path)
                .and_then(|file| files.read(&file).map_err(OperationError::from))
                .map(|content| ReadContent { content });
            let message = Message::ReadFileResult(ReadFileResult { result });
            (environment.clone(), vec![Effect::Reply { to: reply, message }])
        }

        Command::WriteFile {
            path,
            content,
            reply,
        } => {
            let result = config
                .resolve(&path)
                .and_then(|file| files.write(&file, &content).map_err(OperationError::from));
            let message = Message::WriteFileResult(WriteFileResult { result });
            (environment.clone(), vec![Effect::Reply { to: reply, message }])
        }

        Command::CreateFile { descriptor, reply } => {
            let result = config.resolve(&descriptor.path).and_then(|target| {
                match descriptor.kind {
                    CreateKind::File => files.create_file(&target),
                    CreateKind::Directory => files.create_directory(&target),
                }
                .map_err(OperationError::from)
            });
            let message = Message::CreateFileResult(CreateFileResult { result });
            (environment.clone(), vec![Effect::Reply { to: reply, message }])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::MemoryFiles;
    use protocol::error::FileSystemFailure;

    fn session_config() -> SessionConfig {
        let mut roots = BTreeMap::new();
        roots.insert(RootId::new("project"), PathBuf::from("/work"));
        SessionConfig::new(roots)
    }

    fn wpath(name: &str) -> WorkspacePath {
        WorkspacePath::new(RootId::new("project"), [name]).unwrap()
    }

    fn seeded_files() -> MemoryFiles {
        let files = MemoryFiles::new();
        files.insert("/work/a.txt", b"hello".to_vec());
        files
    }

    fn connected(
        environment: &Environment,
    ) -> (Environment, ClientId, mpsc::UnboundedReceiver<Message>) {
        let id = ClientId::generate();
        let (tx, rx) = mpsc::unbounded_channel();
        let next = environment.add_client(Client::new(id, tx)).unwrap();
        (next, id, rx)
    }

    fn open(
        config: &SessionConfig,
        environment: &Environment,
        files: &MemoryFiles,
        idgen: &CapabilityIdGen,
        client: ClientId,
        path: &WorkspacePath,
    ) -> (Environment, OpenedFile) {
        let (reply, _rx) = oneshot::channel();
        let (next, effects) = transition(
            config,
            environment,
            files,
            idgen,
            Command::OpenFile {
                client,
                path: path.clone(),
                reply,
            },
        );
        let opened = match effects.into_iter().next() {
            Some(Effect::Reply {
                message: Message::OpenFileResponse(OpenFileResponse { result: Ok(opened) }),
                ..
            }) => opened,
            other => panic!("expected successful open, got {other:?}"),
        };
        (next, opened)
    }

    #[test]
    fn test_open_vacant_file_grants_write_capability() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, _rx) = connected(&Environment::new());

        let (env, opened) = open(&config, &env, &files, &idgen, c1, &wpath("a.txt"));
        assert_eq!(opened.content, b"hello");
        assert_eq!(opened.version, 0);
        let granted = opened.write_capability.expect("first opener gets the grant");
        assert_eq!(
            granted.capability,
            Capability::CanEdit(wpath("a.txt"))
        );
        assert_eq!(env.can_edit_holder(&wpath("a.txt")), Some(c1));
        assert_eq!(env.buffer_count(), 1);
        assert!(env.file(&wpath("a.txt")).unwrap().open_by().contains(&c1));
    }

    #[test]
    fn test_second_opener_sees_buffer_without_capability() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, _rx1) = connected(&Environment::new());
        let (env, c2, _rx2) = connected(&env);

        let (env, first) = open(&config, &env, &files, &idgen, c1, &wpath("a.txt"));
        assert!(first.write_capability.is_some());

        let (env, second) = open(&config, &env, &files, &idgen, c2, &wpath("a.txt"));
        assert_eq!(second.content, b"hello");
        assert!(second.write_capability.is_none());

        // Both clients share one buffer; the single grant stands.
        assert_eq!(env.buffer_count(), 1);
        assert_eq!(env.file(&wpath("a.txt")).unwrap().open_by().len(), 2);
        assert_eq!(env.capability_count(), 1);
        assert_eq!(env.can_edit_holder(&wpath("a.txt")), Some(c1));
    }

    #[test]
    fn test_reopen_by_same_client_is_idempotent() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, _rx) = connected(&Environment::new());

        let (env, first) = open(&config, &env, &files, &idgen, c1, &wpath("a.txt"));
        let reg = first.write_capability.unwrap();
        let (env, again) = open(&config, &env, &files, &idgen, c1, &wpath("a.txt"));

        // The client already holds the grant, so reopening offers none.
        assert!(again.write_capability.is_none());
        assert_eq!(env.capability_count(), 1);
        assert_eq!(
            env.can_edit_registration(c1, &wpath("a.txt")),
            Some(reg.id)
        );
        assert_eq!(env.file(&wpath("a.txt")).unwrap().open_by().len(), 1);
    }

    #[test]
    fn test_open_missing_file_leaves_environment_unchanged() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, _rx) = connected(&Environment::new());

        let (reply, mut reply_rx) = oneshot::channel();
        let (next, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::OpenFile {
                client: c1,
                path: wpath("absent.txt"),
                reply,
            },
        );
        perform(&next, effects);
        let message = reply_rx.try_recv().unwrap();
        assert_eq!(
            message,
            Message::OpenFileResponse(OpenFileResponse {
                result: Err(OperationError::FileSystem(FileSystemFailure::NotFound)),
            })
        );
        assert_eq!(next.buffer_count(), 0);
        assert_eq!(next.capability_count(), 0);
    }

    #[test]
    fn test_open_unknown_root_reports_root_not_found() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, _rx) = connected(&Environment::new());
        let stray = WorkspacePath::new(RootId::new("nowhere"), ["a.txt"]).unwrap();

        let (reply, mut reply_rx) = oneshot::channel();
        let (next, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::OpenFile {
                client: c1,
                path: stray,
                reply,
            },
        );
        perform(&next, effects);
        let message = reply_rx.try_recv().unwrap();
        assert!(matches!(
            message,
            Message::OpenFileResponse(OpenFileResponse {
                result: Err(OperationError::RootNotFound { .. }),
            })
        ));
        assert_eq!(next.buffer_count(), 0);
    }

    #[test]
    fn test_acquire_force_releases_previous_holder() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, mut rx1) = connected(&Environment::new());
        let (env, c2, mut rx2) = connected(&env);

        let (env, opened) = open(&config, &env, &files, &idgen, c1, &wpath("a.txt"));
        let reg1 = opened.write_capability.unwrap();

        let registration = CapabilityRegistration::new(
            idgen.next_id(),
            Capability::CanEdit(wpath("a.txt")),
        );
        let reg2_id = registration.id;
        let (env, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::AcquireCapability {
                client: c2,
                registration,
            },
        );
        perform(&env, effects);

        // The loser learns of the revocation, exactly once.
        let notice = rx1.try_recv().unwrap();
        assert_eq!(
            notice,
            Message::CapabilityForceReleased(CapabilityForceReleased { id: reg1.id })
        );
        assert!(rx1.try_recv().is_err());

        // The winner gets a fresh registration.
        let granted = rx2.try_recv().unwrap();
        match granted {
            Message::CapabilityGranted(CapabilityGranted { registration }) => {
                assert_eq!(registration.id, reg2_id);
                assert_ne!(registration.id, reg1.id);
            }
            other => panic!("expected grant, got {other:?}"),
        }

        assert_eq!(env.capability_count(), 1);
        assert_eq!(env.can_edit_holder(&wpath("a.txt")), Some(c2));
    }

    #[test]
    fn test_exclusivity_under_repeated_acquires() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, _rx1) = connected(&Environment::new());
        let (env, c2, _rx2) = connected(&env);

        let mut env = env;
        for round in 0..6 {
            let claimant = if round % 2 == 0 { c1 } else { c2 };
            let registration = CapabilityRegistration::new(
                idgen.next_id(),
                Capability::CanEdit(wpath("a.txt")),
            );
            let (next, _) = transition(
                &config,
                &env,
                &files,
                &idgen,
                Command::AcquireCapability {
                    client: claimant,
                    registration,
                },
            );
            env = next;
            assert_eq!(env.capability_count(), 1);
            assert_eq!(env.can_edit_holder(&wpath("a.txt")), Some(claimant));
        }
    }

    #[test]
    fn test_disconnect_frees_grants_and_buffers() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, _rx1) = connected(&Environment::new());
        let (env, c2, _rx2) = connected(&env);

        let (env, _) = open(&config, &env, &files, &idgen, c1, &wpath("a.txt"));

        let (env, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::Disconnect { client: c1 },
        );
        assert!(effects.is_empty());
        assert_eq!(env.client_count(), 1);
        assert_eq!(env.capability_count(), 0);
        assert_eq!(env.buffer_count(), 0);

        // The freed path grants again to the next opener.
        let (env, reopened) = open(&config, &env, &files, &idgen, c2, &wpath("a.txt"));
        assert!(reopened.write_capability.is_some());
        assert_eq!(env.can_edit_holder(&wpath("a.txt")), Some(c2));
    }

    #[test]
    fn test_close_releases_grant_and_evicts_buffer() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, _rx) = connected(&Environment::new());

        let (env, _) = open(&config, &env, &files, &idgen, c1, &wpath("a.txt"));

        let (reply, mut reply_rx) = oneshot::channel();
        let (env, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::CloseFile {
                client: c1,
                path: wpath("a.txt"),
                reply,
            },
        );
        perform(&env, effects);
        assert_eq!(
            reply_rx.try_recv().unwrap(),
            Message::CloseFileResult(CloseFileResult { result: Ok(()) })
        );
        assert_eq!(env.buffer_count(), 0);
        assert_eq!(env.capability_count(), 0);

        // Closing a file that is not open is a no-op success.
        let (reply, mut reply_rx) = oneshot::channel();
        let (env, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::CloseFile {
                client: c1,
                path: wpath("a.txt"),
                reply,
            },
        );
        perform(&env, effects);
        assert_eq!(
            reply_rx.try_recv().unwrap(),
            Message::CloseFileResult(CloseFileResult { result: Ok(()) })
        );
        assert_eq!(env.buffer_count(), 0);
    }

    #[test]
    fn test_close_keeps_buffer_for_remaining_openers() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, _rx1) = connected(&Environment::new());
        let (env, c2, _rx2) = connected(&env);

        let (env, _) = open(&config, &env, &files, &idgen, c1, &wpath("a.txt"));
        let (env, _) = open(&config, &env, &files, &idgen, c2, &wpath("a.txt"));

        let (reply, _reply_rx) = oneshot::channel();
        let (env, _) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::CloseFile {
                client: c1,
                path: wpath("a.txt"),
                reply,
            },
        );
        let open = env.file(&wpath("a.txt")).expect("buffer survives");
        assert_eq!(open.open_by().len(), 1);
        assert!(open.open_by().contains(&c2));
        // The closer's grant went with it; the path is vacant again.
        assert!(env.can_edit_holder(&wpath("a.txt")).is_none());
    }

    #[test]
    fn test_write_then_read_passthrough() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let env = Environment::new();

        let (reply, mut reply_rx) = oneshot::channel();
        let (env, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::WriteFile {
                path: wpath("b.txt"),
                content: b"fresh".to_vec(),
                reply,
            },
        );
        perform(&env, effects);
        assert_eq!(
            reply_rx.try_recv().unwrap(),
            Message::WriteFileResult(WriteFileResult { result: Ok(()) })
        );
        // Passthroughs never touch buffers or grants.
        assert_eq!(env.buffer_count(), 0);
        assert_eq!(env.capability_count(), 0);

        let (reply, mut reply_rx) = oneshot::channel();
        let (env, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::ReadFile {
                path: wpath("b.txt"),
                reply,
            },
        );
        perform(&env, effects);
        assert_eq!(
            reply_rx.try_recv().unwrap(),
            Message::ReadFileResult(ReadFileResult {
                result: Ok(ReadContent {
                    content: b"fresh".to_vec(),
                }),
            })
        );
    }

    #[test]
    fn test_open_then_read_round_trip() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let (env, c1, _rx) = connected(&Environment::new());

        let (env, opened) = open(&config, &env, &files, &idgen, c1, &wpath("a.txt"));

        let (reply, mut reply_rx) = oneshot::channel();
        let (env, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::ReadFile {
                path: wpath("a.txt"),
                reply,
            },
        );
        perform(&env, effects);
        match reply_rx.try_recv().unwrap() {
            Message::ReadFileResult(ReadFileResult { result: Ok(read) }) => {
                assert_eq!(read.content, opened.content);
            }
            other => panic!("expected read result, got {other:?}"),
        }
    }

    #[test]
    fn test_create_file_and_directory() {
        let config = session_config();
        let files = seeded_files();
        let idgen = CapabilityIdGen::new();
        let env = Environment::new();

        let descriptor = CreateFileDescriptor {
            path: wpath("new.txt"),
            kind: CreateKind::File,
        };
        let (reply, mut reply_rx) = oneshot::channel();
        let (env, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::CreateFile {
                descriptor: descriptor.clone(),
                reply,
            },
        );
        perform(&env, effects);
        assert_eq!(
            reply_rx.try_recv().unwrap(),
            Message::CreateFileResult(CreateFileResult { result: Ok(()) })
        );

        // Creating the same file again fails with a tagged error.
        let (reply, mut reply_rx) = oneshot::channel();
        let (env, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::CreateFile { descriptor, reply },
        );
        perform(&env, effects);
        assert_eq!(
            reply_rx.try_recv().unwrap(),
            Message::CreateFileResult(CreateFileResult {
                result: Err(OperationError::FileSystem(FileSystemFailure::AlreadyExists)),
            })
        );

        let (reply, mut reply_rx) = oneshot::channel();
        let (env, effects) = transition(
            &config,
            &env,
            &files,
            &idgen,
            Command::CreateFile {
                descriptor: CreateFileDescriptor {
                    path: wpath("sub"),
                    kind: CreateKind::Directory,
                },
                reply,
            },
        );
        perform(&env, effects);
        assert_eq!(
            reply_rx.try_recv().unwrap(),
            Message::CreateFileResult(CreateFileResult { result: Ok(()) })
        );
    }

    #[tokio::test]
    async fn test_commands_stash_until_initialize_then_replay() {
        let files = seeded_files();
        let handle = SessionCore::spawn(files, Arc::new(CapabilityIdGen::new()));

        let client = ClientId::generate();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        handle.connect(client, out_tx);

        let (reply_tx, reply_rx) = oneshot::channel();
        handle.send(Command::OpenFile {
            client,
            path: wpath("a.txt"),
            reply: reply_tx,
        });

        // Nothing is processed until initialization; the open is answered
        // right after, in arrival order.
        handle.initialize(session_config());
        let message = reply_rx.await.unwrap();
        match message {
            Message::OpenFileResponse(OpenFileResponse { result: Ok(opened) }) => {
                assert_eq!(opened.content, b"hello");
                assert!(opened.write_capability.is_some());
            }
            other => panic!("expected open response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_two_client_scenario_end_to_end() {
        let files = seeded_files();
        let handle = SessionCore::spawn(files, Arc::new(CapabilityIdGen::new()));
        handle.initialize(session_config());

        let c1 = ClientId::generate();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        handle.connect(c1, tx1);

        let c2 = ClientId::generate();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        handle.connect(c2, tx2);

        // C1 opens and wins the write capability.
        let message = handle.open_file(c1, wpath("a.txt")).await.unwrap();
        let reg1 = match message {
            Message::OpenFileResponse(OpenFileResponse { result: Ok(opened) }) => {
                assert_eq!(opened.content, b"hello");
                assert_eq!(opened.version, 0);
                opened.write_capability.expect("c1 wins the grant")
            }
            other => panic!("expected open response, got {other:?}"),
        };

        // C2 opens the same file: same buffer, no capability.
        let message = handle.open_file(c2, wpath("a.txt")).await.unwrap();
        match message {
            Message::OpenFileResponse(OpenFileResponse { result: Ok(opened) }) => {
                assert_eq!(opened.content, b"hello");
                assert_eq!(opened.version, 0);
                assert!(opened.write_capability.is_none());
            }
            other => panic!("expected open response, got {other:?}"),
        }

        // C2 claims the capability; C1 is force-released.
        handle.acquire_capability(c2, Capability::CanEdit(wpath("a.txt")));

        let notice = rx1.recv().await.unwrap();
        assert_eq!(
            notice,
            Message::CapabilityForceReleased(CapabilityForceReleased { id: reg1.id })
        );

        let granted = rx2.recv().await.unwrap();
        match granted {
            Message::CapabilityGranted(CapabilityGranted { registration }) => {
                assert_ne!(registration.id, reg1.id);
                assert_eq!(
                    registration.capability,
                    Capability::CanEdit(wpath("a.txt"))
                );
            }
            other => panic!("expected grant, got {other:?}"),
        }
    }
}

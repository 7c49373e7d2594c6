//! Immutable session state.
//!
//! The [`Environment`] aggregates everything the daemon knows about one
//! running session: connected clients, capability grants, and open
//! buffers. Every operation takes `&self` and returns a new value; the
//! command loop in [`super::core`] commits each returned environment
//! before processing the next command, which is the only synchronization
//! the state ever needs.

use std::collections::{HashMap, HashSet};

use protocol::messages::Message;
use protocol::{
    Capability, CapabilityIdGen, CapabilityRegistration, CapabilityRegistrationId, ClientId,
    WorkspacePath,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Attempt to connect a client id that is already connected.
#[derive(Debug, Error)]
#[error("client already connected: {0}")]
pub struct DuplicateClient(pub ClientId);

/// A connected editor client.
///
/// The outbound channel is how the daemon pushes asynchronous
/// notifications (forced releases, grants) to the client; the core never
/// waits on it.
#[derive(Debug, Clone)]
pub struct Client {
    id: ClientId,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Client {
    /// Create a client record from its id and outbound channel.
    pub fn new(id: ClientId, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self { id, outbound }
    }

    /// The client's id.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Push a message to the client, fire and forget.
    ///
    /// Delivery failure means the client is already gone; its disconnect
    /// command is on the way.
    pub fn send(&self, message: Message) {
        if self.outbound.send(message).is_err() {
            tracing::debug!(client_id = %self.id, "Dropped message for departed client");
        }
    }
}

/// In-memory content of a file as known to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    /// The content bytes.
    pub content: Vec<u8>,
    /// Monotonic version counter, starting at 0 when loaded.
    pub version: u64,
}

/// A buffer plus the set of clients that currently have it open.
#[derive(Debug, Clone)]
pub struct OpenBuffer {
    buffer: Buffer,
    open_by: HashSet<ClientId>,
}

impl OpenBuffer {
    /// Create an open buffer around freshly loaded content, with no
    /// openers yet.
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            buffer: Buffer {
                content,
                version: 0,
            },
            open_by: HashSet::new(),
        }
    }

    /// The buffer content and version.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// The clients that currently have this buffer open.
    pub fn open_by(&self) -> &HashSet<ClientId> {
        &self.open_by
    }

    /// A copy of this buffer with the client added to the opener set.
    /// Adding twice has the same effect as once.
    pub fn with_client(&self, client: ClientId) -> OpenBuffer {
        let mut next = self.clone();
        next.open_by.insert(client);
        next
    }

    /// A copy of this buffer with the client removed from the opener set.
    pub fn without_client(&self, client: ClientId) -> OpenBuffer {
        let mut next = self.clone();
        next.open_by.remove(&client);
        next
    }

    /// Whether no client has this buffer open anymore.
    pub fn is_orphaned(&self) -> bool {
        self.open_by.is_empty()
    }
}

/// The complete session state at a point in command-processing time.
///
/// Between transitions the following invariants hold: at most one live
/// `CanEdit` registration exists per path; every registration is
/// attributed to a client that was connected at grant time; a buffer is
/// present only while at least one client has it open.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    clients: HashMap<ClientId, Client>,
    capabilities: HashMap<CapabilityRegistrationId, (ClientId, CapabilityRegistration)>,
    buffers: HashMap<WorkspacePath, OpenBuffer>,
}

impl Environment {
    /// An environment with no clients, grants, or buffers.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Client directory
    // ------------------------------------------------------------------

    /// Insert a newly connected client.
    pub fn add_client(&self, client: Client) -> Result<Environment, DuplicateClient> {
        if self.clients.contains_key(&client.id()) {
            return Err(DuplicateClient(client.id()));
        }
        let mut next = self.clone();
        next.clients.insert(client.id(), client);
        Ok(next)
    }

    /// Remove a client. Idempotent if the client is absent.
    pub fn remove_client(&self, client: ClientId) -> Environment {
        let mut next = self.clone();
        next.clients.remove(&client);
        next
    }

    /// Look up a connected client.
    pub fn client(&self, client: ClientId) -> Option<&Client> {
        self.clients.get(&client)
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // ------------------------------------------------------------------
    // Capability registry
    // ------------------------------------------------------------------

    /// Insert a registration attributed to the given client.
    ///
    /// Id uniqueness is guaranteed by the caller's use of
    /// [`CapabilityIdGen`].
    pub fn grant_capability(
        &self,
        client: ClientId,
        registration: CapabilityRegistration,
    ) -> Environment {
        let mut next = self.clone();
        next.capabilities
            .insert(registration.id, (client, registration));
        next
    }

    /// Remove a registration if it exists and is attributed to the client.
    ///
    /// Returns the new environment and whether anything was removed;
    /// releasing an unknown or non-owned registration leaves the
    /// environment unchanged.
    pub fn release_capability(
        &self,
        client: ClientId,
        id: CapabilityRegistrationId,
    ) -> (Environment, bool) {
        match self.capabilities.get(&id) {
            Some((holder, _)) if *holder == client => {
                let mut next = self.clone();
                next.capabilities.remove(&id);
                (next, true)
            }
            _ => (self.clone(), false),
        }
    }

    /// Remove every registration whose capability matches the predicate,
    /// regardless of holder.
    ///
    /// Returns the pruned environment and the removed registrations
    /// grouped by the client that held each.
    pub fn remove_capabilities_by(
        &self,
        predicate: impl Fn(&Capability) -> bool,
    ) -> (Environment, HashMap<ClientId, Vec<CapabilityRegistration>>) {
        let mut next = self.clone();
        let mut removed: HashMap<ClientId, Vec<CapabilityRegistration>> = HashMap::new();
        next.capabilities.retain(|_, (holder, registration)| {
            if predicate(&registration.capability) {
                removed
                    .entry(*holder)
                    .or_default()
                    .push(registration.clone());
                false
            } else {
                true
            }
        });
        (next, removed)
    }

    /// Remove every registration held by the given client.
    pub fn remove_capabilities_of(
        &self,
        client: ClientId,
    ) -> (Environment, Vec<CapabilityRegistration>) {
        let mut next = self.clone();
        let mut removed = Vec::new();
        next.capabilities.retain(|_, (holder, registration)| {
            if *holder == client {
                removed.push(registration.clone());
                false
            } else {
                true
            }
        });
        (next, removed)
    }

    /// Grant `CanEdit` over the path to the client if no client holds it.
    ///
    /// Returns the minted registration when the path was vacant, `None`
    /// and the environment unchanged otherwise. This is how opening a
    /// file opportunistically acquires write access when uncontested.
    pub fn grant_can_edit_if_vacant(
        &self,
        client: ClientId,
        path: &WorkspacePath,
        idgen: &CapabilityIdGen,
    ) -> (Option<CapabilityRegistration>, Environment) {
        if self.can_edit_holder(path).is_some() {
            return (None, self.clone());
        }
        let registration = CapabilityRegistration::new(
            idgen.next_id(),
            Capability::CanEdit(path.clone()),
        );
        let next = self.grant_capability(client, registration.clone());
        (Some(registration), next)
    }

    /// The client holding `CanEdit` over the path, if any.
    pub fn can_edit_holder(&self, path: &WorkspacePath) -> Option<ClientId> {
        self.capabilities.values().find_map(|(holder, registration)| {
            match &registration.capability {
                Capability::CanEdit(held) if held == path => Some(*holder),
                Capability::CanEdit(_) => None,
            }
        })
    }

    /// The client's `CanEdit` registration id for the path, if held.
    pub fn can_edit_registration(
        &self,
        client: ClientId,
        path: &WorkspacePath,
    ) -> Option<CapabilityRegistrationId> {
        self.capabilities
            .iter()
            .find_map(|(id, (holder, registration))| match &registration.capability {
                Capability::CanEdit(held) if *holder == client && held == path => Some(*id),
                Capability::CanEdit(_) => None,
            })
    }

    /// Number of live registrations.
    pub fn capability_count(&self) -> usize {
        self.capabilities.len()
    }

    // ------------------------------------------------------------------
    // Buffer store
    // ------------------------------------------------------------------

    /// Look up the open buffer for a path.
    pub fn file(&self, path: &WorkspacePath) -> Option<&OpenBuffer> {
        self.buffers.get(path)
    }

    /// Insert or replace the open buffer for a path.
    pub fn set_file(&self, path: WorkspacePath, buffer: OpenBuffer) -> Environment {
        let mut next = self.clone();
        next.buffers.insert(path, buffer);
        next
    }

    /// Remove the open buffer for a path. Idempotent if absent.
    pub fn remove_file(&self, path: &WorkspacePath) -> Environment {
        let mut next = self.clone();
        next.buffers.remove(path);
        next
    }

    /// Remove the client from every opener set, evicting buffers that end
    /// up with no openers.
    pub fn release_buffers_of(&self, client: ClientId) -> Environment {
        let mut next = self.clone();
        next.buffers.retain(|_, open| {
            open.open_by.remove(&client);
            !open.open_by.is_empty()
        });
        next
    }

    /// Number of open buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

//! Remote invocation.
//!
//! Replicated state changes are expressed as named operations registered
//! once at startup with a [`Locality`] and a positional signature. Peers
//! must build identical registries; the [`RemoteRegistry::fingerprint`] is
//! exchanged during the handshake so drift is caught before any call flows.
//!
//! Routing rules:
//!
//! | locality | invoked on      | effect                                          |
//! |----------|-----------------|-------------------------------------------------|
//! | `Both`   | any             | execute locally, replicate to peers             |
//! | `Server` | server/offline  | execute, replicate result to clients            |
//! | `Server` | client          | forward to server, do not execute               |
//! | `Client` | server          | forward to clients, do not execute              |
//! | `Client` | client/offline  | execute locally                                 |
//!
//! Operations registered with [`Origin::Host`] (campaign progression) are
//! started only by the authoritative instance: a client may neither invoke
//! nor forward them, and a server treats one arriving from a client as a
//! locality violation.
//!
//! Inbound messages are queued by the network layer and drained at the
//! start of each tick, before any group update.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::NetMode;
use crate::content::{BlockId, ItemId, LiquidId};
use crate::error::{GameError, ProtocolError, Result};
use crate::team::Team;

/// Which side executes an operation's real logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locality {
    /// Every peer executes.
    Both,
    /// Only the server decides; clients apply the replicated result.
    Server,
    /// Only clients execute; the server forwards.
    Client,
}

/// Who may start an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Any peer. Clients forward server operations they start.
    Any,
    /// Only the authoritative instance. A client never starts or forwards
    /// it; it only applies the replicated result.
    Host,
}

/// Declared argument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgKind {
    /// `i32`.
    Int,
    /// `bool`.
    Bool,
    /// [`Team`].
    Team,
    /// [`ItemId`].
    Item,
    /// [`LiquidId`].
    Liquid,
    /// [`BlockId`].
    Block,
}

/// A positional argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arg {
    /// Integer.
    Int(i32),
    /// Flag.
    Bool(bool),
    /// Team.
    Team(Team),
    /// Item.
    Item(ItemId),
    /// Liquid.
    Liquid(LiquidId),
    /// Block.
    Block(BlockId),
}

impl Arg {
    /// Declared type of this value.
    #[must_use]
    pub const fn kind(&self) -> ArgKind {
        match self {
            Self::Int(_) => ArgKind::Int,
            Self::Bool(_) => ArgKind::Bool,
            Self::Team(_) => ArgKind::Team,
            Self::Item(_) => ArgKind::Item,
            Self::Liquid(_) => ArgKind::Liquid,
            Self::Block(_) => ArgKind::Block,
        }
    }

    /// Integer value, if this is an `Int`.
    #[must_use]
    pub const fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Team value, if this is a `Team`.
    #[must_use]
    pub const fn as_team(&self) -> Option<Team> {
        match self {
            Self::Team(team) => Some(*team),
            _ => None,
        }
    }
}

/// How a message was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// The sender already executed the call; receivers apply it.
    Replicated,
    /// The sender may not execute this locality and asks the receiver to.
    Forwarded,
}

/// One operation call on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    /// Registry id.
    pub op: u16,
    /// Replicated or forwarded.
    pub delivery: Delivery,
    /// Positional arguments.
    pub args: Vec<Arg>,
}

impl RemoteMessage {
    /// Encode with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ProtocolError::Decode(e.to_string()).into())
    }

    /// Decode from bincode.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] on malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| ProtocolError::Decode(e.to_string()).into())
    }
}

/// Peer identifier assigned by the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// The server, as seen from a client.
    pub const SERVER: Self = Self(0);
}

/// Where an outbound message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The server (client side).
    Server,
    /// Every client (server side).
    AllClients,
    /// Every client but one (server relaying a client's call).
    AllExcept(ConnectionId),
}

/// A message waiting for the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Destination.
    pub target: Target,
    /// Payload.
    pub message: RemoteMessage,
}

/// Handler invoked with the simulation context and validated arguments.
pub type Handler<C> = fn(&mut C, &[Arg]) -> Result<()>;

/// A registered operation.
pub struct RemoteSpec<C> {
    /// Stable id (registration order).
    pub id: u16,
    /// Stable name.
    pub name: &'static str,
    /// Locality.
    pub locality: Locality,
    /// Who may start it.
    pub origin: Origin,
    /// Positional signature.
    pub params: &'static [ArgKind],
    /// Logic.
    pub handler: Handler<C>,
}

impl<C> Clone for RemoteSpec<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name,
            locality: self.locality,
            origin: self.origin,
            params: self.params,
            handler: self.handler,
        }
    }
}

impl<C> std::fmt::Debug for RemoteSpec<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("locality", &self.locality)
            .field("origin", &self.origin)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<C> RemoteSpec<C> {
    fn check_args(&self, args: &[Arg]) -> std::result::Result<(), ProtocolError> {
        if args.len() != self.params.len() {
            return Err(ProtocolError::SignatureMismatch {
                operation: self.name,
                message: format!("expected {} arguments, got {}", self.params.len(), args.len()),
            });
        }
        for (position, (arg, kind)) in args.iter().zip(self.params).enumerate() {
            if arg.kind() != *kind {
                return Err(ProtocolError::SignatureMismatch {
                    operation: self.name,
                    message: format!("argument {position} is {:?}, expected {kind:?}", arg.kind()),
                });
            }
        }
        Ok(())
    }
}

/// Name, signature and locality of every operation.
pub struct RemoteRegistry<C> {
    specs: Vec<RemoteSpec<C>>,
    by_name: HashMap<&'static str, u16>,
}

impl<C> Default for RemoteRegistry<C> {
    fn default() -> Self {
        Self {
            specs: Vec::new(),
            by_name: HashMap::new(),
        }
    }
}

impl<C> std::fmt::Debug for RemoteRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.specs.iter().map(|s| s.name)).finish()
    }
}

impl<C> RemoteRegistry<C> {
    /// Register an operation any peer may start. Ids follow registration
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] on a duplicate name or when the
    /// id space is exhausted.
    pub fn register(
        &mut self,
        name: &'static str,
        locality: Locality,
        params: &'static [ArgKind],
        handler: Handler<C>,
    ) -> Result<u16> {
        self.register_with_origin(name, locality, Origin::Any, params, handler)
    }

    /// Register a server operation only the authoritative instance starts,
    /// such as campaign progression.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteRegistry::register`].
    pub fn register_host(
        &mut self,
        name: &'static str,
        params: &'static [ArgKind],
        handler: Handler<C>,
    ) -> Result<u16> {
        self.register_with_origin(name, Locality::Server, Origin::Host, params, handler)
    }

    fn register_with_origin(
        &mut self,
        name: &'static str,
        locality: Locality,
        origin: Origin,
        params: &'static [ArgKind],
        handler: Handler<C>,
    ) -> Result<u16> {
        if self.by_name.contains_key(name) {
            return Err(GameError::InvalidState(format!(
                "remote operation '{name}' registered twice"
            )));
        }
        let id = u16::try_from(self.specs.len())
            .map_err(|_| GameError::InvalidState("too many remote operations".into()))?;
        self.specs.push(RemoteSpec {
            id,
            name,
            locality,
            origin,
            params,
            handler,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Look up by id.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownOperation`] for an unregistered id.
    pub fn get(&self, id: u16) -> std::result::Result<&RemoteSpec<C>, ProtocolError> {
        self.specs
            .get(usize::from(id))
            .ok_or(ProtocolError::UnknownOperation(id))
    }

    /// Look up an id by name.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownOperationName`] for an unregistered name.
    pub fn id_of(&self, name: &str) -> std::result::Result<u16, ProtocolError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownOperationName(name.to_string()))
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Stable hash over every operation's id, name, locality and signature.
    ///
    /// FNV-1a, so it is identical across builds and platforms.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0100_0000_01b3;

        let mut hash = OFFSET;
        let mut feed = |bytes: &[u8]| {
            for &byte in bytes {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(PRIME);
            }
        };
        for spec in &self.specs {
            feed(&spec.id.to_le_bytes());
            feed(spec.name.as_bytes());
            feed(&[spec.locality as u8, spec.origin as u8]);
            for kind in spec.params {
                feed(&[*kind as u8]);
            }
            feed(&[0xff]);
        }
        hash
    }
}

/// Decision for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Run the handler on this instance.
    pub execute: bool,
    /// Message to queue after (successful) execution, or instead of it.
    pub send: Option<Outbound>,
}

/// Registry plus the inbound and outbound queues of one instance.
pub struct RemoteRouter<C> {
    registry: RemoteRegistry<C>,
    net_mode: NetMode,
    inbound: VecDeque<(ConnectionId, RemoteMessage)>,
    outbound: Vec<Outbound>,
    desynced: BTreeSet<ConnectionId>,
}

impl<C> std::fmt::Debug for RemoteRouter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRouter")
            .field("registry", &self.registry)
            .field("net_mode", &self.net_mode)
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .field("desynced", &self.desynced)
            .finish()
    }
}

impl<C> RemoteRouter<C> {
    /// Router over a finished registry.
    #[must_use]
    pub fn new(registry: RemoteRegistry<C>, net_mode: NetMode) -> Self {
        Self {
            registry,
            net_mode,
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            desynced: BTreeSet::new(),
        }
    }

    /// The registry.
    #[must_use]
    pub fn registry(&self) -> &RemoteRegistry<C> {
        &self.registry
    }

    /// Network role.
    #[must_use]
    pub const fn net_mode(&self) -> NetMode {
        self.net_mode
    }

    /// Change network role (e.g. hosting an existing local game).
    pub fn set_net_mode(&mut self, net_mode: NetMode) {
        self.net_mode = net_mode;
    }

    /// Handler for an operation.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownOperation`] for an unregistered id.
    pub fn handler(&self, op: u16) -> std::result::Result<Handler<C>, ProtocolError> {
        Ok(self.registry.get(op)?.handler)
    }

    /// Route a locally originated call.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the operation is unknown or the
    /// arguments do not match its signature.
    pub fn route_invoke(&self, op: u16, args: &[Arg]) -> std::result::Result<Route, ProtocolError> {
        let spec = self.registry.get(op)?;
        spec.check_args(args)?;
        if self.net_mode == NetMode::Client && spec.origin == Origin::Host {
            return Err(ProtocolError::LocalityViolation {
                operation: spec.name,
                message: "only the host starts this operation".to_string(),
            });
        }

        let message = |delivery| RemoteMessage {
            op,
            delivery,
            args: args.to_vec(),
        };
        let send = |target, delivery| {
            Some(Outbound {
                target,
                message: message(delivery),
            })
        };

        Ok(match (self.net_mode, spec.locality) {
            (NetMode::Offline, _) | (NetMode::Client, Locality::Client) => Route {
                execute: true,
                send: None,
            },
            (NetMode::Server, Locality::Both | Locality::Server) => Route {
                execute: true,
                send: send(Target::AllClients, Delivery::Replicated),
            },
            (NetMode::Server, Locality::Client) => Route {
                execute: false,
                send: send(Target::AllClients, Delivery::Forwarded),
            },
            (NetMode::Client, Locality::Both) => Route {
                execute: true,
                send: send(Target::Server, Delivery::Replicated),
            },
            (NetMode::Client, Locality::Server) => Route {
                execute: false,
                send: send(Target::Server, Delivery::Forwarded),
            },
        })
    }

    /// Route a call received from a peer.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for unknown operations, signature
    /// mismatches, and calls whose delivery violates their locality.
    pub fn route_receive(
        &self,
        from: ConnectionId,
        message: &RemoteMessage,
    ) -> std::result::Result<Route, ProtocolError> {
        let spec = self.registry.get(message.op)?;
        spec.check_args(&message.args)?;

        let violation = |why: &str| ProtocolError::LocalityViolation {
            operation: spec.name,
            message: why.to_string(),
        };

        match (self.net_mode, spec.locality, message.delivery) {
            (NetMode::Offline, _, _) => Err(ProtocolError::NotConnected),

            // Server receiving from a client.
            (NetMode::Server, _, _) if spec.origin == Origin::Host => {
                Err(violation("only the host starts this operation"))
            }
            (NetMode::Server, Locality::Both, Delivery::Replicated) => Ok(Route {
                execute: true,
                send: Some(Outbound {
                    target: Target::AllExcept(from),
                    message: message.clone(),
                }),
            }),
            (NetMode::Server, Locality::Server, Delivery::Forwarded) => Ok(Route {
                execute: true,
                send: Some(Outbound {
                    target: Target::AllClients,
                    message: RemoteMessage {
                        delivery: Delivery::Replicated,
                        ..message.clone()
                    },
                }),
            }),
            (NetMode::Server, Locality::Server, Delivery::Replicated) => {
                Err(violation("client executed a server operation instead of forwarding it"))
            }
            (NetMode::Server, Locality::Client, _) => {
                Err(violation("client operation sent to the server"))
            }
            (NetMode::Server, Locality::Both, Delivery::Forwarded) => {
                Err(violation("operation of locality both must not be forwarded"))
            }

            // Client receiving from the server.
            (NetMode::Client, _, _) if from != ConnectionId::SERVER => {
                Err(violation("clients only accept calls from the server"))
            }
            (NetMode::Client, Locality::Both | Locality::Server, Delivery::Replicated)
            | (NetMode::Client, Locality::Client, Delivery::Forwarded) => Ok(Route {
                execute: true,
                send: None,
            }),
            (NetMode::Client, _, delivery) => Err(violation(&format!(
                "{:?} operation arrived as {delivery:?}",
                spec.locality
            ))),
        }
    }

    /// Queue a message received by the network layer.
    pub fn enqueue(&mut self, from: ConnectionId, message: RemoteMessage) {
        self.inbound.push_back((from, message));
    }

    /// Pop the next inbound message, skipping desynchronized connections.
    pub fn next_inbound(&mut self) -> Option<(ConnectionId, RemoteMessage)> {
        while let Some((from, message)) = self.inbound.pop_front() {
            if !self.desynced.contains(&from) {
                return Some((from, message));
            }
        }
        None
    }

    /// Number of queued inbound messages.
    #[must_use]
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Queue an outbound message.
    pub fn push_outbound(&mut self, outbound: Outbound) {
        self.outbound.push(outbound);
    }

    /// Take every queued outbound message.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    /// Stop applying calls from a connection.
    pub fn mark_desynced(&mut self, connection: ConnectionId) {
        self.desynced.insert(connection);
    }

    /// Whether a connection has been flagged.
    #[must_use]
    pub fn is_desynced(&self, connection: ConnectionId) -> bool {
        self.desynced.contains(&connection)
    }

    /// Forget a connection (disconnect).
    pub fn forget(&mut self, connection: ConnectionId) {
        self.desynced.remove(&connection);
        self.inbound.retain(|(from, _)| *from != connection);
    }
}

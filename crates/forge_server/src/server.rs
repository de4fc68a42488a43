//! Authoritative tick loop and message routing.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use forge_core::config::NetMode;
use forge_core::content::ContentCatalog;
use forge_core::events::{GameEvent, TickEvents};
use forge_core::math::Fixed;
use forge_core::remote::{ConnectionId, Outbound, Target};
use forge_core::simulation::Simulation;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::frame::Frame;
use crate::handshake::Handshake;
use crate::session::{run_session, SessionEvent};

/// Capacity of the session → tick loop queue.
const EVENT_QUEUE: usize = 1024;

/// The simulation plus its connected peers.
pub struct Server {
    config: ServerConfig,
    sim: Simulation,
    peers: BTreeMap<ConnectionId, mpsc::UnboundedSender<Frame>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("tick", &self.sim.tick())
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Wrap a simulation. The simulation is switched to server mode.
    pub fn new(config: ServerConfig, mut sim: Simulation) -> Self {
        sim.set_net_mode(NetMode::Server);
        Self {
            config,
            sim,
            peers: BTreeMap::new(),
        }
    }

    /// Build the simulation from the configured catalog and map, and start
    /// the match.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog or map cannot be loaded.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let content = Arc::new(ContentCatalog::load(&config.content)?);
        let world = config.map.build(&content)?;
        let mut sim = Simulation::new(config.sim.clone(), content)?;
        sim.load_world(world);
        sim.play()?;
        Ok(Self::new(config, sim))
    }

    /// The hosted simulation.
    #[must_use]
    pub fn sim(&self) -> &Simulation {
        &self.sim
    }

    /// Mutable access for hosting tools and tests.
    pub fn sim_mut(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    /// Handshake expectation for joining clients.
    #[must_use]
    pub fn handshake(&self) -> Handshake {
        Handshake::new(self.sim.registry().fingerprint())
    }

    /// Connected peers.
    pub fn peers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.peers.keys().copied()
    }

    /// Apply a session notification.
    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Joined {
                connection,
                outbound,
            } => self.join(connection, outbound),
            SessionEvent::Message {
                connection,
                message,
            } => {
                if self.peers.contains_key(&connection) {
                    self.sim.receive(connection, message);
                } else {
                    debug!(connection = connection.0, "Dropping call from departed peer");
                }
            }
            SessionEvent::Left { connection } => {
                if self.peers.remove(&connection).is_some() {
                    self.sim.disconnect(connection);
                    info!(connection = connection.0, players = self.peers.len(), "Player left");
                }
            }
        }
    }

    fn join(&mut self, connection: ConnectionId, outbound: mpsc::UnboundedSender<Frame>) {
        if self.peers.len() >= usize::from(self.config.max_players) {
            warn!(connection = connection.0, max = self.config.max_players, "Server full");
            let _ = outbound.send(Frame::Reject {
                reason: format!("server full ({} players)", self.config.max_players),
            });
            return;
        }
        let snapshot = match self.sim.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(connection = connection.0, error = %e, "Snapshot failed");
                let _ = outbound.send(Frame::Reject {
                    reason: "snapshot unavailable".into(),
                });
                return;
            }
        };
        if outbound
            .send(Frame::Welcome {
                connection,
                snapshot,
            })
            .is_ok()
        {
            self.peers.insert(connection, outbound);
            info!(connection = connection.0, players = self.peers.len(), "Player joined");
        }
    }

    /// Advance one tick and deliver what it produced.
    ///
    /// Peers that caused a protocol fault are dropped.
    ///
    /// # Errors
    ///
    /// Returns the simulation's fatal errors.
    pub fn step(&mut self) -> Result<TickEvents> {
        let events = self.sim.update(Fixed::ONE)?;
        let outbound = self.sim.drain_outbound();
        self.route(outbound);

        for event in &events.events {
            if let GameEvent::ProtocolFault { connection, error } = event {
                self.drop_peer(*connection, &error.to_string());
            }
        }
        Ok(events)
    }

    fn route(&mut self, outbound: Vec<Outbound>) {
        for Outbound { target, message } in outbound {
            let frame = Frame::Call(message);
            let mut closed = Vec::new();
            for (&connection, sender) in &self.peers {
                let wanted = match target {
                    Target::AllClients => true,
                    Target::AllExcept(except) => except != connection,
                    Target::Server => false,
                };
                if wanted && sender.send(frame.clone()).is_err() {
                    closed.push(connection);
                }
            }
            for connection in closed {
                self.handle(SessionEvent::Left { connection });
            }
        }
    }

    fn drop_peer(&mut self, connection: ConnectionId, reason: &str) {
        if let Some(sender) = self.peers.remove(&connection) {
            warn!(connection = connection.0, reason, "Dropping desynchronized peer");
            let _ = sender.send(Frame::Reject {
                reason: format!("desynchronized: {reason}"),
            });
            self.sim.disconnect(connection);
        }
    }

    /// Accept connections and tick until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns the simulation's fatal errors.
    pub async fn run(mut self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE);
        let handshake = self.handshake();

        let acceptor = tokio::spawn(async move {
            let mut next = 1u32;
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let connection = ConnectionId(next);
                        next = next.wrapping_add(1).max(1);
                        debug!(connection = connection.0, %addr, "Accepted connection");
                        tokio::spawn(run_session(
                            stream,
                            connection,
                            handshake.clone(),
                            events_tx.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
            }
        });

        let period = Duration::from_micros(1_000_000 / u64::from(self.config.tick_rate.max(1)));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                () = &mut shutdown => break Ok(()),
                _ = interval.tick() => {
                    while let Ok(event) = events_rx.try_recv() {
                        self.handle(event);
                    }
                    if let Err(e) = self.step() {
                        error!(error = %e, tick = self.sim.tick(), "Simulation failed");
                        break Err(e);
                    }
                }
            }
        };

        acceptor.abort();
        info!(tick = self.sim.tick(), "Server stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::config::SimConfig;
    use forge_core::remote::{Arg, Delivery, RemoteMessage};
    use forge_core::team::Team;
    use forge_core::world::TilePos;
    use forge_test_utils::fixtures::{battle_sim, block, content, PLAYER_CORE};

    fn server(max_players: u8) -> Server {
        let mut sim = battle_sim(SimConfig::server());
        sim.play().unwrap();
        let config = ServerConfig {
            max_players,
            ..ServerConfig::default()
        };
        Server::new(config, sim)
    }

    fn join(server: &mut Server, id: u32) -> (ConnectionId, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let connection = ConnectionId(id);
        server.handle(SessionEvent::Joined {
            connection,
            outbound,
        });
        (connection, rx)
    }

    fn place_wall(server: &Server, x: u16, y: u16) -> RemoteMessage {
        let content = content();
        RemoteMessage {
            op: server.sim().calls().place_block,
            delivery: Delivery::Forwarded,
            args: vec![
                Arg::Int(i32::from(x)),
                Arg::Int(i32::from(y)),
                Arg::Block(block(&content, "copper-wall")),
                Arg::Team(Team::DEFAULT),
            ],
        }
    }

    #[test]
    fn test_join_sends_welcome_snapshot() {
        let mut server = server(4);
        let (connection, mut rx) = join(&mut server, 1);
        match rx.try_recv().unwrap() {
            Frame::Welcome {
                connection: id,
                snapshot,
            } => {
                assert_eq!(id, connection);
                assert_eq!(snapshot, server.sim().snapshot().unwrap());
            }
            other => panic!("expected welcome, got {other:?}"),
        }
        assert_eq!(server.peers().count(), 1);
    }

    #[test]
    fn test_full_server_rejects() {
        let mut server = server(1);
        let _first = join(&mut server, 1);
        let (_, mut rx) = join(&mut server, 2);
        assert!(matches!(rx.try_recv().unwrap(), Frame::Reject { .. }));
        assert_eq!(server.peers().collect::<Vec<_>>(), vec![ConnectionId(1)]);
    }

    #[test]
    fn test_forwarded_call_replicates_to_every_client() {
        let mut server = server(4);
        let (a, mut rx_a) = join(&mut server, 1);
        let (_b, mut rx_b) = join(&mut server, 2);
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();

        server.handle(SessionEvent::Message {
            connection: a,
            message: place_wall(&server, 12, 3),
        });
        server.step().unwrap();

        assert_eq!(
            server.sim().world().tile(TilePos::new(12, 3)).unwrap().block,
            block(&content(), "copper-wall")
        );
        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                Frame::Call(message) => assert_eq!(message.delivery, Delivery::Replicated),
                other => panic!("expected call, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_locality_violation_drops_peer() {
        let mut server = server(4);
        let (a, mut rx) = join(&mut server, 1);
        rx.try_recv().unwrap();

        let mut message = place_wall(&server, 12, 4);
        message.delivery = Delivery::Replicated;
        server.handle(SessionEvent::Message {
            connection: a,
            message,
        });
        server.step().unwrap();

        assert!(matches!(rx.try_recv().unwrap(), Frame::Reject { .. }));
        assert_eq!(server.peers().count(), 0);
        assert!(!server.sim().is_desynced(a));
    }

    #[test]
    fn test_game_over_reaches_clients() {
        let mut server = server(4);
        let (_, mut rx) = join(&mut server, 1);
        rx.try_recv().unwrap();

        server.sim_mut().remove_block(PLAYER_CORE).unwrap();
        server.step().unwrap();
        let game_over = server.sim().calls().game_over;
        let calls: Vec<u16> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|frame| match frame {
                Frame::Call(message) => Some(message.op),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec![game_over]);
    }

    #[test]
    fn test_departed_peer_is_forgotten() {
        let mut server = server(4);
        let (a, _rx) = join(&mut server, 1);
        server.handle(SessionEvent::Left { connection: a });
        assert_eq!(server.peers().count(), 0);

        server.handle(SessionEvent::Message {
            connection: a,
            message: place_wall(&server, 12, 5),
        });
        server.step().unwrap();
        assert_eq!(
            server.sim().world().tile(TilePos::new(12, 5)).unwrap().block,
            forge_core::content::BlockId::AIR
        );
    }
}

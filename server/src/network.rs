//! Controller server: ties the transport, registry and dispatcher together

use crate::config::{DispatchMode, ServerConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{RegistryError, ServerError};
use crate::handler::{CommandHandler, PlayerEvent};
use crate::registry::SlotRegistry;
use crate::transport::{self, ConnectionEvents, ConnectionHandle, Disconnect, ReadSettings};
use log::{debug, error, info, trace, warn};
use protocol::{Command, Reply};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

type SharedHandler = Arc<Mutex<Box<dyn CommandHandler>>>;

/// State reachable from every connection task
struct Shared {
    registry: Arc<SlotRegistry>,
    dispatcher: Arc<Dispatcher>,
    handler: SharedHandler,
    dispatch: DispatchMode,
}

/// Listening controller server
///
/// Constructed once by the application and passed by reference to whatever
/// needs it. Connection handling runs on tokio worker tasks; handler callbacks
/// are queued on [`Server::dispatcher`] unless the config selects
/// [`DispatchMode::Immediate`].
pub struct Server {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Binds the listener and starts accepting connections
    ///
    /// A bind failure is the only fatal error and is returned here.
    pub async fn bind<H>(config: ServerConfig, handler: H) -> Result<Self, ServerError>
    where
        H: CommandHandler,
    {
        config.validate()?;

        let address = config.bind_address();
        let listener = transport::listen(&address, config.backlog).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| crate::error::TransportError::Bind {
                addr: address.clone(),
                source,
            })?;
        let shared = Arc::new(Shared {
            registry: Arc::new(SlotRegistry::new(config.max_connections)),
            dispatcher: Arc::new(Dispatcher::new()),
            handler: Arc::new(Mutex::new(Box::new(handler))),
            dispatch: config.dispatch,
        });
        info!(
            "Server listening on {} with {} player slots",
            local_addr,
            shared.registry.capacity()
        );

        let settings = ReadSettings {
            idle_timeout: config.idle_timeout(),
            max_message_len: config.max_message_len,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(transport::accept_loop(
            listener,
            Arc::clone(&shared),
            settings,
            shutdown_rx,
        ));

        Ok(Server {
            shared,
            local_addr,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue the application drains once per tick
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    /// Runs every queued handler callback; shorthand for draining the dispatcher
    pub fn run_pending(&self) -> usize {
        self.shared.dispatcher.drain_and_run()
    }

    /// Replaces the collaborator without touching the listener
    ///
    /// Already queued callbacks run against the new handler. Must not be
    /// called from inside a handler callback, which holds the handler lock.
    pub fn set_handler<H>(&self, handler: H)
    where
        H: CommandHandler,
    {
        *self
            .shared
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Box::new(handler);
        info!("Command handler replaced");
    }

    pub fn player_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Ids and names of registered players
    pub fn players(&self) -> Vec<(usize, String)> {
        self.shared.registry.players()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.registry.is_closing()
    }

    /// Notifies every registered player, then closes the listener
    ///
    /// Safe to call more than once; only the first call does anything and
    /// returns true.
    pub fn shutdown(&self) -> bool {
        let Some(players) = self.shared.registry.begin_shutdown() else {
            debug!("Shutdown already in progress");
            return false;
        };

        info!("Shutting down, notifying {} players", players.len());
        // The registry is closed, so none of these slots can be claimed again
        for (player_id, slot) in players {
            if let Err(e) = slot.connection.send(Reply::ServerShutdown) {
                debug!("Player {} not notified: {}", player_id, e);
            }
            self.shared
                .raise(player_id, slot.session, PlayerEvent::Deregister);
            slot.connection.shutdown();
        }

        // Stops the accept loop and every reader still running
        let _ = self.shutdown_tx.send(true);
        true
    }

    /// Waits until the listener and every connection task have finished
    pub async fn wait(&self) {
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Accept task panicked: {}", e);
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Shared {
    fn reply(&self, connection: &ConnectionHandle, reply: Reply) {
        if let Err(e) = connection.send(reply) {
            debug!("Dropped reply {}: {}", reply, e);
        }
    }

    /// Hands a handler call to the dispatcher, or runs it now
    ///
    /// Called while the registry lock is held, so events reach the queue in
    /// the order the slots changed. Queued input events are still checked
    /// against `session` when they run and are skipped if the slot has since
    /// been vacated or handed to someone else.
    fn raise(&self, player_id: usize, session: u64, event: PlayerEvent) {
        match self.dispatch {
            DispatchMode::Immediate => {
                let mut handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
                event.deliver(player_id, handler.as_mut());
            }
            DispatchMode::Queued => {
                let handler = Arc::clone(&self.handler);
                let registry = Arc::clone(&self.registry);
                self.dispatcher.enqueue(move || {
                    if event.is_input() && !registry.is_session(player_id, session) {
                        debug!("Skipping {:?} for departed player {}", event, player_id);
                        return;
                    }
                    let mut handler = handler.lock().unwrap_or_else(PoisonError::into_inner);
                    event.deliver(player_id, handler.as_mut());
                });
            }
        }
    }

    fn register(&self, connection: &ConnectionHandle, name: String) {
        let claimed = self.registry.register(connection, &name, |player_id, session| {
            self.raise(
                player_id,
                session,
                PlayerEvent::Register { name: name.clone() },
            )
        });

        match claimed {
            Ok((player_id, _)) => {
                info!(
                    "[{}] Player {} registered as '{}' from {}",
                    connection.id(),
                    player_id,
                    name,
                    connection.peer()
                );
                self.reply(connection, Reply::PlayerId(player_id));
            }
            Err(RegistryError::ShuttingDown) => {
                warn!("[{}] Registration refused during shutdown", connection.id());
                self.reply(connection, Reply::ServerShutdown);
                connection.shutdown();
            }
            Err(RegistryError::ConnectionClosed(id)) => {
                debug!("[{}] Ignoring registration of '{}' on a closed connection", id, name);
            }
            Err(e) => {
                warn!("[{}] Registration of '{}' refused: {}", connection.id(), name, e);
                self.reply(connection, Reply::ServerFull);
            }
        }
    }

    fn deregister(&self, connection: &ConnectionHandle, player_id: usize) {
        let released = self.registry.deregister(player_id, |player_id, slot| {
            self.raise(player_id, slot.session, PlayerEvent::Deregister)
        });

        match released {
            Ok(slot) => {
                info!("Player {} ('{}') deregistered", player_id, slot.name);
                slot.connection.shutdown();
            }
            Err(e) => {
                warn!("[{}] {}", connection.id(), e);
                self.reply(connection, Reply::PlayerNotFound);
            }
        }
    }

    fn player_input(&self, connection: &ConnectionHandle, player_id: usize, event: PlayerEvent) {
        // The slot may have emptied since the command was validated
        let delivered = self
            .registry
            .with_occupant(player_id, |session| self.raise(player_id, session, event));
        if !delivered {
            self.reply(connection, Reply::PlayerNotFound);
        }
    }
}

impl ConnectionEvents for Shared {
    fn on_message(&self, connection: &ConnectionHandle, message: String) {
        if message.is_empty() {
            trace!("[{}] Keep-alive", connection.id());
            return;
        }
        debug!("[{}] <- {}", connection.id(), message);

        let registry = &self.registry;
        let occupied = |player_id: usize| registry.is_occupied(player_id);

        match protocol::parse(&message, &occupied) {
            Ok(Command::Register { name }) => self.register(connection, name),
            Ok(Command::Deregister { player_id }) => self.deregister(connection, player_id),
            Ok(Command::KeyDown {
                player_id,
                key,
                extra,
            }) => self.player_input(connection, player_id, PlayerEvent::KeyDown { key, extra }),
            Ok(Command::Joystick { player_id, x, y }) => {
                self.player_input(connection, player_id, PlayerEvent::Joystick { x, y })
            }
            Ok(Command::Gyro { player_id, x, y, z }) => {
                self.player_input(connection, player_id, PlayerEvent::Gyro { x, y, z })
            }
            Ok(Command::Unrecognized { raw, reason }) => {
                warn!("[{}] Invalid command '{}': {}", connection.id(), raw, reason);
                self.reply(connection, Reply::InvalidCommand);
            }
            Err(not_found) => {
                warn!("[{}] {}", connection.id(), not_found);
                self.reply(connection, Reply::PlayerNotFound);
            }
        }
    }

    fn on_disconnect(&self, connection: &ConnectionHandle, reason: Disconnect) {
        match &reason {
            Disconnect::Eof => info!("[{}] Connection closed by peer", connection.id()),
            Disconnect::Closed | Disconnect::ServerShutdown => {
                debug!("[{}] Connection closed by server", connection.id())
            }
            Disconnect::IdleTimeout => warn!("[{}] Idle timeout", connection.id()),
            Disconnect::Failed(e) => error!("{}", e),
        }

        let released = self
            .registry
            .release_connection(connection.id(), |player_id, slot| {
                self.raise(player_id, slot.session, PlayerEvent::Deregister)
            });
        for (player_id, slot) in released {
            info!(
                "Player {} ('{}') left with {}",
                player_id,
                slot.name,
                connection.peer()
            );
        }
    }
}

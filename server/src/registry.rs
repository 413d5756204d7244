//! Player slot registry
//!
//! A dense, fixed-capacity array of player slots. Registration takes the
//! lowest free index, so ids are small and reused after a player leaves. All
//! reads and writes happen under one internal mutex; no other component can
//! touch the array.
//!
//! Every registration also gets a fresh session number. Work queued for a
//! player carries the session it was validated against, which lets the
//! consumer tell a still-present player from a slot that has since been
//! vacated or handed to someone else.

use crate::error::RegistryError;
use crate::transport::{ConnectionHandle, ConnectionId};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An occupied slot
#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub connection: ConnectionHandle,
    pub session: u64,
}

#[derive(Debug)]
struct Slots {
    slots: Vec<Option<Slot>>,
    next_session: u64,
    closing: bool,
}

#[derive(Debug)]
pub struct SlotRegistry {
    inner: Mutex<Slots>,
}

impl SlotRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: vec![None; capacity],
                next_session: 1,
                closing: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assigns the lowest free slot to `connection`
    ///
    /// Returns the player id and its session number. The scan and the write
    /// happen under the same lock, so two registrations never claim one slot.
    /// `on_claim` runs before the lock is released, which keeps whatever it
    /// records ordered with every other change to the same slot.
    pub fn register<F>(
        &self,
        connection: &ConnectionHandle,
        name: &str,
        on_claim: F,
    ) -> Result<(usize, u64), RegistryError>
    where
        F: FnOnce(usize, u64),
    {
        let mut inner = self.lock();
        if inner.closing {
            return Err(RegistryError::ShuttingDown);
        }
        if connection.is_closed() {
            return Err(RegistryError::ConnectionClosed(connection.id()));
        }

        let player_id = inner
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(RegistryError::Full)?;

        let session = inner.next_session;
        inner.next_session += 1;
        inner.slots[player_id] = Some(Slot {
            name: name.to_string(),
            connection: connection.clone(),
            session,
        });
        on_claim(player_id, session);

        Ok((player_id, session))
    }

    /// Frees an occupied slot and hands back what it held
    ///
    /// `on_release` runs under the registry lock, before the slot can be
    /// claimed again.
    pub fn deregister<F>(&self, player_id: usize, on_release: F) -> Result<Slot, RegistryError>
    where
        F: FnOnce(usize, &Slot),
    {
        let mut inner = self.lock();
        let slot = inner
            .slots
            .get_mut(player_id)
            .and_then(Option::take)
            .ok_or(RegistryError::NotFound(player_id))?;
        on_release(player_id, &slot);
        Ok(slot)
    }

    /// Frees every slot held by a connection that went away
    pub fn release_connection<F>(
        &self,
        connection: ConnectionId,
        mut on_release: F,
    ) -> Vec<(usize, Slot)>
    where
        F: FnMut(usize, &Slot),
    {
        let mut inner = self.lock();
        let mut released = Vec::new();
        for (player_id, entry) in inner.slots.iter_mut().enumerate() {
            if entry
                .as_ref()
                .is_some_and(|slot| slot.connection.id() == connection)
            {
                if let Some(slot) = entry.take() {
                    on_release(player_id, &slot);
                    released.push((player_id, slot));
                }
            }
        }
        released
    }

    /// Runs `f` with the session of the slot's current occupant
    ///
    /// Returns false, without calling `f`, if the slot is empty. The slot
    /// cannot change hands while `f` runs.
    pub fn with_occupant<F>(&self, player_id: usize, f: F) -> bool
    where
        F: FnOnce(u64),
    {
        let inner = self.lock();
        match inner.slots.get(player_id).and_then(Option::as_ref) {
            Some(slot) => {
                f(slot.session);
                true
            }
            None => false,
        }
    }

    /// Marks the registry as closing and empties it
    ///
    /// Returns `None` if shutdown had already begun. Registrations racing with
    /// this call either complete first (and are returned here) or fail with
    /// [`RegistryError::ShuttingDown`].
    pub fn begin_shutdown(&self) -> Option<Vec<(usize, Slot)>> {
        let mut inner = self.lock();
        if inner.closing {
            return None;
        }
        inner.closing = true;
        Some(
            inner
                .slots
                .iter_mut()
                .enumerate()
                .filter_map(|(player_id, entry)| entry.take().map(|slot| (player_id, slot)))
                .collect(),
        )
    }

    pub fn is_closing(&self) -> bool {
        self.lock().closing
    }

    pub fn is_occupied(&self, player_id: usize) -> bool {
        self.session(player_id).is_some()
    }

    /// Session of the player currently in the slot
    pub fn session(&self, player_id: usize) -> Option<u64> {
        self.lock()
            .slots
            .get(player_id)
            .and_then(|entry| entry.as_ref().map(|slot| slot.session))
    }

    /// Whether the slot is still held by the given session
    pub fn is_session(&self, player_id: usize, session: u64) -> bool {
        self.session(player_id) == Some(session)
    }

    /// Ids and names of every occupied slot, in id order
    pub fn players(&self) -> Vec<(usize, String)> {
        self.lock()
            .slots
            .iter()
            .enumerate()
            .filter_map(|(player_id, entry)| {
                entry.as_ref().map(|slot| (player_id, slot.name.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }
}

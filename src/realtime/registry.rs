//! Room-keyed registry of live duplex connections.
//!
//! Rooms are created by the first `join` and removed by the `leave` that
//! empties them. Both structural changes happen under the map's shard lock
//! (`entry` / `remove_if`), so a join racing the last leave either lands in
//! the surviving room or recreates it; it is never dropped with the room.
//!
//! The registry holds the only senders for a connection's outbound queue.
//! Evicting a connection from its last room therefore closes the queue, which
//! ends the connection's writer task.

use std::collections::{HashMap, HashSet};
use std::fmt;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::message::ChatRole;
use crate::realtime::protocol::Frame;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// New-booking notifications for one driver.
    Dispatch(u64),
    /// Passenger/driver chat for one booking.
    Chat(u64),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Dispatch(driver_id) => write!(f, "driver:{driver_id}"),
            RoomKey::Chat(booking_id) => write!(f, "booking:{booking_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    /// Untyped member of a dispatch room.
    Subscriber,
    Passenger,
    Driver,
}

impl From<ChatRole> for MemberRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::Passenger => MemberRole::Passenger,
            ChatRole::Driver => MemberRole::Driver,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    #[error("outbound queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

impl<T> From<&TrySendError<T>> for DeliveryFailure {
    fn from(err: &TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => DeliveryFailure::QueueFull,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        }
    }
}

/// Identity plus outbound queue of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    outbound: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
        }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

struct Member {
    role: MemberRole,
    outbound: mpsc::Sender<Frame>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: DashMap<RoomKey, HashMap<Uuid, Member>>,
    memberships: DashMap<Uuid, HashSet<RoomKey>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handle` to `room`. Returns `false` when the same connection is
    /// already there with the same role; a different role replaces the old one.
    pub fn join(&self, room: RoomKey, handle: &ConnectionHandle, role: MemberRole) -> bool {
        let joined = {
            let mut members = self.rooms.entry(room.clone()).or_default();
            let present = members
                .get(&handle.id)
                .is_some_and(|existing| existing.role == role);
            if !present {
                members.insert(
                    handle.id,
                    Member {
                        role,
                        outbound: handle.outbound.clone(),
                    },
                );
            }
            !present
        };

        if joined {
            self.memberships
                .entry(handle.id)
                .or_default()
                .insert(room.clone());
            debug!(room = %room, connection_id = %handle.id, ?role, "connection joined room");
        }

        joined
    }

    pub fn leave(&self, room: &RoomKey, connection_id: Uuid) -> bool {
        let removed = self.remove_member(room, connection_id);

        if let Some(mut rooms) = self.memberships.get_mut(&connection_id) {
            rooms.remove(room);
        }
        self.memberships
            .remove_if(&connection_id, |_, rooms| rooms.is_empty());

        removed
    }

    /// Removes the connection from every room it joined. Returns how many.
    pub fn leave_all(&self, connection_id: Uuid) -> usize {
        let Some((_, rooms)) = self.memberships.remove(&connection_id) else {
            return 0;
        };

        for room in &rooms {
            self.remove_member(room, connection_id);
        }

        rooms.len()
    }

    /// Queues `frame` for every member of `room` whose role passes
    /// `predicate`. Never waits on a peer: a member whose queue is full or
    /// closed is evicted from the room and delivery continues with the rest.
    pub fn broadcast<F>(&self, room: &RoomKey, frame: &Frame, predicate: F) -> BroadcastReport
    where
        F: Fn(MemberRole) -> bool,
    {
        let targets: Vec<(Uuid, mpsc::Sender<Frame>)> = match self.rooms.get(room) {
            Some(members) => members
                .iter()
                .filter(|(_, member)| predicate(member.role))
                .map(|(id, member)| (*id, member.outbound.clone()))
                .collect(),
            None => {
                debug!(room = %room, "broadcast to absent room");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for (connection_id, outbound) in targets {
            match outbound.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    let failure = DeliveryFailure::from(&err);
                    warn!(
                        room = %room,
                        connection_id = %connection_id,
                        reason = %failure,
                        "delivery failed; evicting connection"
                    );
                    self.leave(room, connection_id);
                    report.evicted += 1;
                }
            }
        }

        report
    }

    pub fn exists(&self, room: &RoomKey) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn member_count(&self, room: &RoomKey) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.memberships.len()
    }

    fn remove_member(&self, room: &RoomKey, connection_id: Uuid) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(&connection_id).is_some(),
            None => false,
        };

        if self
            .rooms
            .remove_if(room, |_, members| members.is_empty())
            .is_some()
        {
            debug!(room = %room, "room closed");
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ConnectionHandle, ConnectionRegistry, MemberRole, RoomKey};
    use crate::realtime::protocol::Frame;

    fn text(body: &str) -> Frame {
        Frame::Text(body.to_string())
    }

    #[test]
    fn leaving_last_member_removes_room() {
        let registry = ConnectionRegistry::new();
        let room = RoomKey::Chat(1);
        let (handle, _rx) = ConnectionHandle::channel(8);

        registry.join(room.clone(), &handle, MemberRole::Driver);
        assert!(registry.exists(&room));

        assert!(registry.leave(&room, handle.id()));
        assert!(!registry.exists(&room));
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn join_is_idempotent_for_same_role() {
        let registry = ConnectionRegistry::new();
        let room = RoomKey::Chat(1);
        let (handle, _rx) = ConnectionHandle::channel(8);

        assert!(registry.join(room.clone(), &handle, MemberRole::Passenger));
        assert!(!registry.join(room.clone(), &handle, MemberRole::Passenger));
        assert_eq!(registry.member_count(&room), 1);
    }

    #[test]
    fn dispatch_and_chat_rooms_do_not_collide() {
        let registry = ConnectionRegistry::new();
        let (driver, _rx1) = ConnectionHandle::channel(8);
        let (passenger, _rx2) = ConnectionHandle::channel(8);

        registry.join(RoomKey::Dispatch(5), &driver, MemberRole::Subscriber);
        registry.join(RoomKey::Chat(5), &passenger, MemberRole::Passenger);

        assert_eq!(registry.member_count(&RoomKey::Dispatch(5)), 1);
        assert_eq!(registry.member_count(&RoomKey::Chat(5)), 1);
    }

    #[test]
    fn chat_broadcast_skips_sender_role() {
        let registry = ConnectionRegistry::new();
        let room = RoomKey::Chat(7);
        let (passenger, mut passenger_rx) = ConnectionHandle::channel(8);
        let (driver, mut driver_rx) = ConnectionHandle::channel(8);
        registry.join(room.clone(), &passenger, MemberRole::Passenger);
        registry.join(room.clone(), &driver, MemberRole::Driver);

        let report = registry.broadcast(&room, &text("hello"), |role| {
            role != MemberRole::Passenger
        });

        assert_eq!(report.delivered, 1);
        assert_eq!(driver_rx.try_recv().unwrap(), text("hello"));
        assert!(passenger_rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_with_only_sender_delivers_nothing() {
        let registry = ConnectionRegistry::new();
        let room = RoomKey::Chat(7);
        let (passenger, mut rx) = ConnectionHandle::channel(8);
        registry.join(room.clone(), &passenger, MemberRole::Passenger);

        let report = registry.broadcast(&room, &text("anyone?"), |role| {
            role != MemberRole::Passenger
        });

        assert_eq!(report.delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_to_missing_room_is_empty() {
        let registry = ConnectionRegistry::new();
        let report = registry.broadcast(&RoomKey::Dispatch(1), &text("x"), |_| true);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.evicted, 0);
    }

    #[test]
    fn closed_member_is_evicted_without_stopping_delivery() {
        let registry = ConnectionRegistry::new();
        let room = RoomKey::Dispatch(3);
        let (gone, gone_rx) = ConnectionHandle::channel(8);
        let (alive, mut alive_rx) = ConnectionHandle::channel(8);
        registry.join(room.clone(), &gone, MemberRole::Subscriber);
        registry.join(room.clone(), &alive, MemberRole::Subscriber);
        drop(gone_rx);

        let report = registry.broadcast(&room, &text("ping"), |_| true);

        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, 1);
        assert_eq!(registry.member_count(&room), 1);
        assert_eq!(alive_rx.try_recv().unwrap(), text("ping"));
    }

    #[test]
    fn stalled_member_is_evicted_when_queue_fills() {
        let registry = ConnectionRegistry::new();
        let room = RoomKey::Dispatch(3);
        let (slow, _slow_rx) = ConnectionHandle::channel(1);
        registry.join(room.clone(), &slow, MemberRole::Subscriber);

        let first = registry.broadcast(&room, &text("1"), |_| true);
        let second = registry.broadcast(&room, &text("2"), |_| true);

        assert_eq!(first.delivered, 1);
        assert_eq!(second.evicted, 1);
        assert!(!registry.exists(&room));
    }

    #[test]
    fn eviction_from_last_room_closes_the_queue() {
        let registry = ConnectionRegistry::new();
        let room = RoomKey::Chat(4);
        let (handle, mut rx) = ConnectionHandle::channel(1);
        registry.join(room.clone(), &handle, MemberRole::Driver);
        drop(handle);

        registry.broadcast(&room, &text("1"), |_| true);
        registry.broadcast(&room, &text("2"), |_| true);

        assert_eq!(rx.try_recv().unwrap(), text("1"));
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn messages_from_one_sender_arrive_in_order() {
        let registry = ConnectionRegistry::new();
        let room = RoomKey::Chat(2);
        let (driver, mut rx) = ConnectionHandle::channel(16);
        registry.join(room.clone(), &driver, MemberRole::Driver);

        for i in 0..10 {
            registry.broadcast(&room, &text(&i.to_string()), |role| {
                role == MemberRole::Driver
            });
        }

        for i in 0..10 {
            assert_eq!(rx.try_recv().unwrap(), text(&i.to_string()));
        }
    }

    #[test]
    fn leave_all_clears_every_room() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(8);
        registry.join(RoomKey::Dispatch(1), &handle, MemberRole::Subscriber);
        registry.join(RoomKey::Chat(2), &handle, MemberRole::Driver);

        assert_eq!(registry.leave_all(handle.id()), 2);
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.leave_all(handle.id()), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_join_leave_broadcast_keeps_count_consistent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let room = RoomKey::Chat(1);

        let mut tasks = Vec::new();
        for i in 0..200usize {
            let registry = registry.clone();
            let room = room.clone();
            tasks.push(tokio::spawn(async move {
                let (handle, mut rx) = ConnectionHandle::channel(1024);
                let role = if i % 2 == 0 {
                    MemberRole::Passenger
                } else {
                    MemberRole::Driver
                };

                registry.join(room.clone(), &handle, role);
                registry.broadcast(&room, &Frame::Text(i.to_string()), |member| {
                    member != role
                });
                tokio::task::yield_now().await;
                while rx.try_recv().is_ok() {}

                if i % 4 == 0 {
                    registry.leave(&room, handle.id());
                    None
                } else {
                    Some((handle, rx))
                }
            }));
        }

        let mut survivors = Vec::new();
        for task in tasks {
            if let Some(survivor) = task.await.unwrap() {
                survivors.push(survivor);
            }
        }

        assert_eq!(survivors.len(), 150);
        assert_eq!(registry.member_count(&room), 150);
        assert_eq!(registry.connection_count(), 150);

        for (handle, _rx) in &survivors {
            registry.leave_all(handle.id());
        }
        assert!(!registry.exists(&room));
    }
}

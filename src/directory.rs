//! Room and user directories the engine consults but does not own.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::model::Room;

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn room(&self, id: Ulid) -> Option<Room>;

    /// Every known room, ordered by name.
    async fn list_rooms(&self) -> Vec<Room>;

    async fn room_exists(&self, id: Ulid) -> bool {
        self.room(id).await.is_some()
    }

    async fn is_room_available(&self, id: Ulid) -> bool {
        self.room(id).await.is_some_and(|r| r.available)
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, id: Ulid) -> bool;
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("room name already taken: {0}")]
    DuplicateName(String),
    #[error("room not found: {0}")]
    RoomNotFound(Ulid),
    #[error("cannot read seed file: {0}")]
    Seed(#[from] std::io::Error),
    #[error("malformed seed file: {0}")]
    SeedFormat(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub username: String,
}

/// Initial directory contents, loaded from JSON at startup.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub users: Vec<User>,
}

/// In-process directory backing both traits.
#[derive(Default)]
pub struct InMemoryDirectory {
    rooms: DashMap<Ulid, Room>,
    users: DashMap<Ulid, User>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Result<Self, DirectoryError> {
        let dir = Self::new();
        for room in seed.rooms {
            dir.add_room(room)?;
        }
        for user in seed.users {
            dir.add_user(user);
        }
        Ok(dir)
    }

    pub fn load_seed(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_seed(serde_json::from_str(&raw)?)
    }

    /// Register a room. Names are unique across the directory.
    pub fn add_room(&self, room: Room) -> Result<(), DirectoryError> {
        if self.rooms.iter().any(|r| r.name == room.name && r.id != room.id) {
            return Err(DirectoryError::DuplicateName(room.name));
        }
        self.rooms.insert(room.id, room);
        Ok(())
    }

    pub fn set_available(&self, id: Ulid, available: bool) -> Result<(), DirectoryError> {
        let mut room = self.rooms.get_mut(&id).ok_or(DirectoryError::RoomNotFound(id))?;
        room.available = available;
        Ok(())
    }

    /// Drop the room from the directory. Its bookings are purged separately
    /// through `Engine::purge_room`.
    pub fn remove_room(&self, id: Ulid) -> Option<Room> {
        self.rooms.remove(&id).map(|(_, room)| room)
    }

    pub fn add_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl RoomDirectory for InMemoryDirectory {
    async fn room(&self, id: Ulid) -> Option<Room> {
        self.rooms.get(&id).map(|r| r.value().clone())
    }

    async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|r| r.value().clone()).collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn user_exists(&self, id: Ulid) -> bool {
        self.users.contains_key(&id)
    }
}

//! Private rooms for playing against a friend.
//!
//! A room is addressed by a six-digit code the host shares out of band. Rooms
//! hold at most two members; only the host may start the match. Rooms are
//! dropped as soon as their last member disconnects, so abandoned codes do
//! not pile up.

use crate::network::ConnId;
use rand::Rng;
use shared::RoomErrorKind;
use std::collections::HashMap;

pub const ROOM_CAPACITY: usize = 2;

#[derive(Debug, Clone)]
pub struct RoomMember {
    pub conn: ConnId,
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub host_user_id: String,
    pub members: Vec<RoomMember>,
    pub match_id: Option<String>,
}

pub struct RoomTable {
    rooms: HashMap<String, Room>,
}

impl RoomTable {
    pub fn new() -> Self {
        RoomTable {
            rooms: HashMap::new(),
        }
    }

    /// Creates a room hosted by `host` and returns its join code.
    pub fn create(&mut self, name: Option<String>, host: RoomMember) -> String {
        let id = self.fresh_code();
        let room = Room {
            id: id.clone(),
            name: name.unwrap_or_else(|| "Room".to_string()),
            host_user_id: host.user_id.clone(),
            members: vec![host],
            match_id: None,
        };
        self.rooms.insert(id.clone(), room);
        id
    }

    fn fresh_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code = rng.gen_range(100_000..1_000_000).to_string();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// Adds a member to an existing room.
    pub fn join(&mut self, room_id: &str, member: RoomMember) -> Result<(), RoomErrorKind> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or(RoomErrorKind::NotFound)?;
        if room.members.len() >= ROOM_CAPACITY {
            return Err(RoomErrorKind::Full);
        }
        room.members.push(member);
        Ok(())
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn set_match(&mut self, room_id: &str, match_id: String) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.match_id = Some(match_id);
        }
    }

    pub fn find_by_conn(&self, conn: ConnId) -> Option<&Room> {
        self.rooms
            .values()
            .find(|room| room.members.iter().any(|m| m.conn == conn))
    }

    /// Removes a connection from its room, if any. Returns the room id it
    /// left; the room itself is dropped when that was its last member.
    pub fn remove_conn(&mut self, conn: ConnId) -> Option<String> {
        let room_id = self.find_by_conn(conn)?.id.clone();
        let emptied = {
            let room = self.rooms.get_mut(&room_id)?;
            room.members.retain(|m| m.conn != conn);
            room.members.is_empty()
        };
        if emptied {
            self.rooms.remove(&room_id);
        }
        Some(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

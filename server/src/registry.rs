//! Connection and session registry
//!
//! Tracks every live WebSocket connection together with the identity it
//! authenticated as. Identities come in two flavors: account users (verified
//! token) and guests (everyone else), distinguished by the `guest:` prefix
//! on the user id. Bot seats inside matches reuse the same scheme with a
//! `bot:` prefix but never appear in the registry.
//!
//! The registry enforces one live connection per account. Registering an
//! account that is already connected displaces the earlier connection, which
//! the server then kicks.

use crate::network::{ConnId, OutboundSender};
use std::collections::HashMap;
use uuid::Uuid;

const GUEST_PREFIX: &str = "guest:";
const BOT_PREFIX: &str = "bot:";

/// Mints a fresh guest identity for an unauthenticated connection.
pub fn mint_guest_id() -> String {
    format!("{}{}", GUEST_PREFIX, Uuid::new_v4())
}

/// Whether a user id belongs to a guest rather than an account.
pub fn is_guest(user_id: &str) -> bool {
    user_id.starts_with(GUEST_PREFIX)
}

/// Whether a user id belongs to a bot seat.
pub fn is_bot(user_id: &str) -> bool {
    user_id.starts_with(BOT_PREFIX)
}

/// Display name shown for a guest: `Guest-` plus the last four characters
/// of its minted id, uppercased.
pub fn guest_display_name(user_id: &str) -> String {
    let tail: String = user_id
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("Guest-{}", tail.to_uppercase())
}

/// A live connection and the identity attached to it.
#[derive(Debug)]
pub struct Connection {
    /// Transport id assigned by the network layer.
    pub id: ConnId,
    /// Account id, or a minted `guest:` id.
    pub user_id: String,
    /// Login session the connection's token was minted under, when known.
    pub session_id: Option<String>,
    /// Client-reported device id, used to key daily-play counters.
    pub device_id: Option<String>,
    /// Channel into the connection's socket writer task.
    pub tx: OutboundSender,
}

/// All live connections, indexed by transport id and by account.
pub struct Registry {
    connections: HashMap<ConnId, Connection>,
    /// Account id -> the single connection currently holding it. Guests are
    /// never entered here.
    user_to_conn: HashMap<String, ConnId>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            connections: HashMap::new(),
            user_to_conn: HashMap::new(),
        }
    }

    /// Registers a connection under its identity.
    ///
    /// The caller is responsible for kicking any displaced connection before
    /// calling this; registration simply takes over the account mapping.
    pub fn register(&mut self, connection: Connection) {
        if !is_guest(&connection.user_id) {
            self.user_to_conn
                .insert(connection.user_id.clone(), connection.id);
        }
        self.connections.insert(connection.id, connection);
    }

    /// Removes a connection, returning its record.
    ///
    /// The account mapping is only cleared when it still points at this
    /// connection, so a displaced predecessor going away does not unmap its
    /// successor.
    pub fn remove(&mut self, conn: ConnId) -> Option<Connection> {
        let connection = self.connections.remove(&conn)?;
        if self.user_to_conn.get(&connection.user_id) == Some(&conn) {
            self.user_to_conn.remove(&connection.user_id);
        }
        Some(connection)
    }

    /// Rebinds a connection to a new identity after a token refresh.
    pub fn rebind(&mut self, conn: ConnId, user_id: String, session_id: Option<String>) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        let old_user = connection.user_id.clone();
        connection.user_id = user_id.clone();
        connection.session_id = session_id;
        if self.user_to_conn.get(&old_user) == Some(&conn) {
            self.user_to_conn.remove(&old_user);
        }
        if !is_guest(&user_id) {
            self.user_to_conn.insert(user_id, conn);
        }
    }

    pub fn get(&self, conn: ConnId) -> Option<&Connection> {
        self.connections.get(&conn)
    }

    /// The identity a connection is registered under.
    pub fn user_id_of(&self, conn: ConnId) -> Option<&str> {
        self.connections.get(&conn).map(|c| c.user_id.as_str())
    }

    /// The connection currently holding an account, if any.
    pub fn conn_of_user(&self, user_id: &str) -> Option<ConnId> {
        self.user_to_conn.get(user_id).copied()
    }

    /// Number of live connections, guests included.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of distinct signed-in accounts currently connected.
    pub fn signed_in_count(&self) -> usize {
        self.user_to_conn.len()
    }
}

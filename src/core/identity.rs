//! Identity store - user records referenced by objects
//!
//! Identities are append/update only and live for the whole session,
//! independent of which room is subscribed. The two NPC identities are
//! always present.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use super::constants::{INVADER_USER_ID, SOURCE_KEEPER_USER_ID};
use super::merge::merge_map;
use super::types::{IdentityUpdate, UserId};

/// A user record: raw attributes merged from every update seen
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: UserId,
    pub attrs: Map<String, Value>,
}

impl Identity {
    pub fn username(&self) -> Option<&str> {
        self.attrs.get("username").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct IdentityStore {
    users: HashMap<UserId, Identity>,
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityStore {
    /// Create a store seeded with the NPC identities
    pub fn new() -> Self {
        let mut store = Self {
            users: HashMap::new(),
        };
        store.upsert(INVADER_USER_ID, &npc_record(INVADER_USER_ID, "Invader"));
        store.upsert(
            SOURCE_KEEPER_USER_ID,
            &npc_record(SOURCE_KEEPER_USER_ID, "Source Keeper"),
        );
        store
    }

    /// Merge `attrs` into the record for `id`, creating it if needed
    pub fn upsert(&mut self, id: &str, attrs: &Map<String, Value>) {
        match self.users.get_mut(id) {
            Some(identity) => identity.attrs = merge_map(&identity.attrs, attrs),
            None => {
                self.users.insert(
                    id.to_string(),
                    Identity {
                        id: id.to_string(),
                        attrs: attrs.clone(),
                    },
                );
            }
        }
    }

    pub fn apply(&mut self, updates: &[IdentityUpdate]) {
        for update in updates {
            self.upsert(&update.id, &update.attrs);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Identity> {
        self.users.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.users.contains_key(id)
    }

    /// Username for `id`, falling back to the id itself
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).and_then(Identity::username).unwrap_or(id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.users.values()
    }

    /// Raw records keyed by id, as handed to the renderer
    pub fn to_json(&self) -> Map<String, Value> {
        let mut ids: Vec<&UserId> = self.users.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| {
                let identity = self.users.get(id)?;
                let mut record = identity.attrs.clone();
                record.insert("_id".into(), Value::String(id.clone()));
                Some((id.clone(), Value::Object(record)))
            })
            .collect()
    }
}

fn npc_record(id: &str, username: &str) -> Map<String, Value> {
    let record = json!({
        "_id": id,
        "username": username,
        "usernameLower": username.to_lowercase(),
        "cpu": 100,
        "cpuAvailable": 10000,
        "gcl": 13966610.2,
        "active": 0,
    });
    match record {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

use std::collections::HashMap;

use super::key::{LocationKey, UserId};

/// 用户 -> 当前所在位置键
#[derive(Debug, Default)]
pub struct UserIndex {
    entries: HashMap<UserId, LocationKey>,
}

impl UserIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: &UserId) -> Option<&LocationKey> {
        self.entries.get(user)
    }

    pub fn set(&mut self, user: UserId, key: LocationKey) -> Option<LocationKey> {
        self.entries.insert(user, key)
    }

    pub fn remove(&mut self, user: &UserId) -> Option<LocationKey> {
        self.entries.remove(user)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &LocationKey)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

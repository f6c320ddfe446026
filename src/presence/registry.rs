use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::key::{Coordinate, LocationKey, UserId};

/// 标记的显示状态，只由在线用户数推导
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualState {
    Active,
    Past,
}

/// 聚合后的位置记录
#[derive(Debug, Clone)]
pub struct Location {
    key: LocationKey,
    label: String,
    coordinate: Coordinate,
    active_users: HashSet<UserId>,
}

impl Location {
    pub fn key(&self) -> &LocationKey {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn active_users(&self) -> &HashSet<UserId> {
        &self.active_users
    }

    pub fn active_count(&self) -> usize {
        self.active_users.len()
    }

    pub fn visual_state(&self) -> VisualState {
        if self.active_users.is_empty() {
            VisualState::Past
        } else {
            VisualState::Active
        }
    }
}

/// 位置注册表：键 -> 位置记录
///
/// 记录首次被引用时创建，之后不会删除；没有在线用户时退化为 `Past`。
#[derive(Debug, Default)]
pub struct LocationRegistry {
    locations: HashMap<LocationKey, Location>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出或创建位置记录，并刷新坐标和非空名称
    pub fn ensure(&mut self, key: &LocationKey, coordinate: Coordinate, label: Option<&str>) -> &Location {
        let label = label.filter(|l| !l.is_empty());
        let location = self
            .locations
            .entry(key.clone())
            .or_insert_with(|| Location {
                key: key.clone(),
                label: key.to_string(),
                coordinate,
                active_users: HashSet::new(),
            });

        location.coordinate = coordinate;
        if let Some(label) = label {
            location.label = label.to_string();
        }
        location
    }

    /// 重复插入是空操作；键不存在时返回 false
    pub fn add_active(&mut self, key: &LocationKey, user: &UserId) -> bool {
        match self.locations.get_mut(key) {
            Some(location) => location.active_users.insert(user.clone()),
            None => false,
        }
    }

    pub fn remove_active(&mut self, key: &LocationKey, user: &UserId) -> bool {
        self.locations
            .get_mut(key)
            .is_some_and(|location| location.active_users.remove(user))
    }

    /// 清空在线用户，返回被清掉的用户
    pub fn mark_all_past(&mut self, key: &LocationKey) -> Vec<UserId> {
        match self.locations.get_mut(key) {
            Some(location) => location.active_users.drain().collect(),
            None => Vec::new(),
        }
    }

    pub fn visual_state_of(&self, key: &LocationKey) -> Option<VisualState> {
        self.locations.get(key).map(Location::visual_state)
    }

    pub fn get(&self, key: &LocationKey) -> Option<&Location> {
        self.locations.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bern() -> LocationKey {
        LocationKey::from("Bern, CH")
    }

    #[test]
    fn ensure_creates_past_location_labelled_by_key() {
        let mut registry = LocationRegistry::new();
        let location = registry.ensure(&bern(), Coordinate::new(46.95, 7.45), None);

        assert_eq!(location.label(), "Bern, CH");
        assert_eq!(location.visual_state(), VisualState::Past);
        assert_eq!(location.active_count(), 0);
    }

    #[test]
    fn ensure_refreshes_coordinate_and_keeps_label_on_empty() {
        let mut registry = LocationRegistry::new();
        registry.ensure(&bern(), Coordinate::new(46.95, 7.45), Some("Bern"));
        let location = registry.ensure(&bern(), Coordinate::new(46.96, 7.46), Some(""));

        assert_eq!(location.label(), "Bern");
        assert_eq!(location.coordinate(), Coordinate::new(46.96, 7.46));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn add_active_is_idempotent() {
        let mut registry = LocationRegistry::new();
        let user = UserId::from("u1");
        registry.ensure(&bern(), Coordinate::new(46.95, 7.45), None);

        assert!(registry.add_active(&bern(), &user));
        assert!(!registry.add_active(&bern(), &user));
        assert_eq!(registry.get(&bern()).map(Location::active_count), Some(1));
        assert_eq!(registry.visual_state_of(&bern()), Some(VisualState::Active));
    }

    #[test]
    fn add_active_on_unknown_key_does_nothing() {
        let mut registry = LocationRegistry::new();
        assert!(!registry.add_active(&bern(), &UserId::from("u1")));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_active_tolerates_unknown_keys_and_users() {
        let mut registry = LocationRegistry::new();
        assert!(!registry.remove_active(&bern(), &UserId::from("u1")));

        registry.ensure(&bern(), Coordinate::new(46.95, 7.45), None);
        assert!(!registry.remove_active(&bern(), &UserId::from("u1")));
    }

    #[test]
    fn mark_all_past_clears_but_keeps_location() {
        let mut registry = LocationRegistry::new();
        registry.ensure(&bern(), Coordinate::new(46.95, 7.45), None);
        registry.add_active(&bern(), &UserId::from("u1"));
        registry.add_active(&bern(), &UserId::from("u2"));

        let cleared = registry.mark_all_past(&bern());

        assert_eq!(cleared.len(), 2);
        assert_eq!(registry.visual_state_of(&bern()), Some(VisualState::Past));
        assert!(registry.get(&bern()).is_some());
    }
}

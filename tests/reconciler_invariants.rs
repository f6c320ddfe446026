use pretty_assertions::assert_eq;
use presence_map::presence::{LocationKey, Reconciler, UserId, VisualState};
use proptest::prelude::*;
use serde_json::{Value, json};

const USERS: [&str; 4] = ["u0", "u1", "u2", "u3"];
const KEYS: [&str; 4] = ["Bern, CH", "Zurich, CH", "Geneva, CH", "46.2,6.15"];

fn connect(user: usize, key: usize, lat: f64) -> Value {
    json!({"type": "connect", "id": USERS[user], "key": KEYS[key], "lat": lat, "lng": 7.0})
}

fn event_strategy(with_past: bool) -> BoxedStrategy<Value> {
    let connects = (0..USERS.len(), 0..KEYS.len(), -90.0..90.0f64)
        .prop_map(|(u, k, lat)| connect(u, k, lat));
    let disconnects = (0..USERS.len(), proptest::option::of(0..KEYS.len())).prop_map(|(u, k)| match k {
        Some(k) => json!({"type": "disconnect", "id": USERS[u], "key": KEYS[k]}),
        None => json!({"type": "disconnect", "id": USERS[u]}),
    });
    let legacies = (0..USERS.len(), 0..3usize).prop_map(|(u, c)| {
        let cities = ["Bern", "Zurich", "Geneva"];
        json!({"id": USERS[u], "lat": 46.0, "lng": 7.0, "city": cities[c], "country": "CH"})
    });
    let malformed = prop_oneof![
        Just(json!({"type": "connect", "id": "u0", "lat": 1.0, "lng": 2.0})),
        Just(json!({"type": "connect", "id": "u1", "key": "Bern, CH", "lat": "north", "lng": 2.0})),
        Just(json!({"type": "disconnect"})),
        Just(json!({"type": "hello", "id": "u2"})),
        Just(json!("just a string")),
    ];

    if with_past {
        let pasts = (0..KEYS.len()).prop_map(|k| json!({"type": "past", "key": KEYS[k], "lat": 46.0, "lng": 7.0}));
        prop_oneof![4 => connects, 3 => disconnects, 1 => legacies, 1 => malformed, 2 => pasts].boxed()
    } else {
        prop_oneof![4 => connects, 3 => disconnects, 1 => legacies, 1 => malformed].boxed()
    }
}

type Snapshot = (Vec<(String, String, u64, u64, Vec<String>)>, Vec<(String, String)>);

fn snapshot(reconciler: &Reconciler) -> Snapshot {
    let mut locations: Vec<_> = reconciler
        .registry()
        .iter()
        .map(|l| {
            let mut users: Vec<String> = l.active_users().iter().map(UserId::to_string).collect();
            users.sort();
            (
                l.key().to_string(),
                l.label().to_string(),
                l.coordinate().lat.to_bits(),
                l.coordinate().lng.to_bits(),
                users,
            )
        })
        .collect();
    locations.sort();

    let mut index: Vec<_> = reconciler
        .users()
        .iter()
        .map(|(u, k)| (u.to_string(), k.to_string()))
        .collect();
    index.sort();
    (locations, index)
}

fn assert_membership_backed_by_index(reconciler: &Reconciler) -> Result<(), TestCaseError> {
    for location in reconciler.registry().iter() {
        for user in location.active_users() {
            prop_assert_eq!(reconciler.users().get(user), Some(location.key()));
        }
        let expected = if location.active_count() > 0 {
            VisualState::Active
        } else {
            VisualState::Past
        };
        prop_assert_eq!(location.visual_state(), expected);
    }
    Ok(())
}

proptest! {
    #[test]
    fn a_user_is_active_in_at_most_one_location(events in prop::collection::vec(event_strategy(true), 1..60)) {
        let mut reconciler = Reconciler::new();
        for event in &events {
            reconciler.apply_value(event);
            for user in USERS {
                let user = UserId::from(user);
                let count = reconciler
                    .registry()
                    .iter()
                    .filter(|l| l.active_users().contains(&user))
                    .count();
                prop_assert!(count <= 1);
            }
            assert_membership_backed_by_index(&reconciler)?;
        }
    }

    #[test]
    fn index_entries_point_at_locations_listing_the_user(events in prop::collection::vec(event_strategy(false), 1..60)) {
        let mut reconciler = Reconciler::new();
        for event in &events {
            reconciler.apply_value(event);
            for (user, key) in reconciler.users().iter() {
                let location = reconciler.registry().get(key);
                prop_assert!(location.is_some_and(|l| l.active_users().contains(user)));
            }
        }
    }

    #[test]
    fn repeated_connect_leaves_state_unchanged(
        events in prop::collection::vec(event_strategy(true), 0..30),
        user in 0..USERS.len(),
        key in 0..KEYS.len(),
    ) {
        let mut reconciler = Reconciler::new();
        for event in &events {
            reconciler.apply_value(event);
        }

        let event = connect(user, key, 46.95);
        reconciler.apply_value(&event);
        let once = snapshot(&reconciler);
        let changed = reconciler.apply_value(&event);

        prop_assert_eq!(snapshot(&reconciler), once);
        prop_assert_eq!(changed.len(), 1);
    }

    #[test]
    fn discarded_events_never_mutate_state(events in prop::collection::vec(event_strategy(true), 0..30)) {
        let mut reconciler = Reconciler::new();
        for event in &events {
            reconciler.apply_value(event);
        }
        let before = snapshot(&reconciler);

        for bad in [
            json!({"type": "connect", "id": "u0", "key": "Bern, CH", "lat": null, "lng": 7.0}),
            json!({"type": "past", "lat": 46.0, "lng": 7.0}),
            json!({"type": "future", "id": "u0"}),
            json!(42),
        ] {
            prop_assert!(reconciler.apply_value(&bad).is_empty());
        }
        prop_assert_eq!(snapshot(&reconciler), before);
    }

    #[test]
    fn past_event_always_empties_the_location(
        events in prop::collection::vec(event_strategy(true), 0..40),
        key in 0..KEYS.len(),
    ) {
        let mut reconciler = Reconciler::new();
        for event in &events {
            reconciler.apply_value(event);
        }

        let changed = reconciler.apply_value(&json!({"type": "past", "key": KEYS[key], "lat": 46.0, "lng": 7.0}));
        let key = LocationKey::from(KEYS[key]);

        prop_assert_eq!(reconciler.registry().get(&key).map(|l| l.active_count()), Some(0));
        prop_assert_eq!(reconciler.registry().visual_state_of(&key), Some(VisualState::Past));
        prop_assert!(changed.contains(&key));
    }
}

#[test]
fn move_scenario_reports_both_locations() {
    let mut reconciler = Reconciler::new();
    reconciler.apply_value(&json!({"type": "connect", "id": "u1", "key": "Bern, CH", "lat": 46.95, "lng": 7.45}));
    let changed = reconciler.apply_value(&json!({"type": "connect", "id": "u1", "key": "Zurich, CH", "lat": 47.37, "lng": 8.54}));

    assert_eq!(
        changed.into_iter().collect::<Vec<_>>(),
        vec![LocationKey::from("Bern, CH"), LocationKey::from("Zurich, CH")]
    );
}

#[test]
fn out_of_order_disconnect_then_connect_leaves_user_active() {
    let mut reconciler = Reconciler::new();
    assert!(reconciler.apply_value(&json!({"type": "disconnect", "id": "u5"})).is_empty());
    reconciler.apply_value(&json!({"type": "connect", "id": "u5", "key": "Bern, CH", "lat": 46.95, "lng": 7.45}));

    let bern = reconciler.registry().get(&LocationKey::from("Bern, CH")).unwrap();
    assert_eq!(bern.active_count(), 1);
    assert_eq!(bern.visual_state(), VisualState::Active);
}

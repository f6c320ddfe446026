//! 位置聚合与在线状态协调
//!
//! 键派生 -> 注册表 + 用户索引 -> 协调器 -> 渲染适配
pub mod event;
pub mod key;
pub mod reconciler;
pub mod registry;
pub mod render;
pub mod user_index;

pub use event::{DecodeError, Discard, PresenceEvent, WireMessage};
pub use key::{Coordinate, LocationAttrs, LocationKey, UserId, derive_key};
pub use reconciler::{ChangedKeys, Reconciler};
pub use registry::{Location, LocationRegistry, VisualState};
pub use render::{MapWidget, Marker, MarkerBoard, MarkerStyle, popup_html, render_changes};
pub use user_index::UserIndex;

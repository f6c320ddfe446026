use std::collections::BTreeMap;

use serde::Serialize;

use super::key::{Coordinate, LocationKey};
use super::reconciler::ChangedKeys;
use super::registry::{Location, LocationRegistry, VisualState};

/// 圆形标记的样式
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkerStyle {
    pub radius: u32,
    pub fill_color: &'static str,
    pub color: &'static str,
    pub weight: u32,
    pub opacity: f32,
    pub fill_opacity: f32,
}

pub const ACTIVE_STYLE: MarkerStyle = MarkerStyle {
    radius: 7,
    fill_color: "#4fc3f7",
    color: "#4fc3f7",
    weight: 1,
    opacity: 1.0,
    fill_opacity: 0.7,
};

pub const PAST_STYLE: MarkerStyle = MarkerStyle {
    radius: 7,
    fill_color: "#9aa0a6",
    color: "#7f7f7f",
    weight: 1,
    opacity: 0.9,
    fill_opacity: 0.6,
};

impl MarkerStyle {
    pub fn for_state(state: VisualState) -> &'static MarkerStyle {
        match state {
            VisualState::Active => &ACTIVE_STYLE,
            VisualState::Past => &PAST_STYLE,
        }
    }
}

/// 地图组件需要提供的能力
pub trait MapWidget {
    /// 放置标记，已存在时移动
    fn place_point(&mut self, key: &LocationKey, at: Coordinate);
    fn set_style(&mut self, key: &LocationKey, style: &MarkerStyle);
    fn set_popup(&mut self, key: &LocationKey, html: &str);
}

/// 弹窗内容：在线时显示人数，历史位置只显示名称
pub fn popup_html(label: &str, active_count: usize) -> String {
    if active_count > 0 {
        format!(
            "<div class=\"current\"><b>{}</b><br/>Active users: <strong>{}</strong></div>",
            escape_html(label),
            active_count
        )
    } else {
        format!(
            "<div class=\"past\"><b>{}</b><br/>Visited before</div>",
            escape_html(label)
        )
    }
}

pub fn escape_html(text: &str) -> String {
    v_htmlescape::escape(text).to_string()
}

fn render_location<W: MapWidget>(location: &Location, widget: &mut W) {
    let key = location.key();
    widget.place_point(key, location.coordinate());
    widget.set_style(key, MarkerStyle::for_state(location.visual_state()));
    widget.set_popup(key, &popup_html(location.label(), location.active_count()));
}

/// 把变化的位置推送到地图组件，返回实际重绘的数量
///
/// 注册表里不存在的键（比如 disconnect 指向的未知位置）没有可画的内容，直接跳过。
pub fn render_changes<W: MapWidget>(
    registry: &LocationRegistry,
    changed: &ChangedKeys,
    widget: &mut W,
) -> usize {
    let mut rendered = 0;
    for key in changed {
        match registry.get(key) {
            Some(location) => {
                render_location(location, widget);
                rendered += 1;
            }
            None => tracing::debug!("Changed key {} has no location to render", key),
        }
    }
    rendered
}

/// 内存中的标记
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub key: LocationKey,
    pub coordinate: Coordinate,
    pub style: MarkerStyle,
    pub popup: String,
}

/// 内存版地图组件，供 HTTP 接口读取
#[derive(Debug, Default)]
pub struct MarkerBoard {
    markers: BTreeMap<LocationKey, Marker>,
}

impl MarkerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &LocationKey) -> Option<&Marker> {
        self.markers.get(key)
    }

    pub fn snapshot(&self) -> Vec<Marker> {
        self.markers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    fn marker_mut(&mut self, key: &LocationKey) -> &mut Marker {
        self.markers.entry(key.clone()).or_insert_with(|| Marker {
            key: key.clone(),
            coordinate: Coordinate::new(0.0, 0.0),
            style: PAST_STYLE,
            popup: String::new(),
        })
    }
}

impl MapWidget for MarkerBoard {
    fn place_point(&mut self, key: &LocationKey, at: Coordinate) {
        self.marker_mut(key).coordinate = at;
    }

    fn set_style(&mut self, key: &LocationKey, style: &MarkerStyle) {
        self.marker_mut(key).style = *style;
    }

    fn set_popup(&mut self, key: &LocationKey, html: &str) {
        self.marker_mut(key).popup = html.to_string();
    }
}

mod handler;
mod model;

pub use handler::{get_markers, get_stats, map_socket};
pub use model::{MapSocketQuery, MarkersResponse};

pub mod aggregator;
mod dto;
pub mod handlers;
pub mod model;
pub mod quota;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::read_routes())
        .merge(handlers::write_routes())
}

//! Binds both protocol adapters behind one axum server, sharing bot
//! identity coordination between them.

pub mod config;
pub mod state;

use axum::Router;

pub use config::Config;
pub use state::Gateway;

pub fn build_router(gateway: &Gateway) -> Router {
    Router::new()
        .merge(onebot_v11::router(gateway.v11.clone()))
        .merge(onebot_v12::router(gateway.v12.clone()))
}

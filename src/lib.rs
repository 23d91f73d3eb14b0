pub mod appresult;
pub mod auth;
pub mod chat;
pub mod db;
pub mod users;

use axum::extract::FromRef;
use sqlx::SqlitePool;

pub use appresult::{AppError, AppResult};

use crate::auth::TokenVerifier;
use crate::chat::RoomRegistry;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub verifier: TokenVerifier,
    pub rooms: RoomRegistry,
}

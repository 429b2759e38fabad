pub mod auth;
pub mod responses;
pub mod router;
pub mod state;
pub mod storage;
pub mod uploads;


pub use auth::AuthUser;
pub use state::AppState;

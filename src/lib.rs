pub mod app_state;
pub mod env;
pub mod errors;
pub mod middlewares;
pub mod pipeline;
pub mod providers;
pub mod routes;
pub mod translate;
pub mod utils;
pub mod validation;

pub use app_state::AppState;
pub use env::Env;
pub use routes::router;

mod cors;
mod request_id;

pub use cors::handle_cors;
pub use request_id::{handle_request_id, REQUEST_ID_HEADER};

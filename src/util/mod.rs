pub mod ids;

pub use ids::{base64url_encode, new_opaque_token, new_uuid, now_ms};

pub mod jwt;

pub use jwt::{extract_bearer_token, validate_jwt_and_extract_user};

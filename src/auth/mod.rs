pub mod store;
pub mod token;

pub use store::{TokenStore, YamlTokenStore};
pub use token::{HttpTokenEndpoint, TokenEndpoint, TokenGrant, TokenManager, TokenState};

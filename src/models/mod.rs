pub mod client;

pub use client::{hash_client_secret, ClientLookup, DieselClientLookup, NewOAuthClient, OAuthClient};

//! Guest identity: token minting and the cookies that carry it

pub mod client;
pub mod cookies;
pub mod token_provider;

pub use client::{AuthServiceClient, GuestToken, GuestTokenIssuer};
pub use token_provider::{AuthTokenProvider, ResolvedToken, TokenData};

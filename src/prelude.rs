//! Convenience re-exports for common use.

pub use crate::config::ClientConfig;
pub use crate::error::{OAuthError, Result};
pub use crate::flow::{
    AuthorizationCodeFlow, AuthorizationResponse, DeviceAuthorizationFlow,
    DeviceAuthorizationSession, DevicePollState, OAuthFlow, PkceFlow,
};
pub use crate::http::{
    BodyEncoding, HttpTransport, Method, Params, Request, ReqwestTransport, Response,
    TransportConfig,
};
pub use crate::store::{FileSecretStore, MemorySecretStore, SecretStore};
pub use crate::token::TokenSet;

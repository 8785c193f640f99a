//! Roci OAuth: an OAuth 2.0 client engine
//!
//! Drives the Authorization Code, PKCE and Device Authorization grants,
//! persists the resulting tokens in a pluggable secret store, refreshes
//! them before they expire, and attaches them to outgoing requests.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use roci_oauth::prelude::*;
//!
//! # async fn example() -> roci_oauth::Result<()> {
//! let config = ClientConfig::from_env("MY_APP")?;
//! let flow = DeviceAuthorizationFlow::new(
//!     config,
//!     Arc::new(FileSecretStore::new_default()),
//!     Arc::new(ReqwestTransport::new(TransportConfig::default())?),
//! )?;
//!
//! if !flow.is_authorized()? {
//!     let session = flow.device_flow_authorization_request().await?;
//!     println!("Visit {} and enter {}", session.verification_uri, session.user_code);
//!     flow.authorization_response_handler(AuthorizationResponse::Device(session))
//!         .await?;
//! }
//!
//! let me = Request::builder().endpoint("https://api.example.com/me").build();
//! let response = flow.authenticated_request(me, 1).await?;
//! println!("{}", response.text()?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod flow;
pub mod http;
pub mod pkce;
pub mod prelude;
pub mod store;
pub mod token;
pub mod util;

pub use error::{OAuthError, Result};

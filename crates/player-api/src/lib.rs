//! Client library for the game's player API.
//!
//! Everything that touches the network lives here: request signing, the
//! provider/proxy failover, the two-tier captcha pipeline and the
//! [`PlayerDataClient`] that ties them together. Callers only ever see the
//! tagged [`PlayerResult`]; retry policy belongs to them.

pub mod captcha;
pub mod client;
pub mod error;
pub mod level;
pub mod provider;

pub use captcha::{CaptchaError, CaptchaOutcome, CaptchaPipeline, CaptchaPolicy, SolveTier};
pub use client::{
    FetchError, FetchErrorKind, PlayerDataClient, PlayerResult, PlayerSnapshot,
};
pub use error::ApiError;
pub use level::furnace_display;
pub use provider::{ProviderConfig, ProviderKind, ProviderMode, ProviderSelector};

mod builder;
mod models;
mod player;
pub mod sign;

pub use builder::{DEFAULT_UA, build_client, install_rustls_provider, normalize_proxy};
pub use models::{
    FetchError, FetchErrorKind, PlayerResult, PlayerSnapshot, ResponseClass, classify_player_response,
};
pub use player::{PlayerDataClient, decode_captcha_image};

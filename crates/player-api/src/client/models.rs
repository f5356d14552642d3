use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error codes the API uses when the player id does not exist.
const NOT_FOUND_ERR_CODE: i64 = 40004;
const NOT_FOUND_MSG: &str = "role not exist";
/// Error codes signalling that a captcha answer is required or was wrong.
const CAPTCHA_ERR_CODES: std::ops::RangeInclusive<i64> = 40100..=40103;

/// Externally sourced attributes of a player, as of one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: i64,
    pub nickname: String,
    pub furnace_level: i64,
    /// State (server) the player lives in.
    pub state_id: i64,
    /// Version marker of the furnace artwork, changes without a level change.
    pub furnace_content: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchErrorKind {
    Network,
    Captcha,
    NoProvider,
    Protocol,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::Captcha => "captcha",
            FetchErrorKind::NoProvider => "no provider",
            FetchErrorKind::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

/// Why a fetch produced no usable answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, message)
    }

    pub fn captcha(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Captcha, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Protocol, message)
    }

    pub fn no_provider() -> Self {
        Self::new(FetchErrorKind::NoProvider, "no provider available")
    }
}

/// Outcome of one player fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerResult {
    Success(PlayerSnapshot),
    RateLimited,
    /// Terminal: the id does not exist on the game server.
    NotFound,
    Error(FetchError),
}

impl PlayerResult {
    /// Whether the API answered without throttling.
    ///
    /// An `Error` never reached a verdict, so it is neither throttled nor accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, PlayerResult::Success(_) | PlayerResult::NotFound)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlayerResult::Success(_) => "success",
            PlayerResult::RateLimited => "rate_limited",
            PlayerResult::NotFound => "not_found",
            PlayerResult::Error(_) => "error",
        }
    }
}

/// Classification of a single `/player` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseClass {
    Player(PlayerSnapshot),
    NotFound,
    CaptchaRequired,
    RateLimited,
    Unexpected(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    err_code: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PlayerData {
    nickname: String,
    kid: i64,
    stove_lv: i64,
    #[serde(default)]
    stove_lv_content: Option<Value>,
    #[serde(default)]
    avatar_image: Option<String>,
}

/// Interpret a JSON number or numeric string as an integer.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn content_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Classify the raw `/player` response for `player_id`.
pub fn classify_player_response(player_id: i64, status: u16, body: &str) -> ResponseClass {
    if status == 429 {
        return ResponseClass::RateLimited;
    }

    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) => {
            return ResponseClass::Unexpected(format!("HTTP {status}: response is not JSON"));
        }
    };

    let code = envelope.code.as_ref().and_then(as_int);
    let err_code = envelope.err_code.as_ref().and_then(as_int);
    let msg = envelope.msg.unwrap_or_default();

    if code == Some(0)
        && let Some(data) = envelope.data
    {
        return match serde_json::from_value::<PlayerData>(data) {
            Ok(data) => ResponseClass::Player(PlayerSnapshot {
                player_id,
                nickname: data.nickname,
                furnace_level: data.stove_lv,
                state_id: data.kid,
                furnace_content: data.stove_lv_content.and_then(content_string),
                avatar_url: data.avatar_image,
            }),
            Err(e) => ResponseClass::Unexpected(format!("malformed player data: {e}")),
        };
    }

    if err_code == Some(NOT_FOUND_ERR_CODE) || msg.to_lowercase().contains(NOT_FOUND_MSG) {
        return ResponseClass::NotFound;
    }

    if err_code.is_some_and(|c| CAPTCHA_ERR_CODES.contains(&c))
        || msg.to_uppercase().contains("CAPTCHA")
    {
        return ResponseClass::CaptchaRequired;
    }

    ResponseClass::Unexpected(format!(
        "HTTP {status}: code={code:?} err_code={err_code:?} msg={msg:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        let body = r#"{"code":0,"msg":"success","err_code":"","data":{"fid":42,"nickname":"Frost","kid":245,"stove_lv":51,"stove_lv_content":"https://cdn/lv51.png","avatar_image":"https://cdn/a.png"}}"#;
        match classify_player_response(42, 200, body) {
            ResponseClass::Player(snapshot) => {
                assert_eq!(snapshot.player_id, 42);
                assert_eq!(snapshot.nickname, "Frost");
                assert_eq!(snapshot.furnace_level, 51);
                assert_eq!(snapshot.state_id, 245);
                assert_eq!(snapshot.furnace_content.as_deref(), Some("https://cdn/lv51.png"));
            }
            other => panic!("expected player, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_numeric_content() {
        let body = r#"{"code":0,"data":{"nickname":"a","kid":1,"stove_lv":10,"stove_lv_content":7}}"#;
        let ResponseClass::Player(snapshot) = classify_player_response(1, 200, body) else {
            panic!("expected player");
        };
        assert_eq!(snapshot.furnace_content.as_deref(), Some("7"));
        assert_eq!(snapshot.avatar_url, None);
    }

    #[test]
    fn test_classify_rate_limited() {
        assert_eq!(
            classify_player_response(1, 429, "Too Many Requests"),
            ResponseClass::RateLimited
        );
    }

    #[test]
    fn test_classify_not_found() {
        let by_code = r#"{"code":1,"msg":"role not exist.","err_code":40004,"data":[]}"#;
        assert_eq!(classify_player_response(42, 200, by_code), ResponseClass::NotFound);

        let by_string_code = r#"{"code":1,"msg":"","err_code":"40004"}"#;
        assert_eq!(
            classify_player_response(42, 200, by_string_code),
            ResponseClass::NotFound
        );

        let by_msg = r#"{"code":1,"msg":"ROLE NOT EXIST"}"#;
        assert_eq!(classify_player_response(42, 200, by_msg), ResponseClass::NotFound);
    }

    #[test]
    fn test_classify_captcha() {
        let by_code = r#"{"code":1,"msg":"","err_code":40101}"#;
        assert_eq!(
            classify_player_response(1, 200, by_code),
            ResponseClass::CaptchaRequired
        );

        let by_msg = r#"{"code":1,"msg":"CAPTCHA CHECK ERROR.","err_code":""}"#;
        assert_eq!(
            classify_player_response(1, 200, by_msg),
            ResponseClass::CaptchaRequired
        );
    }

    #[test]
    fn test_classify_unexpected() {
        assert!(matches!(
            classify_player_response(1, 502, "<html>bad gateway</html>"),
            ResponseClass::Unexpected(_)
        ));
        assert!(matches!(
            classify_player_response(1, 200, r#"{"code":1,"msg":"TIMEOUT RETRY."}"#),
            ResponseClass::Unexpected(_)
        ));
        assert!(matches!(
            classify_player_response(1, 200, r#"{"code":0,"data":{"nickname":"x"}}"#),
            ResponseClass::Unexpected(_)
        ));
    }

    #[test]
    fn test_player_result_acceptance() {
        assert!(PlayerResult::NotFound.is_accepted());
        assert!(!PlayerResult::RateLimited.is_accepted());
        assert!(!PlayerResult::Error(FetchError::no_provider()).is_accepted());
        assert_eq!(
            FetchError::no_provider().to_string(),
            "no provider error: no provider available"
        );
    }
}

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{debug, warn};

use super::models::{
    FetchError, PlayerResult, ResponseClass, classify_player_response,
};
use super::sign;
use crate::captcha::{CaptchaOutcome, CaptchaPipeline};
use crate::error::ApiError;
use crate::provider::{ProviderMode, ProviderSelector, Route};

#[derive(Debug, Deserialize)]
struct CaptchaEnvelope {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<CaptchaData>,
}

#[derive(Debug, Deserialize)]
struct CaptchaData {
    img: String,
}

enum Challenge {
    Image(Vec<u8>),
    RateLimited,
}

/// Decode a challenge image given as a `data:` URL or bare base64.
pub fn decode_captcha_image(img: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match img.split_once("base64,") {
        Some((_, payload)) => payload,
        None => img,
    };
    Ok(STANDARD.decode(payload.trim())?)
}

/// Fetches player data, answering captcha challenges on the way.
///
/// The client only classifies what happened. It never waits out a
/// throttle or retries a failed lookup; that is the caller's decision.
pub struct PlayerDataClient {
    selector: ProviderSelector,
    captcha: CaptchaPipeline,
    secret: String,
}

impl PlayerDataClient {
    pub fn new(selector: ProviderSelector, captcha: CaptchaPipeline, secret: impl Into<String>) -> Self {
        Self {
            selector,
            captcha,
            secret: secret.into(),
        }
    }

    pub async fn probe(&mut self) -> &ProviderMode {
        self.selector.probe().await
    }

    pub fn provider_mode(&self) -> &ProviderMode {
        self.selector.mode()
    }

    pub fn active_description(&self) -> String {
        self.selector.active_description()
    }

    pub fn captcha(&self) -> &CaptchaPipeline {
        &self.captcha
    }

    /// Look up one player, optionally through a specific proxy.
    pub async fn fetch_player(&self, player_id: i64, proxy: Option<&str>) -> PlayerResult {
        let route = match self.selector.route_for(proxy) {
            Ok(route) => route,
            Err(e) => return PlayerResult::Error(e),
        };

        match self.request_player(&route, player_id, None).await {
            Ok(ResponseClass::CaptchaRequired) => self.answer_challenge(&route, player_id).await,
            Ok(class) => into_result(class),
            Err(e) => {
                debug!(player_id, error = %e, "Player request failed");
                PlayerResult::Error(FetchError::network(e.to_string()))
            }
        }
    }

    async fn request_player(
        &self,
        route: &Route,
        player_id: i64,
        captcha_code: Option<&str>,
    ) -> Result<ResponseClass, ApiError> {
        let mut fields = vec![("fid", player_id.to_string())];
        if let Some(code) = captcha_code {
            fields.push(("captcha_code", code.to_string()));
        }
        let form = sign::signed_form(fields, &self.secret);

        let response = route
            .client
            .post(route.endpoint("player"))
            .form(&form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(classify_player_response(player_id, status, &body))
    }

    async fn fetch_challenge(&self, route: &Route, player_id: i64) -> Result<Challenge, ApiError> {
        let form = sign::signed_form(
            vec![("fid", player_id.to_string()), ("init", "0".to_string())],
            &self.secret,
        );

        let response = route
            .client
            .post(route.endpoint("captcha"))
            .form(&form)
            .send()
            .await?;
        if response.status().as_u16() == 429 {
            return Ok(Challenge::RateLimited);
        }

        let envelope: CaptchaEnvelope = serde_json::from_str(&response.text().await?)?;
        let code = envelope.code.as_ref().and_then(|c| c.as_i64());
        match envelope.data {
            Some(data) if code == Some(0) => Ok(Challenge::Image(decode_captcha_image(&data.img)?)),
            _ => Err(ApiError::Other(format!(
                "no challenge image: code={code:?} msg={:?}",
                envelope.msg.unwrap_or_default()
            ))),
        }
    }

    /// Solve the challenge for `player_id` and resubmit once with the answer.
    async fn answer_challenge(&self, route: &Route, player_id: i64) -> PlayerResult {
        let image = match self.fetch_challenge(route, player_id).await {
            Ok(Challenge::Image(image)) => image,
            Ok(Challenge::RateLimited) => return PlayerResult::RateLimited,
            Err(e) => {
                return PlayerResult::Error(FetchError::captcha(format!(
                    "failed to load challenge: {e}"
                )));
            }
        };

        let text = match self.captcha.solve(&image).await {
            CaptchaOutcome::Solved { text, tier } => {
                debug!(player_id, ?tier, "Captcha solved");
                text
            }
            CaptchaOutcome::Failed { reason } => {
                return PlayerResult::Error(FetchError::captcha(reason));
            }
        };

        match self.request_player(route, player_id, Some(&text)).await {
            Ok(ResponseClass::CaptchaRequired) => {
                warn!(player_id, "Captcha answer rejected");
                PlayerResult::Error(FetchError::captcha("captcha answer rejected"))
            }
            Ok(class) => into_result(class),
            Err(e) => PlayerResult::Error(FetchError::network(e.to_string())),
        }
    }
}

fn into_result(class: ResponseClass) -> PlayerResult {
    match class {
        ResponseClass::Player(snapshot) => PlayerResult::Success(snapshot),
        ResponseClass::NotFound => PlayerResult::NotFound,
        ResponseClass::RateLimited => PlayerResult::RateLimited,
        ResponseClass::CaptchaRequired => {
            PlayerResult::Error(FetchError::captcha("unexpected captcha challenge"))
        }
        ResponseClass::Unexpected(message) => PlayerResult::Error(FetchError::protocol(message)),
    }
}

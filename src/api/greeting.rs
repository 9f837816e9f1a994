#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use poem::Request;
use poem_openapi::{ OpenApi, payload::Json, Object };
use serde::Deserialize;

use crate::utils::errors::Errors;
use crate::utils::server_utils::{self, timestamp_local, timestamp_local_to_str};

// Every message starts with this text.
pub const GREETING_PREFIX: &str = "Hello from CI/CD with ";

// ***************************************************************************
//                                 Variants
// ***************************************************************************
/** The deployment pipeline named in the greeting.  The text is cosmetic and
 * only changes the literal wording of the message.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GreetingVariant {
    #[default]
    #[serde(rename = "argocd")]
    ArgoCd,
    PullRequest,
}

impl GreetingVariant {
    pub fn mechanism(&self) -> &'static str {
        match self {
            GreetingVariant::ArgoCd => "ArgoCD",
            GreetingVariant::PullRequest => "Pull Request",
        }
    }

    /// Text between the mechanism and the timestamp, separator included.
    pub fn qualifier(&self) -> &'static str {
        match self {
            GreetingVariant::ArgoCd => "Updated at ",
            GreetingVariant::PullRequest => "Current time: ",
        }
    }
}

impl FromStr for GreetingVariant {
    type Err = Errors;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "argocd" => Ok(GreetingVariant::ArgoCd),
            "pull_request" | "pull-request" => Ok(GreetingVariant::PullRequest),
            _ => Err(Errors::UnknownVariant(s.to_string())),
        }
    }
}

impl fmt::Display for GreetingVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GreetingVariant::ArgoCd => write!(f, "argocd"),
            GreetingVariant::PullRequest => write!(f, "pull_request"),
        }
    }
}

// ***************************************************************************
//                              Greeting Service
// ***************************************************************************
/** Builds greeting messages.  Holds no mutable state, so a single instance
 * serves any number of concurrent requests.
 */
#[derive(Debug, Clone, Copy)]
pub struct GreetingService {
    variant: GreetingVariant,
}

impl GreetingService {
    pub fn new(variant: GreetingVariant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> GreetingVariant {
        self.variant
    }

    /// Message stamped with the given wall-clock time.
    pub fn message_at(&self, ts: NaiveDateTime) -> String {
        format!("{}{}! {}{}",
                GREETING_PREFIX,
                self.variant.mechanism(),
                self.variant.qualifier(),
                timestamp_local_to_str(ts))
    }

    /// Message stamped with the host's current time.
    pub fn message(&self) -> String {
        self.message_at(timestamp_local())
    }
}

// ***************************************************************************
//                          Request/Response Definiions
// ***************************************************************************
pub struct GreetingApi {
    service: GreetingService,
}

impl GreetingApi {
    pub fn new(service: GreetingService) -> Self {
        Self { service }
    }
}

#[derive(Object, Debug)]
pub struct RespGreeting
{
    message: String,
}

// ***************************************************************************
//                             OpenAPI Endpoint
// ***************************************************************************
#[OpenApi]
impl GreetingApi {
    #[oai(path = "/", method = "get")]
    async fn get_greeting(&self, http_req: &Request) -> Json<RespGreeting> {
        // Conditional logging depending on log level.
        server_utils::debug_request(http_req);

        Json(RespGreeting::new(self.service.message()))
    }
}

// ***************************************************************************
//                          Request/Response Methods
// ***************************************************************************
impl RespGreeting {
    fn new(message: String) -> Self {
        Self { message }
    }
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use poem::test::TestClient;
    use poem_openapi::OpenApiService;
    use serde_json::Value;

    use crate::utils::server_utils::timestamp_str_to_local;

    fn fixed_clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn client(variant: GreetingVariant) -> TestClient<poem::Route> {
        let api = OpenApiService::new(GreetingApi::new(GreetingService::new(variant)),
                                      "Greeting Server", "test");
        TestClient::new(poem::Route::new().nest("/", api))
    }

    async fn get_message(cli: &TestClient<poem::Route>) -> String {
        let resp = cli.get("/").send().await;
        resp.assert_status_is_ok();
        let body = resp.0.into_body().into_string().await.unwrap();
        let value: Value = serde_json::from_str(&body).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 1);
        object["message"].as_str().unwrap().to_string()
    }

    #[test]
    fn argocd_message_at_fixed_clock() {
        let service = GreetingService::new(GreetingVariant::ArgoCd);
        assert_eq!(service.message_at(fixed_clock()),
                   "Hello from CI/CD with ArgoCD! Updated at 2024-01-01 12:00:00");
    }

    #[test]
    fn argocd_message_has_no_colon_before_timestamp() {
        let message = GreetingService::new(GreetingVariant::ArgoCd).message_at(fixed_clock());
        assert!(!message.contains("Updated at:"));
        assert!(message.ends_with("Updated at 2024-01-01 12:00:00"));
    }

    #[test]
    fn pull_request_message_at_fixed_clock() {
        let service = GreetingService::new(GreetingVariant::PullRequest);
        assert_eq!(service.message_at(fixed_clock()),
                   "Hello from CI/CD with Pull Request! Current time: 2024-01-01 12:00:00");
    }

    #[test]
    fn different_instants_give_different_messages() {
        let service = GreetingService::new(GreetingVariant::ArgoCd);
        let later = fixed_clock() + Duration::seconds(1);
        assert_ne!(service.message_at(fixed_clock()), service.message_at(later));
    }

    #[test]
    fn variant_names_parse() {
        assert_eq!("argocd".parse::<GreetingVariant>().unwrap(), GreetingVariant::ArgoCd);
        assert_eq!("ArgoCD".parse::<GreetingVariant>().unwrap(), GreetingVariant::ArgoCd);
        assert_eq!("pull_request".parse::<GreetingVariant>().unwrap(), GreetingVariant::PullRequest);
        assert!("jenkins".parse::<GreetingVariant>().is_err());
        assert_eq!(GreetingVariant::PullRequest.to_string(), "pull_request");
    }

    #[tokio::test]
    async fn root_returns_timestamped_greeting() {
        let cli = client(GreetingVariant::ArgoCd);
        let before = timestamp_local();
        let message = get_message(&cli).await;
        let after = timestamp_local();

        let prefix = "Hello from CI/CD with ArgoCD! Updated at ";
        assert!(message.starts_with(GREETING_PREFIX));
        assert!(message.starts_with(prefix));

        let ts = timestamp_str_to_local(&message[prefix.len()..]).unwrap();
        assert!(ts >= before - Duration::seconds(2));
        assert!(ts <= after + Duration::seconds(2));
    }

    #[tokio::test]
    async fn root_uses_configured_variant() {
        let cli = client(GreetingVariant::PullRequest);
        let message = get_message(&cli).await;
        assert!(message.starts_with("Hello from CI/CD with Pull Request! Current time: "));
    }

    #[tokio::test]
    async fn query_parameters_are_ignored() {
        let cli = client(GreetingVariant::ArgoCd);
        let resp = cli.get("/").query("name", &"bob").send().await;
        resp.assert_status_is_ok();
    }

    #[tokio::test]
    async fn other_paths_are_not_found() {
        let cli = client(GreetingVariant::ArgoCd);
        let resp = cli.get("/hello").send().await;
        resp.assert_status(poem::http::StatusCode::NOT_FOUND);
    }
}

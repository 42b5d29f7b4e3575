//! Simulated authenticated session
//!
//! The timeline editor restores its PocketBase session from local storage on
//! load. Writing a record there (and mirroring it into a cookie for any
//! server-rendered checks) before a reload makes the page behave as if a user
//! had already signed in.

use serde::{Deserialize, Serialize};

use crate::error::VerifyResult;

/// Auth model stored alongside the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthModel {
    pub id: String,
    pub email: String,
}

/// The value persisted in client storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub token: String,
    pub model: AuthModel,
}

/// Where and what to inject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInjection {
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    pub record: AuthRecord,
}

fn default_storage_key() -> String {
    "pocketbase_auth".to_string()
}

fn default_cookie_name() -> String {
    "pb_auth".to_string()
}

impl AuthInjection {
    pub fn new(token: &str, user_id: &str, email: &str) -> Self {
        Self {
            storage_key: default_storage_key(),
            cookie_name: default_cookie_name(),
            record: AuthRecord {
                token: token.to_string(),
                model: AuthModel {
                    id: user_id.to_string(),
                    email: email.to_string(),
                },
            },
        }
    }

    /// Exact string stored under the storage key and in the cookie.
    pub fn stored_value(&self) -> VerifyResult<String> {
        Ok(serde_json::to_string(&self.record)?)
    }

    /// Argument object passed to the in-page injection function.
    pub fn page_argument(&self) -> serde_json::Value {
        serde_json::json!({
            "key": self.storage_key,
            "cookie": self.cookie_name,
            "record": self.record,
        })
    }
}

/// Page function run by `page.evaluate`; takes [`AuthInjection::page_argument`].
pub const INJECT_AUTH_JS: &str = r#"({ key, cookie, record }) => {
      const value = JSON.stringify(record);
      localStorage.setItem(key, value);
      document.cookie = cookie + "=" + value + "; path=/";
    }"#;

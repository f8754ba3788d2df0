//! Wire DTOs for MoSAPI responses.

pub mod metrica;
pub mod monitoring;

use serde::{Deserialize, Deserializer, Serialize};

/// MoSAPI error envelope returned on 4xx responses.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ErrorEnvelope {
    #[serde(rename = "resultCode", deserialize_with = "string_or_number")]
    pub result_code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub description: Option<String>,
}

// Some deployments emit resultCode as a JSON number, others as a string.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(i64),
        Text(String),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Number(n) => n.to_string(),
        Code::Text(s) => s,
    })
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum RobotError {
    #[error("server not found")]
    NotFound,
    /// The webservice is throttling this account. The reconciler entry
    /// point converts this into a global backoff.
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    /// A key with the same fingerprint is already registered under a
    /// different name. Configuration error; an operator has to resolve it.
    #[error("ssh key already exists: {0}")]
    KeyAlreadyExists(String),
    /// The requested boot configuration is already active.
    #[error("target already defined: {0}")]
    TargetAlreadyDefined(String),
    #[error("robot API returned {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("robot transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected robot response: {0}")]
    Decode(String),
}

impl RobotError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RobotError::NotFound)
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, RobotError::RateLimitExceeded(_))
    }

    /// Classifies an error envelope returned by the webservice.
    pub(crate) fn from_envelope(status: u16, body: &str) -> RobotError {
        let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
            return RobotError::Api {
                status,
                code: "UNPARSEABLE".to_string(),
                message: body.to_string(),
            };
        };
        let error = envelope.error;
        match error.code.as_str() {
            "SERVER_NOT_FOUND" | "NOT_FOUND" => RobotError::NotFound,
            "RATE_LIMIT_EXCEEDED" => RobotError::RateLimitExceeded(error.message),
            "KEY_ALREADY_EXISTS" => RobotError::KeyAlreadyExists(error.message),
            "BOOT_ALREADY_ENABLED" | "CONFLICT" => {
                RobotError::TargetAlreadyDefined(error.message)
            }
            _ => RobotError::Api {
                status: error.status,
                code: error.code,
                message: error.message,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    status: u16,
    code: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_error_codes() {
        let not_found = RobotError::from_envelope(
            404,
            r#"{"error":{"status":404,"code":"SERVER_NOT_FOUND","message":"server not found"}}"#,
        );
        assert!(not_found.is_not_found());

        let throttled = RobotError::from_envelope(
            403,
            r#"{"error":{"status":403,"code":"RATE_LIMIT_EXCEEDED","message":"rate limit exceeded"}}"#,
        );
        assert!(throttled.is_rate_limit());

        let duplicate = RobotError::from_envelope(
            409,
            r#"{"error":{"status":409,"code":"KEY_ALREADY_EXISTS","message":"key already exists"}}"#,
        );
        assert!(matches!(duplicate, RobotError::KeyAlreadyExists(_)));
    }

    #[test]
    fn unparseable_bodies_keep_the_http_status() {
        let error = RobotError::from_envelope(500, "<html>oops</html>");
        assert!(matches!(
            error,
            RobotError::Api { status: 500, .. }
        ));
    }
}

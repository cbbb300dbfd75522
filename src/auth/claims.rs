use serde::{Deserialize, Serialize};

use crate::{auth::jwt::TokenError, users::repo_types::UserId};

/// JWT payload used for authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,      // user ID, decimal
    pub username: String,
    pub iss: String,      // issuer
    pub iat: i64,         // issued at (unix timestamp)
    pub exp: i64,         // expires at (unix timestamp)
}

impl Claims {
    pub fn user_id(&self) -> Result<UserId, TokenError> {
        self.sub
            .parse()
            .map_err(|_| TokenError::Malformed(format!("subject {:?} is not a user id", self.sub)))
    }
}

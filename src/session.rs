use axum::http::HeaderMap;

#[derive(Clone, Debug)]
pub struct BearerToken {
    pub token: String,
}

impl BearerToken {
    pub fn new(token: String) -> Self {
        Self { token }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let auth = headers
            .get(axum::http::header::AUTHORIZATION)?
            .to_str()
            .ok()?;
        let token = auth.strip_prefix("Bearer ")?.trim();
        if token.is_empty() {
            return None;
        }
        Some(Self {
            token: token.to_string(),
        })
    }
}

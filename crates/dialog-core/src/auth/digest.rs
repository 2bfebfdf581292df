use std::fmt::Write;

use md5::Digest;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::errors::{DialogError, DialogResult};

/// A parsed `WWW-Authenticate` / `Proxy-Authenticate` Digest challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: String,
    /// Offered qop values, lower-cased
    pub qop: Vec<String>,
    pub stale: bool,
}

/// Values that go into one `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResponse {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub algorithm: String,
    pub opaque: Option<String>,
    /// `(cnonce, nc)` when `qop=auth` is used
    pub qop_auth: Option<(String, u32)>,
}

impl DigestChallenge {
    pub fn parse(input: &str) -> DialogResult<Self> {
        let input = input.trim();
        let (scheme, params) = input
            .split_once(char::is_whitespace)
            .ok_or_else(|| DialogError::authentication_error("challenge has no parameters"))?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return Err(DialogError::authentication_error(format!("unsupported scheme {scheme}")));
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = "MD5".to_string();
        let mut qop = Vec::new();
        let mut stale = false;

        for param in split_params(params) {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = value,
                "qop" => {
                    qop = value
                        .split(',')
                        .map(|q| q.trim().to_ascii_lowercase())
                        .filter(|q| !q.is_empty())
                        .collect()
                }
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if !algorithm.eq_ignore_ascii_case("MD5") {
            return Err(DialogError::authentication_error(format!("unsupported algorithm {algorithm}")));
        }
        if !qop.is_empty() && !qop.iter().any(|q| q == "auth") {
            return Err(DialogError::authentication_error("challenge offers no qop=auth"));
        }

        Ok(Self {
            realm: realm.ok_or_else(|| DialogError::authentication_error("challenge has no realm"))?,
            nonce: nonce.ok_or_else(|| DialogError::authentication_error("challenge has no nonce"))?,
            opaque,
            algorithm,
            qop,
            stale,
        })
    }

    /// Computes the response for `method` and `uri`. With `qop=auth` a
    /// fresh cnonce is generated and `nonce_count` is used as `nc`.
    pub fn respond(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        nonce_count: u32,
    ) -> DigestResponse {
        let qop_auth = (!self.qop.is_empty()).then(|| (cnonce(), nonce_count));
        self.respond_with(username, password, method, uri, qop_auth)
    }

    fn respond_with(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        qop_auth: Option<(String, u32)>,
    ) -> DigestResponse {
        let ha1 = md5_hex(&format!("{username}:{}:{password}", self.realm));
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let response = match &qop_auth {
            Some((cnonce, nc)) => md5_hex(&format!("{ha1}:{}:{nc:08x}:{cnonce}:auth:{ha2}", self.nonce)),
            None => md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce)),
        };
        DigestResponse {
            username: username.to_string(),
            realm: self.realm.clone(),
            nonce: self.nonce.clone(),
            uri: uri.to_string(),
            response,
            algorithm: self.algorithm.clone(),
            opaque: self.opaque.clone(),
            qop_auth,
        }
    }
}

impl DigestResponse {
    /// Value for `Authorization` or `Proxy-Authorization`
    pub fn header_value(&self) -> String {
        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            self.username, self.realm, self.nonce, self.uri, self.response, self.algorithm
        );
        if let Some(opaque) = &self.opaque {
            let _ = write!(value, ", opaque=\"{opaque}\"");
        }
        if let Some((cnonce, nc)) = &self.qop_auth {
            let _ = write!(value, ", qop=auth, cnonce=\"{cnonce}\", nc={nc:08x}");
        }
        value
    }
}

/// Splits on commas outside quoted strings.
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

fn cnonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

fn md5_hex(data: &str) -> String {
    let digest = md5::Md5::digest(data.as_bytes());
    let mut out = String::with_capacity(32);
    for b in digest.iter() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC2617: &str = r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#;

    #[test]
    fn test_parses_quoted_lists() {
        let challenge = DigestChallenge::parse(RFC2617).unwrap();
        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(challenge.qop, vec!["auth".to_string(), "auth-int".to_string()]);
        assert_eq!(challenge.opaque.as_deref(), Some("5ccc069c403ebaf9f0171e9517f40e41"));
        assert!(!challenge.stale);
    }

    #[test]
    fn test_response_without_qop_matches_reference() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", algorithm=MD5"#,
        )
        .unwrap();
        let response = challenge.respond("Mufasa", "Circle Of Life", "GET", "/dir/index.html", 1);
        assert_eq!(response.response, "670fd8c2df070c60b045671b8b24ff02");
        assert!(response.qop_auth.is_none());
    }

    #[test]
    fn test_response_with_qop_auth_matches_rfc2617() {
        let challenge = DigestChallenge::parse(RFC2617).unwrap();
        let response = challenge.respond_with(
            "Mufasa",
            "Circle Of Life",
            "GET",
            "/dir/index.html",
            Some(("0a4f113b".to_string(), 1)),
        );
        assert_eq!(response.response, "6629fae49393a05397450978507c4ef1");
        let header = response.header_value();
        assert!(header.contains("nc=00000001"), "{header}");
        assert!(header.contains("cnonce=\"0a4f113b\""), "{header}");
        assert!(header.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""), "{header}");
    }

    #[test]
    fn test_stale_flag_and_rejections() {
        let challenge =
            DigestChallenge::parse(r#"Digest realm="atlanta.example.com", nonce="abc", stale=TRUE"#).unwrap();
        assert!(challenge.stale);

        assert!(DigestChallenge::parse(r#"Basic realm="x""#).is_err());
        assert!(DigestChallenge::parse(r#"Digest realm="x""#).is_err());
        assert!(DigestChallenge::parse(r#"Digest realm="x", nonce="n", algorithm=SHA-256"#).is_err());
    }
}

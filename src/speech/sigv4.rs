//! AWS Signature Version 4 request signing for the Polly REST API.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Result, SpeechError};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// The parts of an HTTP request that go into the signature.
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    /// Canonical query string: sorted by key and URI-encoded.
    pub query: &'a str,
    pub content_type: Option<&'a str>,
    pub payload: &'a [u8],
}

pub struct Signer<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

impl Signer<'_> {
    /// `Authorization` header value for `request` sent at `amz_date`
    /// (`YYYYMMDDTHHMMSSZ`).
    pub fn authorization(&self, request: &SignedRequest<'_>, amz_date: &str) -> Result<String> {
        let date = amz_date.get(..8).ok_or_else(|| {
            SpeechError::Validation(format!("malformed request date: {amz_date}"))
        })?;
        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);

        let mut headers = String::new();
        let mut signed = Vec::new();
        if let Some(content_type) = request.content_type {
            headers.push_str(&format!("content-type:{content_type}\n"));
            signed.push("content-type");
        }
        headers.push_str(&format!("host:{}\nx-amz-date:{amz_date}\n", request.host));
        signed.extend(["host", "x-amz-date"]);
        let signed = signed.join(";");

        let canonical = format!(
            "{}\n{}\n{}\n{headers}\n{signed}\n{:x}",
            request.method,
            request.path,
            request.query,
            Sha256::digest(request.payload)
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{:x}",
            Sha256::digest(canonical.as_bytes())
        );

        let key = self.signing_key(date)?;
        let signature = hex(&hmac(&key, &string_to_sign)?);
        Ok(format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed}, Signature={signature}",
            self.access_key
        ))
    }

    fn signing_key(&self, date: &str) -> Result<Vec<u8>> {
        let k_date = hmac(format!("AWS4{}", self.secret_key).as_bytes(), date)?;
        let k_region = hmac(&k_date, self.region)?;
        let k_service = hmac(&k_region, self.service)?;
        hmac(&k_service, "aws4_request")
    }
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| SpeechError::Validation(format!("signing key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn signer(service: &str) -> Signer<'_> {
        Signer {
            access_key: "AKIDEXAMPLE",
            secret_key: SECRET,
            region: "us-east-1",
            service,
        }
    }

    #[test]
    fn signing_key_matches_published_example() {
        let key = signer("iam").signing_key("20150830").unwrap();
        assert_eq!(
            hex(&key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn signature_matches_published_example() {
        let request = SignedRequest {
            method: "GET",
            host: "iam.amazonaws.com",
            path: "/",
            query: "Action=ListUsers&Version=2010-05-08",
            content_type: Some("application/x-www-form-urlencoded; charset=utf-8"),
            payload: b"",
        };
        let header = signer("iam").authorization(&request, "20150830T123600Z").unwrap();
        assert_eq!(
            header,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date, \
             Signature=5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
    }

    #[test]
    fn requests_without_a_body_type_sign_fewer_headers() {
        let request = SignedRequest {
            method: "GET",
            host: "polly.us-east-1.amazonaws.com",
            path: "/v1/voices",
            query: "Engine=neural",
            content_type: None,
            payload: b"",
        };
        let header = signer("polly").authorization(&request, "20240101T000000Z").unwrap();
        assert!(header.contains("SignedHeaders=host;x-amz-date,"), "{header}");
        assert!(header.contains("/20240101/us-east-1/polly/aws4_request"), "{header}");
    }

    #[test]
    fn short_date_is_rejected() {
        let request = SignedRequest {
            method: "GET",
            host: "h",
            path: "/",
            query: "",
            content_type: None,
            payload: b"",
        };
        assert!(signer("polly").authorization(&request, "2024").is_err());
    }
}

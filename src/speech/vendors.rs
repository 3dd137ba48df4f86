//! HTTP clients for the networked speech vendors.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::network::{classify_status, classify_transport, REQUEST_TIMEOUT};
use super::sigv4::{SignedRequest, Signer};
use super::{Credentials, ProviderKind, Voice, VendorClient};
use crate::error::{Result, SpeechError};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";
pub const WELLSAID_BASE_URL: &str = "https://api.wellsaidlabs.com";
pub const POLLY_DEFAULT_REGION: &str = "us-east-1";

const OPENAI_VOICES: &[(&str, &str)] = &[
    ("alloy", "Alloy (English)"),
    ("echo", "Echo (English)"),
    ("fable", "Fable (English)"),
    ("onyx", "Onyx (English)"),
    ("nova", "Nova (English)"),
    ("shimmer", "Shimmer (English)"),
];

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| SpeechError::ServiceUnavailable(format!("HTTP client: {e}")))
}

fn required(value: &Option<String>, what: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(SpeechError::Validation(format!("{what} is required"))),
    }
}

/// Send a request and turn non-2xx responses into classified errors.
async fn send(request: RequestBuilder) -> Result<Response> {
    let resp = request.send().await.map_err(classify_transport)?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    debug!("Vendor returned {status}: {body}");
    Err(classify_status(status, &body))
}

async fn audio_bytes(resp: Response) -> Result<Vec<u8>> {
    let bytes = resp.bytes().await.map_err(classify_transport)?;
    Ok(bytes.to_vec())
}

// --- OpenAI ---

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            api_key: required(&credentials.api_key, "API key")?,
            base_url: OPENAI_BASE_URL.to_string(),
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl VendorClient for OpenAiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    /// OpenAI has a fixed voice set; the models call only checks the key.
    async fn voices(&self) -> Result<Vec<Voice>> {
        let url = format!("{}/v1/models", self.base_url);
        send(self.client.get(url).bearer_auth(&self.api_key)).await?;

        Ok(OPENAI_VOICES
            .iter()
            .map(|(id, name)| Voice::new(*id, *name, Some("en-US")))
            .collect())
    }

    async fn synthesize_audio(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/audio/speech", self.base_url);
        let body = json!({
            "model": "tts-1",
            "input": text,
            "voice": voice_id,
            "response_format": "mp3",
        });
        let resp = send(self.client.post(url).bearer_auth(&self.api_key).json(&body)).await?;
        audio_bytes(resp).await
    }
}

// --- ElevenLabs ---

#[derive(Deserialize)]
struct ElevenLabsVoices {
    voices: Vec<ElevenLabsVoice>,
}

#[derive(Deserialize)]
struct ElevenLabsVoice {
    voice_id: String,
    name: String,
}

pub struct ElevenLabsClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl ElevenLabsClient {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            api_key: required(&credentials.api_key, "API key")?,
            base_url: ELEVENLABS_BASE_URL.to_string(),
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl VendorClient for ElevenLabsClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ElevenLabs
    }

    async fn voices(&self) -> Result<Vec<Voice>> {
        let url = format!("{}/v1/voices", self.base_url);
        let resp = send(
            self.client
                .get(url)
                .header("Accept", "application/json")
                .header("xi-api-key", &self.api_key),
        )
        .await?;

        let data: ElevenLabsVoices = resp
            .json()
            .await
            .map_err(|e| SpeechError::ServiceUnavailable(format!("invalid voice list: {e}")))?;

        let mut voices: Vec<Voice> = data
            .voices
            .into_iter()
            .map(|v| Voice::new(v.voice_id, v.name, Some("en-US")))
            .collect();
        voices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(voices)
    }

    async fn synthesize_audio(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/text-to-speech/{voice_id}", self.base_url);
        let body = json!({
            "text": text,
            "model_id": "eleven_monolingual_v1",
            "voice_settings": { "stability": 0.5, "similarity_boost": 0.75 },
        });
        let resp = send(
            self.client
                .post(url)
                .header("Accept", "audio/mpeg")
                .header("xi-api-key", &self.api_key)
                .json(&body),
        )
        .await?;
        audio_bytes(resp).await
    }
}

// --- Azure ---

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AzureVoice {
    short_name: String,
    display_name: String,
    locale: String,
    #[serde(default)]
    voice_type: String,
    #[serde(default)]
    status: String,
}

pub struct AzureClient {
    api_key: String,
    region: String,
    base_url: String,
    client: Client,
}

impl AzureClient {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        let api_key = required(&credentials.api_key, "API key")?;
        let region = required(&credentials.region, "Region")?;
        Ok(Self {
            base_url: format!("https://{region}.tts.speech.microsoft.com"),
            api_key,
            region,
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl VendorClient for AzureClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    async fn voices(&self) -> Result<Vec<Voice>> {
        let url = format!("{}/cognitiveservices/voices/list", self.base_url);
        let resp = send(
            self.client
                .get(url)
                .header("Ocp-Apim-Subscription-Key", &self.api_key),
        )
        .await?;

        let all: Vec<AzureVoice> = resp
            .json()
            .await
            .map_err(|e| SpeechError::ServiceUnavailable(format!("invalid voice list: {e}")))?;

        let mut voices: Vec<Voice> = all
            .into_iter()
            .filter(|v| v.voice_type == "Neural" && v.status != "Deprecated")
            .map(|v| Voice::new(v.short_name, v.display_name, Some(&v.locale)))
            .collect();
        if voices.is_empty() {
            return Err(SpeechError::ServiceUnavailable("no neural voices found".into()));
        }
        voices.sort_by(|a, b| a.locale.cmp(&b.locale).then_with(|| a.name.cmp(&b.name)));
        Ok(voices)
    }

    async fn synthesize_audio(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/cognitiveservices/v1", self.base_url);
        let lang = voice_id.splitn(3, '-').take(2).collect::<Vec<_>>().join("-");
        let ssml = format!(
            "<speak version='1.0' xml:lang='{lang}'><voice name='{}'>{}</voice></speak>",
            escape_xml(voice_id),
            escape_xml(text)
        );
        let resp = send(
            self.client
                .post(url)
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .header("Content-Type", "application/ssml+xml")
                .header("X-Microsoft-OutputFormat", "audio-24khz-96kbitrate-mono-mp3")
                .header("User-Agent", "metta-voice")
                .body(ssml),
        )
        .await?;
        audio_bytes(resp).await
    }
}

// --- WellSaid ---

#[derive(Deserialize)]
struct WellSaidSpeakers {
    speakers: Vec<WellSaidSpeaker>,
}

#[derive(Deserialize)]
struct WellSaidSpeaker {
    speaker_id: String,
    name: String,
    #[serde(default)]
    language: Option<String>,
}

pub struct WellSaidClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl WellSaidClient {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            api_key: required(&credentials.api_key, "API key")?,
            base_url: WELLSAID_BASE_URL.to_string(),
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl VendorClient for WellSaidClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WellSaid
    }

    async fn voices(&self) -> Result<Vec<Voice>> {
        let url = format!("{}/v1/speakers/list", self.base_url);
        let resp = send(
            self.client
                .get(url)
                .header("Accept", "application/json")
                .header("X-Api-Key", &self.api_key),
        )
        .await?;

        let data: WellSaidSpeakers = resp
            .json()
            .await
            .map_err(|e| SpeechError::ServiceUnavailable(format!("invalid speaker list: {e}")))?;

        let mut voices: Vec<Voice> = data
            .speakers
            .into_iter()
            .map(|s| {
                let locale = s.language.as_deref().unwrap_or("en-US");
                Voice::new(s.speaker_id, s.name, Some(locale))
            })
            .collect();
        voices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(voices)
    }

    async fn synthesize_audio(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/tts/stream", self.base_url);
        let body = json!({
            "text": text.trim(),
            "speaker_id": voice_id.trim(),
            "format": "mp3",
        });
        let resp = send(
            self.client
                .post(url)
                .header("Accept", "audio/mpeg")
                .header("X-Api-Key", &self.api_key)
                .json(&body),
        )
        .await?;
        audio_bytes(resp).await
    }
}

// --- Amazon Polly ---

const POLLY_VOICES_QUERY: &str = "Engine=neural&IncludeAdditionalLanguageCodes=true";

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PollyVoices {
    #[serde(default)]
    voices: Vec<PollyVoice>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PollyVoice {
    id: String,
    name: String,
    #[serde(default)]
    language_code: String,
    #[serde(default)]
    language_name: String,
    #[serde(default)]
    supported_engines: Vec<String>,
}

/// Polly over its REST API, signed with SigV4.
pub struct PollyClient {
    access_key: String,
    secret_key: String,
    region: String,
    base_url: String,
    client: Client,
}

impl PollyClient {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        let access_key = required(&credentials.access_key, "Access key ID")?;
        let secret_key = required(&credentials.secret_key, "Secret access key")?;
        if !valid_access_key(&access_key) || !valid_secret_key(&secret_key) {
            return Err(SpeechError::Validation(
                "Invalid credentials format. Access Key ID should be 20 characters and \
                 Secret Access Key should be 40 characters."
                    .into(),
            ));
        }
        let region = required(&credentials.region, "Region")
            .unwrap_or_else(|_| POLLY_DEFAULT_REGION.to_string());

        Ok(Self {
            base_url: format!("https://polly.{region}.amazonaws.com"),
            access_key,
            secret_key,
            region,
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn host(&self) -> &str {
        self.base_url
            .split_once("://")
            .map_or(self.base_url.as_str(), |(_, host)| host)
    }

    fn signed(&self, builder: RequestBuilder, request: &SignedRequest<'_>) -> Result<RequestBuilder> {
        let amz_date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let signer = Signer {
            access_key: &self.access_key,
            secret_key: &self.secret_key,
            region: &self.region,
            service: "polly",
        };
        let authorization = signer.authorization(request, &amz_date)?;
        Ok(builder
            .header("X-Amz-Date", amz_date)
            .header("Authorization", authorization))
    }
}

fn valid_access_key(key: &str) -> bool {
    key.len() == 20
        && key
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

fn valid_secret_key(key: &str) -> bool {
    key.len() == 40
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'+' | b'='))
}

#[async_trait]
impl VendorClient for PollyClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Polly
    }

    /// Neural voices only, across all languages.
    async fn voices(&self) -> Result<Vec<Voice>> {
        let path = "/v1/voices";
        let url = format!("{}{path}?{POLLY_VOICES_QUERY}", self.base_url);
        let request = SignedRequest {
            method: "GET",
            host: self.host(),
            path,
            query: POLLY_VOICES_QUERY,
            content_type: None,
            payload: b"",
        };
        let resp = send(self.signed(self.client.get(url), &request)?).await?;

        let data: PollyVoices = resp
            .json()
            .await
            .map_err(|e| SpeechError::ServiceUnavailable(format!("invalid voice list: {e}")))?;

        let mut voices: Vec<Voice> = data
            .voices
            .into_iter()
            .filter(|v| {
                !v.language_name.is_empty() && v.supported_engines.iter().any(|e| e == "neural")
            })
            .map(|v| Voice::new(v.id, v.name, Some(&v.language_code)))
            .collect();
        if voices.is_empty() {
            return Err(SpeechError::ServiceUnavailable("No voices available".into()));
        }
        voices.sort_by(|a, b| a.locale.cmp(&b.locale).then_with(|| a.name.cmp(&b.name)));
        Ok(voices)
    }

    async fn synthesize_audio(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let path = "/v1/speech";
        let url = format!("{}{path}", self.base_url);
        let body = serde_json::to_vec(&json!({
            "Engine": "neural",
            "OutputFormat": "mp3",
            "Text": text,
            "VoiceId": voice_id,
        }))
        .map_err(|e| SpeechError::Validation(format!("request body: {e}")))?;
        let content_type = "application/json";
        let request = SignedRequest {
            method: "POST",
            host: self.host(),
            path,
            query: "",
            content_type: Some(content_type),
            payload: &body,
        };
        let builder = self.signed(self.client.post(url), &request)?;
        let resp = send(builder.header("Content-Type", content_type).body(body)).await?;
        audio_bytes(resp).await
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

//! Discuz forum adapter.
//!
//! Implements the `ftb-core` ForumClient port over a Discuz-style board:
//! login form token extraction, seccode (captcha) detection and image
//! download, and the "newthread" guide listing. All HTML extraction lives
//! in [`parse`] as pure functions.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use reqwest::{cookie::Jar, header::HeaderMap, Url};

use ftb_core::{
    domain::{CaptchaPayload, CredentialBlob, Post},
    errors::Error,
    ports::{FetchError, ForumClient, LoginOutcome},
    Result,
};

pub mod parse;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";

pub struct DiscuzClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    base_url: String,
    username: String,
    password: String,
    // Snapshot of cookies seen on responses, exported as the credential blob.
    cookies: Mutex<HashMap<String, String>>,
    // idhash of the captcha currently shown to the operator, needed for the
    // seccode fields on resubmission.
    captcha_hash: Mutex<Option<String>>,
}

impl DiscuzClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(jar.clone())
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::External(format!("http client build: {e}")))?;

        Ok(Self {
            http,
            jar,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            cookies: Mutex::new(HashMap::new()),
            captcha_hash: Mutex::new(None),
        })
    }

    fn base_url_parsed(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| Error::External(format!("bad forum base url: {e}")))
    }

    fn remember_cookies(&self, headers: &HeaderMap) {
        let mut snapshot = self.cookies.lock().unwrap();
        for value in headers.get_all(reqwest::header::SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            let Some(pair) = raw.split(';').next() else { continue };
            let Some((name, val)) = pair.split_once('=') else { continue };
            snapshot.insert(name.trim().to_string(), val.trim().to_string());
        }
    }

    fn export_credentials(&self) -> Result<CredentialBlob> {
        let snapshot = self.cookies.lock().unwrap();
        Ok(CredentialBlob(serde_json::to_string(&*snapshot)?))
    }

    async fn get_page(&self, url: &str) -> Result<String> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::External(format!("forum request failed: {e}")))?;
        self.remember_cookies(resp.headers());
        resp.text()
            .await
            .map_err(|e| Error::External(format!("forum response unreadable: {e}")))
    }

    async fn fetch_captcha_image(&self, idhash: &str) -> Result<Vec<u8>> {
        let ts = chrono::Utc::now().timestamp_millis();
        let url = format!(
            "{}/misc.php?mod=seccode&update={ts}&idhash={idhash}",
            self.base_url
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::External(format!("captcha image request failed: {e}")))?;
        self.remember_cookies(resp.headers());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::External(format!("captcha image unreadable: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn fetch_thread_summary(&self, url: &str) -> Option<String> {
        match self.get_page(url).await {
            Ok(html) => parse::extract_first_post_text(&html),
            Err(e) => {
                tracing::debug!("thread summary fetch failed for {url}: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl ForumClient for DiscuzClient {
    async fn submit_login(&self, captcha_answer: Option<&str>) -> Result<LoginOutcome> {
        let login_url = format!("{}/member.php?mod=logging&action=login", self.base_url);
        let page = self.get_page(&login_url).await?;
        let form = parse::extract_login_form(&page)
            .ok_or_else(|| Error::External("login form not found on login page".to_string()))?;

        let mut fields: Vec<(&str, String)> = vec![
            ("formhash", form.formhash),
            ("referer", format!("{}/", self.base_url)),
            ("loginfield", "username".to_string()),
            ("username", self.username.clone()),
            ("password", self.password.clone()),
            ("questionid", "0".to_string()),
            ("answer", String::new()),
            ("cookietime", "2592000".to_string()),
        ];

        if let Some(answer) = captcha_answer {
            let idhash = self
                .captcha_hash
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::External("no captcha challenge in flight".to_string()))?;
            fields.push(("seccodehash", idhash));
            fields.push(("seccodeverify", answer.to_string()));
        }

        let submit_url = format!(
            "{}/member.php?mod=logging&action=login&loginsubmit=yes&loginhash={}&inajax=1",
            self.base_url, form.loginhash
        );
        let resp = self
            .http
            .post(&submit_url)
            .form(&fields)
            .send()
            .await
            .map_err(|e| Error::External(format!("login request failed: {e}")))?;
        self.remember_cookies(resp.headers());
        let body = resp
            .text()
            .await
            .map_err(|e| Error::External(format!("login response unreadable: {e}")))?;

        if parse::login_succeeded(&body, &self.base_url) {
            *self.captcha_hash.lock().unwrap() = None;
            tracing::debug!("discuz login accepted");
            return Ok(LoginOutcome::Success(self.export_credentials()?));
        }

        if let Some(idhash) = parse::captcha_idhash(&body).or(form.seccode_idhash) {
            *self.captcha_hash.lock().unwrap() = Some(idhash.clone());
            let image = self.fetch_captcha_image(&idhash).await?;
            return Ok(LoginOutcome::CaptchaRequired(CaptchaPayload {
                image,
                mime: "image/jpeg".to_string(),
            }));
        }

        Ok(LoginOutcome::Rejected(
            parse::error_message(&body)
                .unwrap_or_else(|| "username or password not accepted".to_string()),
        ))
    }

    async fn fetch_latest(&self, limit: usize) -> std::result::Result<Vec<Post>, FetchError> {
        let url = format!("{}/forum.php?mod=guide&view=newthread", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Other(format!("listing request failed: {e}")))?;
        self.remember_cookies(resp.headers());

        let final_url = resp.url().to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Other(format!("listing response unreadable: {e}")))?;

        if parse::looks_unauthenticated(&final_url, &body) {
            return Err(FetchError::Auth);
        }

        let mut posts = parse::parse_thread_listing(&body, &self.base_url, limit);
        if posts.is_empty() && !body.contains("normalthread_") {
            return Err(FetchError::Other(
                "listing page had no recognizable thread rows".to_string(),
            ));
        }

        // Listing rows carry no body text; pull a short excerpt from each
        // thread page, tolerating failures (the post still goes out).
        for post in posts.iter_mut() {
            if let Some(summary) = self.fetch_thread_summary(&post.url).await {
                post.summary = summary;
            }
        }

        Ok(posts)
    }

    async fn restore_credentials(&self, blob: &CredentialBlob) -> Result<()> {
        let cookies: HashMap<String, String> = serde_json::from_str(&blob.0)?;
        let base = self.base_url_parsed()?;
        for (name, value) in &cookies {
            self.jar.add_cookie_str(&format!("{name}={value}"), &base);
        }
        *self.cookies.lock().unwrap() = cookies;
        Ok(())
    }
}

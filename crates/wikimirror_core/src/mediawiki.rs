use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::api::{
    BotCredentials, FileUpload, LocalWriter, RemoteFile, RemotePage, RemoteReader, SiteInfo,
    SiteNamespace,
};
use crate::error::FetchError;
use crate::title::{NS_MAIN, Title};

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
}

/// Blocking Action API client. A logged-in instance is the bot session: the
/// cookie store keeps the login across every later write.
pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid MediaWiki API URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = api_pairs(params);
        self.apply_rate_limit(false);
        debug!(api = %self.config.api_url, "GET {}", describe_params(params));
        let response = self
            .client
            .get(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_api_response(response)
    }

    fn request_json_post(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let pairs = api_pairs(params);
        self.apply_rate_limit(is_write);
        debug!(api = %self.config.api_url, "POST {}", describe_params(params));
        let response = self
            .client
            .post(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .form(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_api_response(response)
    }

    fn request_multipart(&mut self, form: Form) -> Result<Value> {
        self.apply_rate_limit(true);
        debug!(api = %self.config.api_url, "POST multipart upload");
        let response = self
            .client
            .post(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .multipart(form)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_api_response(response)
    }

    fn download(&mut self, url: &str) -> Result<Vec<u8>> {
        self.apply_rate_limit(false);
        debug!(%url, "GET file payload");
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.config.user_agent.clone())
            .send()
            .with_context(|| format!("failed to download {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("file download failed with HTTP {status}: {url}");
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read file payload from {url}"))?;
        Ok(bytes.to_vec())
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    fn query_single_page(&mut self, params: Vec<(&str, String)>) -> Result<Option<PageQueryItem>> {
        let response = self.request_json_get(&params)?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode page query response")?;
        Ok(parsed.query.pages.into_iter().next())
    }

    fn query_revision(&mut self, title: &Title) -> Result<Option<(PageQueryItem, RevisionQueryItem)>> {
        let page = self.query_single_page(vec![
            ("action", "query".to_string()),
            ("titles", title.full()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content|timestamp|ids".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        let Some(mut page) = page else {
            return Ok(None);
        };
        if page.missing || page.invalid || page.revisions.is_empty() {
            return Ok(None);
        }
        let revision = page.revisions.remove(0);
        Ok(Some((page, revision)))
    }
}

impl RemoteReader for MediaWikiClient {
    fn site_info(&mut self) -> Result<SiteInfo> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "siteinfo".to_string()),
            ("siprop", "general|namespaces|namespacealiases".to_string()),
        ])?;
        let parsed: SiteInfoResponse =
            serde_json::from_value(response).context("failed to decode siteinfo response")?;
        site_info_from(parsed.query)
    }

    fn fetch_page(&mut self, title: &Title) -> Result<RemotePage, FetchError> {
        let found = self
            .query_revision(title)
            .map_err(|error| FetchError::transient(title.full(), &error))?;
        let Some((page, revision)) = found else {
            return Err(FetchError::not_found(title.full()));
        };
        let content = revision
            .slots
            .and_then(|slots| slots.main)
            .map(|slot| slot.content)
            .unwrap_or_default();
        Ok(RemotePage {
            title: Title::parse(&page.title).unwrap_or_else(|| title.clone()),
            revision_id: revision.revid,
            timestamp: revision.timestamp,
            content,
        })
    }

    fn fetch_file(&mut self, title: &Title) -> Result<RemoteFile, FetchError> {
        let page = self
            .query_single_page(vec![
                ("action", "query".to_string()),
                ("titles", title.full()),
                ("prop", "imageinfo|revisions".to_string()),
                ("iiprop", "url|sha1".to_string()),
                ("rvprop", "content".to_string()),
                ("rvslots", "main".to_string()),
            ])
            .map_err(|error| FetchError::transient(title.full(), &error))?;

        // Files served from a shared repository report `missing` for the
        // description page but still carry imageinfo.
        let Some(mut page) = page.filter(|page| !page.invalid) else {
            return Err(FetchError::not_found(title.full()));
        };
        if page.imageinfo.is_empty() {
            return Err(FetchError::not_found(title.full()));
        }
        let info = page.imageinfo.remove(0);
        let description = page
            .revisions
            .into_iter()
            .next()
            .and_then(|revision| revision.slots)
            .and_then(|slots| slots.main)
            .map(|slot| slot.content)
            .unwrap_or_default();

        let bytes = self
            .download(&info.url)
            .map_err(|error| FetchError::transient(title.full(), &error))?;
        Ok(RemoteFile {
            title: title.clone(),
            url: info.url,
            sha1: info.sha1,
            description,
            bytes,
        })
    }

    fn category_members(&mut self, category: &Title) -> Result<Vec<Title>> {
        let mut titles = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "categorymembers".to_string()),
                ("cmtitle", category.full()),
                ("cmtype", "page|subcat|file".to_string()),
                ("cmprop", "title".to_string()),
                ("cmlimit", "500".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("cmcontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode categorymembers API response")?;
            titles.extend(parsed.query.categorymembers.iter().filter_map(member_title));

            continue_token = parsed.continuation.and_then(|cont| cont.cmcontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(titles)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl LocalWriter for MediaWikiClient {
    fn login(&mut self, credentials: &BotCredentials) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", credentials.username.clone()),
                ("lgpassword", credentials.password.clone()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn page_exists(&mut self, title: &Title) -> Result<bool> {
        let page = self.query_single_page(vec![
            ("action", "query".to_string()),
            ("titles", title.full()),
            ("prop", "info".to_string()),
        ])?;
        Ok(page.is_some_and(|page| !page.missing && !page.invalid))
    }

    fn file_exists(&mut self, title: &Title) -> Result<bool> {
        let page = self.query_single_page(vec![
            ("action", "query".to_string()),
            ("titles", title.full()),
            ("prop", "imageinfo".to_string()),
        ])?;
        Ok(page.is_some_and(|page| page.imagerepository.as_deref() == Some("local")))
    }

    fn read_page(&mut self, title: &Title) -> Result<Option<String>> {
        let found = self.query_revision(title)?;
        Ok(found.map(|(_, revision)| {
            revision
                .slots
                .and_then(|slots| slots.main)
                .map(|slot| slot.content)
                .unwrap_or_default()
        }))
    }

    fn edit_page(&mut self, title: &Title, content: &str, summary: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(
            &[
                ("action", "edit".to_string()),
                ("title", title.full()),
                ("text", content.to_string()),
                ("summary", summary.to_string()),
                ("bot", "1".to_string()),
                ("token", token),
            ],
            true,
        )?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    fn upload_file(&mut self, upload: &FileUpload<'_>) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let filename = upload.title.name().to_string();
        let mut form = Form::new()
            .text("action", "upload")
            .text("format", "json")
            .text("formatversion", "2")
            .text("filename", filename.clone())
            .text("text", upload.description.to_string())
            .text("comment", upload.comment.to_string())
            .text("token", token);
        if upload.ignore_warnings {
            form = form.text("ignorewarnings", "1");
        }
        form = form.part("file", Part::bytes(upload.bytes.to_vec()).file_name(filename));

        let response = self.request_multipart(form)?;
        let payload: UploadResponse =
            serde_json::from_value(response).context("failed to decode upload response")?;
        let upload_result = payload
            .upload
            .ok_or_else(|| anyhow::anyhow!("missing upload payload in API response"))?;
        match upload_result.result.as_deref() {
            Some("Success") => Ok(()),
            Some("Warning") => {
                let warnings = upload_result
                    .warnings
                    .as_ref()
                    .and_then(Value::as_object)
                    .map(|map| map.keys().cloned().collect::<Vec<_>>().join(", "))
                    .unwrap_or_else(|| "unknown".to_string());
                bail!("MediaWiki upload of {} returned warnings: {warnings}", upload.title)
            }
            other => bail!(
                "MediaWiki upload failed for {}: {}",
                upload.title,
                other.unwrap_or("unknown")
            ),
        }
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn site_info_from(payload: SiteInfoPayload) -> Result<SiteInfo> {
    let general = payload
        .general
        .ok_or_else(|| anyhow::anyhow!("siteinfo response has no general section"))?;
    let mut namespaces = Vec::new();
    for info in payload.namespaces.into_values() {
        for name in [Some(info.name), info.canonical].into_iter().flatten() {
            namespaces.push(SiteNamespace { id: info.id, name });
        }
    }
    namespaces.extend(
        payload
            .namespacealiases
            .into_iter()
            .map(|alias| SiteNamespace {
                id: alias.id,
                name: alias.alias,
            }),
    );
    namespaces.retain(|namespace| namespace.id != NS_MAIN && !namespace.name.is_empty());
    namespaces.dedup();
    Ok(SiteInfo {
        site_name: general.sitename,
        generator: general.generator,
        base: general.base,
        namespaces,
    })
}

/// Category members carry their namespace id; the prefix in `title` is the
/// wiki's local name for it and may not be one we know.
fn member_title(item: &TitleQueryItem) -> Option<Title> {
    let name = if item.ns == NS_MAIN {
        item.title.as_str()
    } else {
        item.title
            .split_once(':')
            .map_or(item.title.as_str(), |(_, rest)| rest)
    };
    Title::new(item.ns, name)
}

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn describe_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .filter(|(key, _)| !matches!(*key, "lgpassword" | "token" | "text"))
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_api_response(response: Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        bail!("MediaWiki API request failed with HTTP {status}");
    }
    let payload: Value = response
        .json()
        .context("failed to decode MediaWiki API JSON response")?;
    check_api_error(payload)
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    categorymembers: Vec<TitleQueryItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    cmcontinue: Option<String>,
}

/// `cmprop=title` returns the namespace id next to the title.
#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    #[serde(default)]
    ns: i32,
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    imagerepository: Option<String>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    imageinfo: Vec<ImageInfoItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    #[serde(default)]
    revid: i64,
    #[serde(default)]
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ImageInfoItem {
    url: String,
    sha1: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SiteInfoResponse {
    #[serde(default)]
    query: SiteInfoPayload,
}

#[derive(Debug, Deserialize, Default)]
struct SiteInfoPayload {
    general: Option<GeneralSiteInfo>,
    #[serde(default)]
    namespaces: BTreeMap<String, NamespaceInfo>,
    #[serde(default)]
    namespacealiases: Vec<NamespaceAlias>,
}

#[derive(Debug, Deserialize)]
struct NamespaceInfo {
    id: i32,
    #[serde(default)]
    name: String,
    canonical: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamespaceAlias {
    id: i32,
    alias: String,
}

#[derive(Debug, Deserialize, Default)]
struct GeneralSiteInfo {
    #[serde(default)]
    sitename: String,
    #[serde(default)]
    generator: String,
    #[serde(default)]
    base: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadResponse {
    upload: Option<UploadPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadPayload {
    result: Option<String>,
    warnings: Option<Value>,
}

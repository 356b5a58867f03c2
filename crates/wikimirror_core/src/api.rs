use std::fmt;

use anyhow::Result;
use serde::Serialize;

use crate::error::FetchError;
use crate::title::Title;
use crate::wikitext::{self, Dependency};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub title: Title,
    pub revision_id: i64,
    pub timestamp: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub title: Title,
    pub url: String,
    pub sha1: Option<String>,
    pub description: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SiteInfo {
    pub site_name: String,
    pub generator: String,
    pub base: String,
    /// Local namespace names and aliases, main namespace excluded.
    pub namespaces: Vec<SiteNamespace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteNamespace {
    pub id: i32,
    pub name: String,
}

/// Read side of the source wiki.
pub trait RemoteReader {
    fn site_info(&mut self) -> Result<SiteInfo>;
    fn fetch_page(&mut self, title: &Title) -> Result<RemotePage, FetchError>;
    fn fetch_file(&mut self, title: &Title) -> Result<RemoteFile, FetchError>;
    /// Pages and subcategories filed under `category`.
    fn category_members(&mut self, category: &Title) -> Result<Vec<Title>>;
    fn request_count(&self) -> usize;

    fn embedded_dependencies(&self, text: &str) -> Vec<Dependency> {
        wikitext::embedded_dependencies(text)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BotCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BotCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileUpload<'a> {
    pub title: &'a Title,
    pub bytes: &'a [u8],
    pub description: &'a str,
    pub comment: &'a str,
    pub ignore_warnings: bool,
}

/// Write side of the destination wiki. Existence checks and reads are part of
/// this trait because they target the same authenticated session.
pub trait LocalWriter {
    fn login(&mut self, credentials: &BotCredentials) -> Result<()>;
    fn page_exists(&mut self, title: &Title) -> Result<bool>;
    fn file_exists(&mut self, title: &Title) -> Result<bool>;
    fn read_page(&mut self, title: &Title) -> Result<Option<String>>;
    fn edit_page(&mut self, title: &Title, content: &str, summary: &str) -> Result<()>;
    fn upload_file(&mut self, upload: &FileUpload<'_>) -> Result<()>;
    fn request_count(&self) -> usize;
}

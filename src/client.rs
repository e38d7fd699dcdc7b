//! This module provides a client to connect to a CalDAV server
//!
//! It implements [`SyncTransport`] with the WebDAV `sync-collection` report (RFC 6578).

use std::error::Error;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use reqwest::header::CONTENT_TYPE;
use minidom::Element;
use url::Url;

use crate::config::ClientConfig;
use crate::object::SyncToken;
use crate::resource::Resource;
use crate::traits::{RemoteObject, SyncReply, SyncResponse, SyncTransport};
use crate::utils::{find_elem, find_elems};


/// Build the body of a `sync-collection` REPORT. An empty token asks for the whole collection
fn sync_collection_body(token: Option<&SyncToken>) -> String {
    let token_elem = match token {
        None => String::from("<d:sync-token/>"),
        Some(token) => format!("<d:sync-token>{}</d:sync-token>", escape_xml(token.as_str())),
    };

    format!(r#"
    <d:sync-collection xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
        {}
        <d:sync-level>1</d:sync-level>
        <d:prop>
            <d:getetag/>
            <c:calendar-data/>
        </d:prop>
    </d:sync-collection>
"#, token_elem)
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}


/// A CalDAV client, able to fetch the changes of collections of a server
#[derive(Debug)]
pub struct Client {
    resource: Resource,
    http: reqwest::Client,
}

impl Client {
    /// Create a client. This does not start a connection
    pub fn new<S: AsRef<str>, T: ToString, U: ToString>(url: S, username: T, password: U) -> crate::Result<Self> {
        let config = ClientConfig {
            url: url.as_ref().to_string(),
            username: username.to_string(),
            password: password.to_string(),
            timeout_secs: None,
        };
        Self::from_config(&config)
    }

    /// Create a client from a [`ClientConfig`]. This does not start a connection
    pub fn from_config(config: &ClientConfig) -> crate::Result<Self> {
        let url = Url::parse(&config.url)?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(crate::config::user_agent())
            .build()
            .map_err(|err| crate::Error::Transport(Box::new(err)))?;

        Ok(Self {
            resource: Resource::new(url, config.username.clone(), config.password.clone()),
            http,
        })
    }

    /// The URL of the server
    pub fn url(&self) -> &Url {
        self.resource.url()
    }

    async fn report(&self, collection: &Resource, body: String) -> Result<(StatusCode, String), Box<dyn Error + Send + Sync>> {
        let method = Method::from_bytes(b"REPORT")?;

        let response = self.http
            .request(method, collection.url().clone())
            .header("Depth", 0)
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .basic_auth(collection.username(), Some(collection.password()))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl SyncTransport for Client {
    async fn perform_sync_request(&self, collection_url: &Url, token: Option<&SyncToken>)
        -> Result<SyncReply, Box<dyn Error + Send + Sync>>
    {
        let collection = self.resource.with_url(collection_url.clone());
        let body = sync_collection_body(token);

        let (status, text) = self.report(&collection, body).await?;

        if token.is_some() && is_token_rejection(status, &text) {
            log::info!("{} does not accept our sync token anymore", collection_url);
            return Ok(SyncReply::TokenRejected);
        }
        if status.is_success() == false {
            return Err(format!("Unexpected HTTP status code {:?} for {}", status, collection_url).into());
        }

        let response = parse_sync_response(&text, &collection)?;
        Ok(SyncReply::Changes(response))
    }
}


/// Whether the server replied with a `DAV:valid-sync-token` precondition failure
fn is_token_rejection(status: StatusCode, body: &str) -> bool {
    match status {
        StatusCode::FORBIDDEN | StatusCode::CONFLICT | StatusCode::BAD_REQUEST | StatusCode::PRECONDITION_FAILED => (),
        _ => return false,
    }

    match body.parse::<Element>() {
        Ok(root) => find_elem(&root, "valid-sync-token").is_some(),
        Err(_) => false,
    }
}

/// Parse the multistatus reply of a `sync-collection` REPORT
fn parse_sync_response(text: &str, collection: &Resource) -> Result<SyncResponse, Box<dyn Error + Send + Sync>> {
    let root: Element = text.parse()
        .map_err(|err| format!("Invalid XML in sync response: {}", err))?;

    let mut response = SyncResponse {
        next_token: find_elem(&root, "sync-token")
            .map(|elem| elem.text().trim().to_string())
            .filter(|token| token.is_empty() == false),
        ..SyncResponse::default()
    };

    // Relative hrefs are relative to the collection
    let base = crate::identity::collection_dir(collection.url());

    for rep in find_elems(&root, "response") {
        let href = match find_elem(rep, "href") {
            None => {
                log::warn!("Unable to extract HREF");
                continue;
            },
            Some(elem) => elem.text(),
        };
        let url = base.join(href.trim())
            .map_err(|err| format!("Invalid href {} in sync response: {}", href.trim(), err))?;

        // A status right under <response> (rather than in a <propstat>) tells about the whole resource
        let has_status = |code: &str| rep.children()
            .filter(|child| child.name() == "status")
            .any(|status| status.text().contains(code));

        // Some servers list the collection itself. A 507 there means the reply has been truncated
        if url.path().trim_end_matches('/') == base.path().trim_end_matches('/') {
            if has_status(" 507 ") {
                log::info!("The server truncated its sync reply for {}", collection.url());
                response.is_truncated = true;
            }
            continue;
        }

        if has_status(" 404 ") {
            response.deleted.push(url);
            continue;
        }

        let etag = find_elem(rep, "getetag")
            .map(|elem| elem.text())
            .filter(|etag| etag.is_empty() == false);
        let data = find_elem(rep, "calendar-data")
            .map(|elem| elem.text())
            .filter(|data| data.trim().is_empty() == false);

        response.upserted.push(RemoteObject { uid: None, url, etag, data });
    }

    Ok(response)
}

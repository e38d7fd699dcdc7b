//! Identity of calendar objects: their `UID`, and the URL they are stored at
//!
//! Extracting a UID is a plain line scan on purpose, so that the hot path never needs to parse a whole iCal file.

use url::Url;

/// What happened when looking for a UID in some calendar data.
///
/// These are reported to the hook given to [`extract_uid_with_hook`]
#[derive(Clone, Debug, PartialEq)]
pub enum IdentityEvent {
    /// A `UID:` line was found
    UidFound(String),
    /// The data contains no `UID:` line
    NoUidLine,
    /// The data is not valid UTF-8 text
    NotText(std::str::Utf8Error),
}

/// Generate a new random UID (a v4 UUID, i.e. 122 random bits)
pub fn generate_uid() -> String {
    uuid::Uuid::new_v4().to_hyphenated().to_string()
}

/// Returns the value of the first `UID:` line of some calendar data, if any
pub fn extract_uid(data: &str) -> Option<String> {
    extract_uid_with_hook(data, |_| {})
}

/// Same as [`extract_uid`], but tells `hook` about what has been found.
pub fn extract_uid_with_hook<F>(data: &str, mut hook: F) -> Option<String>
where
    F: FnMut(&IdentityEvent),
{
    let found = data.lines()
        .map(|line| line.trim())
        .find(|line| line.starts_with("UID:"))
        .and_then(|line| line.splitn(2, ':').nth(1))
        .map(|uid| uid.trim().to_string());

    match &found {
        Some(uid) => hook(&IdentityEvent::UidFound(uid.clone())),
        None => hook(&IdentityEvent::NoUidLine),
    }
    found
}

/// Same as [`extract_uid_with_hook`], for data that may not even be text
pub fn extract_uid_from_bytes<F>(data: &[u8], mut hook: F) -> Option<String>
where
    F: FnMut(&IdentityEvent),
{
    match std::str::from_utf8(data) {
        Ok(text) => extract_uid_with_hook(text, hook),
        Err(err) => {
            hook(&IdentityEvent::NotText(err));
            None
        },
    }
}

/// Encode a UID so that it is usable as a single path segment.
///
/// Slashes are first replaced by `%2F`, then the whole string is percent-encoded again.
/// Some servers decode `%2F` before routing, so a single pass would still let them see a path separator.
pub fn escape_uid(uid: &str) -> String {
    let slash_free = uid.replace('/', "%2F");
    urlencoding::encode(&slash_free).into_owned()
}

/// Build the URL of a calendar object, i.e. `<collection>/<uid>.ics`
///
/// A new UID is generated when `uid` is `None`.
/// When `escape_special_chars` is false, the UID is used verbatim, and must already be safe to use in a URL path.
pub fn generate_object_url(collection_url: &Url, uid: Option<&str>, escape_special_chars: bool) -> Result<Url, url::ParseError> {
    let uid = match uid {
        Some(uid) => uid.to_string(),
        None => generate_uid(),
    };

    let segment = if escape_special_chars {
        escape_uid(&uid)
    } else {
        uid
    };

    // "./" keeps a verbatim UID such as "a:b" from being parsed as an absolute URL
    collection_dir(collection_url).join(&format!("./{}.ics", segment))
}

/// The collection URL, as a "directory" that relative names can be joined to
pub(crate) fn collection_dir(collection_url: &Url) -> Url {
    let mut dir = collection_url.clone();
    dir.set_query(None);
    dir.set_fragment(None);
    if dir.path().ends_with('/') == false {
        let path = format!("{}/", dir.path());
        dir.set_path(&path);
    }
    dir
}

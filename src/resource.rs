use url::Url;

/// Just a wrapper around a URL and credentials
#[derive(Clone, Debug)]
pub struct Resource {
    url: Url,
    username: String,
    password: String,
}

impl Resource {
    pub fn new(url: Url, username: String, password: String) -> Self {
        Self { url, username, password }
    }

    pub fn url(&self) -> &Url { &self.url }
    pub fn username(&self) -> &String { &self.username }
    pub fn password(&self) -> &String { &self.password }

    /// Build a new Resource with the same credentials, for another URL
    pub fn with_url(&self, url: Url) -> Resource {
        let mut built = (*self).clone();
        built.url = url;
        built
    }
}

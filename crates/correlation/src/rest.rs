use crate::Error;

/// Client composes a base API URL, a header-borne token, and an HTTP client.
#[derive(Clone)]
pub struct Client {
    /// Base URL of the REST API, ending in '/'.
    pub base_url: url::Url,
    /// HTTP client to use for REST requests.
    pub http_client: reqwest::Client,
    auth_header: &'static str,
    auth_value: String,
}

impl Client {
    /// Create a client which authenticates every request by setting
    /// `auth_header` to `auth_value`.
    pub fn new(
        http_client: reqwest::Client,
        base_url: &url::Url,
        auth_header: &'static str,
        auth_value: String,
    ) -> Self {
        Self {
            base_url: base_url.clone(),
            http_client,
            auth_header,
            auth_value,
        }
    }

    pub fn url(&self, path: &str) -> Result<url::Url, Error> {
        self.base_url
            .join(path)
            .map_err(|err| Error::transport(format!("failed to join {path:?} to base URL"), err))
    }

    /// Issue a GET of `path` with `query` parameters, and decode its JSON response.
    pub async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        self.get_url(self.url(path)?, query).await
    }

    /// Issue a GET of a fully-built `url` with `query` parameters, and decode its JSON response.
    pub async fn get_url<T>(&self, url: url::Url, query: &[(&str, &str)]) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let path = url.path().to_string();
        let builder = self.http_client.get(url).query(query);
        self.execute("GET", &path, builder).await
    }

    /// Issue a GET of a fully-built `url` with `query` parameters, and decode its JSON response.
    /// A response of 404 Not Found is None, while every other failure status is an error.
    pub async fn get_url_opt<T>(
        &self,
        url: url::Url,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let path = url.path().to_string();
        let builder = self.http_client.get(url).query(query);
        let (status, body) = self.send("GET", &path, builder).await?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status("GET", &path, status, &body)?;
        decode("GET", &path, &body).map(Some)
    }

    /// Issue a POST of `path` with a JSON `body`, and decode its JSON response.
    pub async fn post<Request, T>(&self, path: &str, body: &Request) -> Result<T, Error>
    where
        Request: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        self.post_url(self.url(path)?, body).await
    }

    /// Issue a POST of a fully-built `url` with a JSON `body`, and decode its JSON response.
    pub async fn post_url<Request, T>(&self, url: url::Url, body: &Request) -> Result<T, Error>
    where
        Request: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let path = url.path().to_string();
        let builder = self.http_client.post(url).json(body);
        self.execute("POST", &path, builder).await
    }

    async fn execute<T>(
        &self,
        method: &'static str,
        path: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let (status, body) = self.send(method, path, builder).await?;
        check_status(method, path, status, &body)?;
        decode(method, path, &body)
    }

    async fn send(
        &self,
        method: &'static str,
        path: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<(reqwest::StatusCode, Vec<u8>), Error> {
        let request = builder
            .header(self.auth_header, &self.auth_value)
            .build()
            .map_err(|err| Error::transport(format!("{method} {path}: building request"), err))?;
        tracing::debug!(url = %request.url(), method, "sending request");

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|err| Error::transport(format!("{method} {path}"), err))?;
        let status = response.status();

        let bytes = response
            .bytes()
            .await
            .map_err(|err| Error::transport(format!("{method} {path}: reading body"), err))?;

        Ok((status, bytes.to_vec()))
    }
}

fn check_status(
    method: &str,
    path: &str,
    status: reqwest::StatusCode,
    body: &[u8],
) -> Result<(), Error> {
    if status.is_success() {
        return Ok(());
    }
    let body = String::from_utf8_lossy(&body[..body.len().min(500)]).into_owned();
    Err(Error::Transport {
        context: format!("{method} {path}: {status}: {body}"),
        source: None,
    })
}

fn decode<T>(method: &str, path: &str, body: &[u8]) -> Result<T, Error>
where
    T: serde::de::DeserializeOwned,
{
    // Some endpoints reply with an empty body.
    let body: &[u8] = if body.is_empty() { b"null" } else { body };

    serde_json::from_slice(body)
        .map_err(|err| Error::malformed(format!("response body of {method} {path}"), err))
}

/// Build an HTTP client with the given user agent and per-request timeout.
pub fn new_http_client(
    user_agent: &str,
    timeout: std::time::Duration,
) -> Result<reqwest::Client, Error> {
    reqwest::ClientBuilder::new()
        .user_agent(user_agent.to_string())
        .timeout(timeout)
        .build()
        .map_err(|err| Error::transport("failed to build http client", err))
}

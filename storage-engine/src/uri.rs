use shared::{Error, Result};
use url::Url;

const DEFAULT_PORT: u16 = 6379;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

/// Parsed remote store location.
///
/// `redis://[:password@]host[:port][/db]` or `unix:///path/to/socket`.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteUri {
    pub endpoint: Endpoint,
    pub password: Option<String>,
    pub db: Option<u32>,
}

impl RemoteUri {
    pub fn parse(raw: &str) -> Result<Self> {
        let uri = Url::parse(raw).map_err(|e| Error::InvalidUri(format!("{raw}: {e}")))?;

        match uri.scheme() {
            "redis" => {
                let host = uri
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| Error::InvalidUri(format!("{raw}: missing host")))?
                    .to_string();
                let port = uri.port().unwrap_or(DEFAULT_PORT);

                let password = match uri.password() {
                    Some(encoded) => Some(
                        urlencoding::decode(encoded)
                            .map_err(|e| Error::InvalidUri(format!("password: {e}")))?
                            .into_owned(),
                    ),
                    None => None,
                };

                let db = match uri.path().trim_start_matches('/') {
                    "" => None,
                    selector => Some(selector.parse::<u32>().map_err(|_| {
                        Error::InvalidUri(format!("{raw}: database `{selector}` is not a number"))
                    })?),
                };

                Ok(Self {
                    endpoint: Endpoint::Tcp { host, port },
                    password,
                    db,
                })
            }
            "unix" => {
                let path = uri.path();
                if path.is_empty() || path == "/" {
                    return Err(Error::InvalidUri(format!("{raw}: missing socket path")));
                }
                Ok(Self {
                    endpoint: Endpoint::Unix {
                        path: path.to_string(),
                    },
                    password: None,
                    db: None,
                })
            }
            other => Err(Error::InvalidScheme(other.to_string())),
        }
    }

    /// Address-only URL handed to the client; credentials and database are
    /// applied as commands after dialing.
    pub fn connection_url(&self) -> String {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => format!("redis://{host}:{port}/"),
            Endpoint::Unix { path } => format!("unix://{path}"),
        }
    }
}

impl std::fmt::Debug for RemoteUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteUri")
            .field("endpoint", &self.endpoint)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .finish()
    }
}

//! The `User-Agent` header sent by the HTTP client.

/// Header value identifying the crate itself.
pub const CRATE_AGENT: &str = concat!("tocwatch/", env!("CARGO_PKG_VERSION"));

/// Desktop browsers the client can pose as. Challenge origins serve the
/// solvable IUAM page to these and a hard block to obvious bots.
const BROWSER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// How `http.user_agent` in the config file is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAgent {
    /// Unset: identify as tocwatch.
    Crate,
    /// `"impersonate"`: a browser agent, fixed for the life of the process.
    Browser,
    Custom(String),
}

impl UserAgent {
    pub fn from_config(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Crate,
            Some(v) if v.eq_ignore_ascii_case("impersonate") => Self::Browser,
            Some(v) => Self::Custom(v.to_string()),
        }
    }

    pub fn header_value(&self) -> &str {
        match self {
            Self::Crate => CRATE_AGENT,
            // One agent per process; switching mid-session invalidates clearance cookies.
            Self::Browser => BROWSER_AGENTS[std::process::id() as usize % BROWSER_AGENTS.len()],
            Self::Custom(v) => v,
        }
    }
}

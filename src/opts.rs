//! Pipe options.

use no_panic::no_panic;
use url::Url;

use crate::error::Error;

/// Options shared by the blocking and async pipes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    /// Bound on completions buffered ahead of the delivery cursor.
    ///
    /// Buffering an early completion that would bring the pending map up to
    /// this size fails with [`Error::CapacityExceeded`]. Must be at least 1.
    ///
    /// Default: `1024`
    pub max_capacity: usize,

    /// Name reported in log events and used for the dispatch thread name.
    ///
    /// Default: `None`
    pub name: Option<String>,
}

impl Default for Opts {
    #[no_panic]
    fn default() -> Self {
        Self {
            max_capacity: 1024,
            name: None,
        }
    }
}

impl Opts {
    /// Check the options are usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_capacity == 0 {
            return Err(Error::InvalidUsage(
                "max_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("pipe")
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a pipe URL.
    ///
    /// Format: `pipe://[name][?max_capacity=N]`
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if url.scheme() != "pipe" {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'pipe://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            name: url
                .host_str()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "max_capacity" => {
                    opts.max_capacity = value.parse().map_err(|_| {
                        Error::InvalidUsage(format!("Invalid max_capacity: {}", value))
                    })?;
                }
                "name" => {
                    opts.name = Some(value.to_string());
                }
                _ => {
                    return Err(Error::InvalidUsage(format!("Unknown option: {}", key)));
                }
            }
        }

        opts.validate()?;
        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}

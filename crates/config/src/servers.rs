use crate::Error;

/// One entry in the ensemble server specification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSpec {
    /// ZooKeeper server id (the `myid` value).
    pub server_id: u32,
    /// Hostname the member is reachable at.
    pub hostname: String,
}

/// Parsed ensemble server specification.
///
/// The wire format is `"<hostname>:<serverId>,<hostname>:<serverId>,..."`.
/// Entries are kept sorted ascending by server id; that order is also the
/// deterministic order rolling rollouts walk the ensemble in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerList {
    specs: Vec<ServerSpec>,
}

impl ServerList {
    /// Parses a server specification string.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed entries, duplicate server
    /// ids, or an empty specification.
    pub fn parse(spec: &str) -> Result<Self, Error> {
        let mut specs = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (hostname, id) = part.rsplit_once(':').ok_or_else(|| {
                Error::validation("serversSpec", format!("entry `{part}` is not host:id"))
            })?;
            if hostname.is_empty() {
                return Err(Error::validation(
                    "serversSpec",
                    format!("entry `{part}` has an empty hostname"),
                ));
            }
            let server_id: u32 = id.parse().map_err(|_| {
                Error::validation("serversSpec", format!("`{id}` is not a valid server id"))
            })?;
            specs.push(ServerSpec {
                server_id,
                hostname: hostname.to_string(),
            });
        }

        if specs.is_empty() {
            return Err(Error::validation("serversSpec", "no servers listed"));
        }

        specs.sort_by_key(|s| s.server_id);
        if specs.windows(2).any(|w| w[0].server_id == w[1].server_id) {
            return Err(Error::validation("serversSpec", "duplicate server id"));
        }

        Ok(Self { specs })
    }

    /// Members in ascending server-id order.
    #[must_use]
    pub fn specs(&self) -> &[ServerSpec] {
        &self.specs
    }

    /// Number of ensemble members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// True when the list holds no members (never the case post-parse).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Looks up the server id for a hostname. `None` means the host is not
    /// part of the ensemble (an unlisted member).
    #[must_use]
    pub fn server_id_for(&self, hostname: &str) -> Option<u32> {
        self.specs
            .iter()
            .find(|s| s.hostname == hostname)
            .map(|s| s.server_id)
    }
}

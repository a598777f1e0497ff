use thiserror::Error;

use crate::protocol::OpenAnnouncement;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("local endpoint id must not be empty")]
    EmptyLocal,
    #[error("remote endpoint id must not be empty")]
    EmptyRemote,
}

/// Who we are and who we want to reach, as announced to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointIdentity {
    local: String,
    remote: String,
}

impl EndpointIdentity {
    /// Both ids are trimmed and must be non-empty.
    pub fn new(local: impl AsRef<str>, remote: impl AsRef<str>) -> Result<Self, IdentityError> {
        let local = local.as_ref().trim();
        let remote = remote.as_ref().trim();
        if local.is_empty() {
            return Err(IdentityError::EmptyLocal);
        }
        if remote.is_empty() {
            return Err(IdentityError::EmptyRemote);
        }
        Ok(Self {
            local: local.to_string(),
            remote: remote.to_string(),
        })
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn announcement(&self) -> OpenAnnouncement {
        OpenAnnouncement {
            local: self.local.clone(),
            remote: self.remote.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_ids() {
        let identity = EndpointIdentity::new(" alice ", "bob\n").unwrap();
        assert_eq!(identity.local(), "alice");
        assert_eq!(identity.remote(), "bob");
    }

    #[test]
    fn rejects_blank_ids() {
        assert_eq!(
            EndpointIdentity::new("   ", "bob"),
            Err(IdentityError::EmptyLocal)
        );
        assert_eq!(
            EndpointIdentity::new("alice", ""),
            Err(IdentityError::EmptyRemote)
        );
    }
}

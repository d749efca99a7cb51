//! # Instance identity.
//!
//! [`InstanceContext`] carries the identity the supervisor presents to the
//! control plane. It is created once at startup and threaded explicitly
//! through everything that needs it; there is no process-wide mutable
//! state anywhere in the crate.

use std::io;
use std::path::Path;

/// Where cloud-init records the instance id on boot.
const CLOUD_INIT_INSTANCE_ID: &str = "/var/lib/cloud/data/instance-id";

/// This host's identity within the autoscaling group.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    instance_id: String,
}

impl InstanceContext {
    /// Creates a context for a known instance id.
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }

    /// Reads the instance id from cloud-init's boot record.
    pub fn from_cloud_init() -> io::Result<Self> {
        Self::from_file(Path::new(CLOUD_INIT_INSTANCE_ID))
    }

    /// Reads the instance id from the first line of `path`.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let id = contents.lines().next().unwrap_or("").trim();
        if id.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no instance id in {path:?}"),
            ));
        }
        Ok(Self::new(id))
    }

    /// The instance id.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_first_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "i-0123456789abcdef0").unwrap();
        writeln!(file, "trailing junk").unwrap();

        let ctx = InstanceContext::from_file(file.path()).unwrap();
        assert_eq!(ctx.instance_id(), "i-0123456789abcdef0");
    }

    #[test]
    fn empty_file_is_invalid() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(InstanceContext::from_file(file.path()).is_err());
    }
}

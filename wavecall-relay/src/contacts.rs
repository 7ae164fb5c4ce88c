//! Contact directory backends for the relay binary

use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use wavecall_core::{ContactDirectory, UserId};

/// Contact links loaded from a JSON file: a map of identity to contact list.
///
/// ```json
/// {
///   "alice": ["bob", "carol"],
///   "bob": ["alice"]
/// }
/// ```
///
/// Links are directional: an identity's presence transitions fan out to the
/// identities in *its own* list. List `alice` under `bob` as well if the two
/// should see each other.
pub struct FileContacts {
    contacts: HashMap<UserId, Vec<UserId>>,
}

impl FileContacts {
    /// Load the directory from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening contacts file {}", path.display()))?;
        let raw: HashMap<String, Vec<String>> = serde_json::from_reader(file)
            .with_context(|| format!("parsing contacts file {}", path.display()))?;
        let contacts = raw
            .into_iter()
            .map(|(id, list)| {
                (
                    UserId::new(id),
                    list.into_iter().map(UserId::new).collect(),
                )
            })
            .collect();
        Ok(Self { contacts })
    }
}

impl ContactDirectory<UserId> for FileContacts {
    fn contacts_of(&self, identity: &UserId) -> Vec<UserId> {
        self.contacts.get(identity).cloned().unwrap_or_default()
    }
}

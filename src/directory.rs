//! Identity Directory: the set of known identities, unique by name.

use chrono::Utc;
use parking_lot::RwLock;
use tracing::info;

use crate::auth::{hash_password, verify_password};
use crate::error::DirectoryError;
use crate::models::{Identity, Role};

/// Registration input. `secret` is the plaintext password.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub name: String,
    pub email: String,
    pub secret: String,
    pub role: Role,
}

pub struct IdentityDirectory {
    identities: RwLock<Vec<Identity>>,
    bcrypt_cost: u32,
}

impl IdentityDirectory {
    pub fn new(bcrypt_cost: u32) -> Self {
        Self {
            identities: RwLock::new(Vec::new()),
            bcrypt_cost,
        }
    }

    /// Hashes the secret outside the lock, then inserts if the name is free.
    pub fn register(&self, new: NewIdentity) -> Result<Identity, DirectoryError> {
        if self.find_by_name(&new.name).is_some() {
            return Err(DirectoryError::NameTaken(new.name));
        }
        let secret_hash = hash_password(&new.secret, self.bcrypt_cost)
            .map_err(|e| DirectoryError::Hash(e.to_string()))?;

        let mut identities = self.identities.write();
        // Re-check: another registration may have won while we were hashing.
        if identities.iter().any(|i| i.name == new.name) {
            return Err(DirectoryError::NameTaken(new.name));
        }
        let id = identities.iter().map(|i| i.id).max().unwrap_or(0) + 1;
        let identity = Identity {
            id,
            name: new.name,
            email: new.email,
            secret_hash,
            role: new.role,
            created_at: Utc::now(),
        };
        identities.push(identity.clone());
        info!(name = %identity.name, role = %identity.role, "identity registered");
        Ok(identity)
    }

    pub fn find_by_name(&self, name: &str) -> Option<Identity> {
        self.identities.read().iter().find(|i| i.name == name).cloned()
    }

    /// Credential check: `None` for an unknown name or a wrong secret.
    pub fn authenticate(&self, name: &str, secret: &str) -> Option<Identity> {
        let identity = self.find_by_name(name)?;
        verify_password(secret, &identity.secret_hash).then_some(identity)
    }

    pub fn list(&self) -> Vec<Identity> {
        self.identities.read().clone()
    }

    pub fn count_by_role(&self, role: Role) -> usize {
        self.identities.read().iter().filter(|i| i.role == role).count()
    }

    pub fn len(&self) -> usize {
        self.identities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.read().is_empty()
    }

    /// Default accounts, one per role. Already-present names are skipped.
    pub fn seed_defaults(&self) -> Result<(), DirectoryError> {
        let defaults = [
            ("admin", "admin@hbiu.edu", "admin123", Role::Admin),
            ("lecturer1", "lecturer1@hbiu.edu", "lecturer123", Role::Lecturer),
            ("student1", "student1@hbiu.edu", "student123", Role::Student),
        ];
        for (name, email, secret, role) in defaults {
            match self.register(NewIdentity {
                name: name.to_string(),
                email: email.to_string(),
                secret: secret.to_string(),
                role,
            }) {
                Ok(_) | Err(DirectoryError::NameTaken(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_identity(name: &str, role: Role) -> NewIdentity {
        NewIdentity {
            name: name.to_string(),
            email: format!("{}@example.edu", name),
            secret: "pw".to_string(),
            role,
        }
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let dir = IdentityDirectory::new(4);
        let a = dir.register(new_identity("ana", Role::Student)).unwrap();
        let b = dir.register(new_identity("ben", Role::Lecturer)).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let dir = IdentityDirectory::new(4);
        dir.register(new_identity("ana", Role::Student)).unwrap();
        let err = dir.register(new_identity("ana", Role::Admin)).unwrap_err();
        assert_eq!(err, DirectoryError::NameTaken("ana".into()));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_authenticate() {
        let dir = IdentityDirectory::new(4);
        dir.register(new_identity("ana", Role::Student)).unwrap();
        assert!(dir.authenticate("ana", "pw").is_some());
        assert!(dir.authenticate("ana", "nope").is_none());
        assert!(dir.authenticate("ghost", "pw").is_none());
    }

    #[test]
    fn test_seed_defaults_is_idempotent() {
        let dir = IdentityDirectory::new(4);
        dir.seed_defaults().unwrap();
        dir.seed_defaults().unwrap();
        assert_eq!(dir.len(), 3);
        assert_eq!(dir.count_by_role(Role::Admin), 1);
        assert_eq!(dir.find_by_name("lecturer1").unwrap().role, Role::Lecturer);
    }
}

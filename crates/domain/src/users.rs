//! Mapping verified identities to local users, and keeping them in sync
//! with the identity provider.

use chrono::Utc;
use common::{ParseStatusError, UserId};
use serde::Deserialize;
use store::{CommerceStore, Role, UserRecord};

use crate::DomainError;

#[derive(Debug, Deserialize)]
struct RawSyncEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: RawIdentity,
}

#[derive(Debug, Deserialize)]
struct RawIdentity {
    id: String,
    #[serde(default)]
    email_addresses: Vec<RawEmail>,
    #[serde(default)]
    primary_email_address_id: Option<String>,
    #[serde(default)]
    public_metadata: RawMetadata,
}

#[derive(Debug, Deserialize)]
struct RawEmail {
    id: String,
    email_address: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    role: Option<String>,
}

impl RawIdentity {
    /// The primary address if one is flagged, else the first listed.
    fn primary_email(&self) -> Option<&str> {
        let primary = self.primary_email_address_id.as_deref().and_then(|wanted| {
            self.email_addresses.iter().find(|email| email.id == wanted)
        });
        primary
            .or_else(|| self.email_addresses.first())
            .map(|email| email.email_address.as_str())
    }
}

/// A user lifecycle event pushed by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserSyncEvent {
    /// `user.created` or `user.updated`.
    Upserted {
        external_id: String,
        email: String,
        role: Role,
    },
    /// `user.deleted`.
    Deleted { external_id: String },
    /// An event type we do not act on.
    Ignored { event_type: String },
}

impl UserSyncEvent {
    /// Parses a sync event body.
    ///
    /// The role comes from `public_metadata.role` and defaults to customer.
    pub fn parse(payload: &[u8]) -> Result<Self, DomainError> {
        let raw: RawSyncEvent = serde_json::from_slice(payload)
            .map_err(|e| DomainError::Validation(format!("invalid user sync payload: {e}")))?;
        if raw.data.id.trim().is_empty() {
            return Err(DomainError::Validation("user id is required".to_string()));
        }

        match raw.event_type.as_str() {
            "user.created" | "user.updated" => {
                let Some(email) = raw.data.primary_email().map(str::to_string) else {
                    return Err(DomainError::Validation("no email address found".to_string()));
                };
                let role = match raw.data.public_metadata.role.as_deref() {
                    Some(role) => role
                        .parse()
                        .map_err(|e: ParseStatusError| DomainError::Validation(e.to_string()))?,
                    None => Role::Customer,
                };
                Ok(UserSyncEvent::Upserted {
                    external_id: raw.data.id,
                    email,
                    role,
                })
            }
            "user.deleted" => Ok(UserSyncEvent::Deleted {
                external_id: raw.data.id,
            }),
            _ => Ok(UserSyncEvent::Ignored {
                event_type: raw.event_type,
            }),
        }
    }
}

/// What applying a sync event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Provisioned,
    Deactivated,
    /// A delete for a user we never had, or already removed.
    Unknown,
    Ignored,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Provisioned => "provisioned",
            SyncOutcome::Deactivated => "deactivated",
            SyncOutcome::Unknown => "unknown_user",
            SyncOutcome::Ignored => "ignored",
        }
    }
}

/// Looks up and provisions users mirrored from the identity provider.
#[derive(Clone)]
pub struct UserDirectory<S: CommerceStore> {
    store: S,
}

impl<S: CommerceStore> UserDirectory<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Maps a verified external identity to its local user.
    ///
    /// Unknown identities are never created here; they fail with `UserNotFound`.
    pub async fn resolve(&self, external_id: &str) -> Result<UserRecord, DomainError> {
        self.store
            .find_user_by_external_id(external_id)
            .await?
            .ok_or(DomainError::UserNotFound)
    }

    /// Creates or refreshes a user from an identity-provider sync event.
    #[tracing::instrument(skip(self, email))]
    pub async fn provision(
        &self,
        external_id: &str,
        email: &str,
        role: Role,
    ) -> Result<UserRecord, DomainError> {
        if external_id.trim().is_empty() {
            return Err(DomainError::Validation("external_id is required".to_string()));
        }

        let user = self
            .store
            .upsert_user(UserRecord {
                id: UserId::new(),
                external_id: external_id.to_string(),
                email: email.to_string(),
                role,
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(user_id = %user.id, role = user.role.as_str(), "user provisioned");
        Ok(user)
    }

    /// Applies one sync event. Replays are harmless.
    pub async fn apply(&self, event: &UserSyncEvent) -> Result<SyncOutcome, DomainError> {
        let outcome = match event {
            UserSyncEvent::Upserted {
                external_id,
                email,
                role,
            } => {
                self.provision(external_id, email, *role).await?;
                SyncOutcome::Provisioned
            }
            UserSyncEvent::Deleted { external_id } => {
                if self.store.deactivate_user(external_id).await? {
                    tracing::info!(%external_id, "user deactivated");
                    SyncOutcome::Deactivated
                } else {
                    SyncOutcome::Unknown
                }
            }
            UserSyncEvent::Ignored { .. } => SyncOutcome::Ignored,
        };

        metrics::counter!("user_sync_events_total", "outcome" => outcome.as_str()).increment(1);
        Ok(outcome)
    }
}

//! Admin accounts: credential checks, the profile editor and dashboard counts.

use std::fmt;

use serde::{Deserialize, Serialize};
use showroom_db::{
    from_row, to_row, AdminAccount, AdminFields, Collection, Filter, RecordId, SelectQuery,
};
use tracing::{info, instrument, warn};

use crate::{KernelError, ShowroomKernel, ValidationError};

/// Login form. Both values are compared verbatim.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub admin_code: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Replacement username and admin code for the signed-in admin.
#[derive(Clone, Deserialize)]
pub struct ProfileForm {
    pub username: String,
    pub admin_code: String,
}

impl fmt::Debug for ProfileForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileForm")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DashboardCounts {
    pub cars: u64,
    pub gallery: u64,
    pub admins: u64,
}

fn require_username_and_code(username: &str, admin_code: &str) -> Result<(), KernelError> {
    let mut errors = ValidationError::default();
    if username.trim().is_empty() {
        errors.push("username", "username is required");
    }
    if admin_code.trim().is_empty() {
        errors.push("admin_code", "admin code is required");
    }
    errors.into_result()
}

impl ShowroomKernel {
    /// Looks up the admin matching both username and admin code.
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn login(&self, credentials: Credentials) -> Result<AdminAccount, KernelError> {
        require_username_and_code(&credentials.username, &credentials.admin_code)?;
        let query = SelectQuery::new()
            .filter(Filter::eq("username", credentials.username.as_str()))
            .filter(Filter::eq("admin_code", credentials.admin_code.as_str()))
            .limit(1);
        let rows = self.gateway.select(Collection::Admin, &query).await?;
        match rows.into_iter().next() {
            Some(row) => {
                let admin: AdminAccount = from_row(Collection::Admin, row)?;
                info!(admin_id = admin.id, "admin signed in");
                Ok(admin)
            }
            None => {
                warn!("admin sign-in rejected");
                Err(KernelError::InvalidCredentials)
            }
        }
    }

    pub async fn admin_account(&self, id: RecordId) -> Result<AdminAccount, KernelError> {
        self.get(Collection::Admin, id).await
    }

    /// Overwrites username and admin code of admin `id`.
    #[instrument(skip(self, form), fields(username = %form.username))]
    pub async fn update_profile(
        &self,
        id: RecordId,
        form: ProfileForm,
    ) -> Result<AdminAccount, KernelError> {
        require_username_and_code(&form.username, &form.admin_code)?;
        let changes = to_row(&AdminFields {
            username: form.username.trim().to_string(),
            admin_code: form.admin_code,
        })?;
        let touched = self
            .gateway
            .update(Collection::Admin, &[Filter::id(id)], changes)
            .await?;
        if touched == 0 {
            return Err(KernelError::not_found(Collection::Admin, id));
        }
        info!(admin_id = id, "admin profile updated");
        self.admin_account(id).await
    }

    /// Record counts per collection. A failing count reads as zero.
    pub async fn dashboard(&self) -> DashboardCounts {
        let (cars, gallery, admins) = tokio::join!(
            self.gateway.count(Collection::Cars),
            self.gateway.count(Collection::Gallery),
            self.gateway.count(Collection::Admin),
        );
        DashboardCounts {
            cars: count_or_zero(Collection::Cars, cars),
            gallery: count_or_zero(Collection::Gallery, gallery),
            admins: count_or_zero(Collection::Admin, admins),
        }
    }

    /// Seeds the first admin when the collection is empty. Returns the new
    /// account, or `None` when admins already exist.
    pub async fn ensure_bootstrap_admin(
        &self,
        username: &str,
        admin_code: &str,
    ) -> Result<Option<AdminAccount>, KernelError> {
        require_username_and_code(username, admin_code)?;
        if self.gateway.count(Collection::Admin).await? > 0 {
            return Ok(None);
        }
        let row = to_row(&AdminFields {
            username: username.trim().to_string(),
            admin_code: admin_code.to_string(),
        })?;
        let created = self
            .gateway
            .insert(Collection::Admin, vec![row])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| KernelError::Gateway(anyhow::anyhow!("admin insert returned no row")))?;
        let admin: AdminAccount = from_row(Collection::Admin, created)?;
        info!(admin_id = admin.id, username = %admin.username, "bootstrap admin created");
        Ok(Some(admin))
    }
}

fn count_or_zero(collection: Collection, result: anyhow::Result<u64>) -> u64 {
    result.unwrap_or_else(|err| {
        warn!(collection = %collection, error = %err, "count unavailable; showing 0");
        0
    })
}

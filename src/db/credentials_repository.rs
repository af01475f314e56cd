use sqlx::PgPool;
use tracing::instrument;

use crate::db::{Credential, DbError};

/// Read-side access to the key-value secret store. Provisioning and
/// encryption of entries happen outside this crate.
#[derive(Clone)]
pub struct CredentialsRepository {
    pool: PgPool,
}

impl CredentialsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn get_credentials(&self, key_name: &str) -> Result<Option<Credential>, DbError> {
        let credential =
            sqlx::query_as::<_, Credential>("SELECT * FROM credentials WHERE key_name = $1")
                .bind(key_name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(credential)
    }
}

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

use crate::crypto::TokenEncryptor;
use crate::error::{CoreError, CoreResult};
use crate::model::{OAuth2ClientToken, OAuth2ClientTokenCreationInput};
use crate::store::Store;

const ONE_DAY_MS: i64 = 24 * 60 * 60 * 1000;

const TOKEN_COLUMNS: &str = "id, client_id, belongs_to_user, scope, code, access, refresh, \
     redirect_uri, code_challenge, code_challenge_method, \
     code_created_at, access_created_at, refresh_created_at, \
     code_expires_at, access_expires_at, refresh_expires_at, created_at";

/// Which encrypted secret column a lookup probes.
#[derive(Debug, Clone, Copy)]
enum SecretColumn {
    Code,
    Access,
    Refresh,
}

impl SecretColumn {
    fn name(self) -> &'static str {
        match self {
            SecretColumn::Code => "code",
            SecretColumn::Access => "access",
            SecretColumn::Refresh => "refresh",
        }
    }
}

impl Store {
    /// Store a token with its three secrets encrypted at rest. The secrets
    /// come back in plaintext on the returned record.
    pub async fn create_oauth2_client_token(
        &self,
        encryptor: &TokenEncryptor,
        input: &OAuth2ClientTokenCreationInput,
    ) -> CoreResult<OAuth2ClientToken> {
        CoreError::require_id(&input.client_id)?;
        CoreError::require_id(&input.belongs_to_user)?;
        if input.code.is_empty() || input.access.is_empty() || input.refresh.is_empty() {
            return Err(CoreError::NilInput);
        }

        let now = self.now();
        let id = self.new_id();
        let code = encryptor.encrypt(&input.code)?;
        let access = encryptor.encrypt(&input.access)?;
        let refresh = encryptor.encrypt(&input.refresh)?;

        sqlx::query(
            "INSERT INTO oauth2_client_tokens \
               (id, client_id, belongs_to_user, scope, code, access, refresh, \
                redirect_uri, code_challenge, code_challenge_method, \
                code_created_at, access_created_at, refresh_created_at, \
                code_expires_at, access_expires_at, refresh_expires_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&input.client_id)
        .bind(&input.belongs_to_user)
        .bind(&input.scope)
        .bind(&code)
        .bind(&access)
        .bind(&refresh)
        .bind(&input.redirect_uri)
        .bind(&input.code_challenge)
        .bind(&input.code_challenge_method)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(input.code_expires_at)
        .bind(input.access_expires_at)
        .bind(input.refresh_expires_at)
        .bind(now)
        .execute(self.pool())
        .await?;

        info!(
            target = "mealwise",
            event = "oauth2_token_created",
            token_id = %id,
            client_id = %input.client_id
        );

        Ok(OAuth2ClientToken {
            id,
            client_id: input.client_id.clone(),
            belongs_to_user: input.belongs_to_user.clone(),
            scope: input.scope.clone(),
            code: input.code.clone(),
            access: input.access.clone(),
            refresh: input.refresh.clone(),
            redirect_uri: input.redirect_uri.clone(),
            code_challenge: input.code_challenge.clone(),
            code_challenge_method: input.code_challenge_method.clone(),
            code_created_at: now,
            access_created_at: now,
            refresh_created_at: now,
            code_expires_at: input.code_expires_at,
            access_expires_at: input.access_expires_at,
            refresh_expires_at: input.refresh_expires_at,
            code_expires_in: input.code_expires_at - now,
            access_expires_in: input.access_expires_at - now,
            refresh_expires_in: input.refresh_expires_at - now,
            created_at: now,
        })
    }

    pub async fn get_oauth2_client_token_by_code(
        &self,
        encryptor: &TokenEncryptor,
        code: &str,
    ) -> CoreResult<OAuth2ClientToken> {
        self.get_token_by_secret(encryptor, SecretColumn::Code, code)
            .await
    }

    pub async fn get_oauth2_client_token_by_access(
        &self,
        encryptor: &TokenEncryptor,
        access: &str,
    ) -> CoreResult<OAuth2ClientToken> {
        self.get_token_by_secret(encryptor, SecretColumn::Access, access)
            .await
    }

    pub async fn get_oauth2_client_token_by_refresh(
        &self,
        encryptor: &TokenEncryptor,
        refresh: &str,
    ) -> CoreResult<OAuth2ClientToken> {
        self.get_token_by_secret(encryptor, SecretColumn::Refresh, refresh)
            .await
    }

    /// Deterministic encryption lets the lookup encrypt the probe and match
    /// on ciphertext equality instead of decrypting every row.
    async fn get_token_by_secret(
        &self,
        encryptor: &TokenEncryptor,
        column: SecretColumn,
        secret: &str,
    ) -> CoreResult<OAuth2ClientToken> {
        if secret.is_empty() {
            return Err(CoreError::InvalidId);
        }
        let probe = encryptor.encrypt(secret)?;
        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM oauth2_client_tokens \
             WHERE {column} = ? AND archived_at IS NULL",
            column = column.name(),
        );
        let row = sqlx::query(&sql)
            .bind(&probe)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CoreError::NotFound)?;
        decode_token(encryptor, row)
    }

    pub async fn archive_oauth2_client_token(&self, id: &str) -> CoreResult<()> {
        CoreError::require_id(id)?;
        let res = sqlx::query(
            "UPDATE oauth2_client_tokens SET archived_at = ?, last_updated_at = ? \
             WHERE id = ? AND archived_at IS NULL",
        )
        .bind(self.now())
        .bind(self.now())
        .bind(id)
        .execute(self.pool())
        .await?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound);
        }
        Ok(())
    }

    /// Maintenance sweep: hard-delete tokens whose code, access, and
    /// refresh expiries all lie more than a day in the past. The only hard
    /// deletion in the system.
    pub async fn delete_expired_oauth2_client_tokens(&self) -> CoreResult<u64> {
        let cutoff = self.now() - ONE_DAY_MS;
        let res = sqlx::query(
            "DELETE FROM oauth2_client_tokens \
             WHERE code_expires_at < ? AND access_expires_at < ? AND refresh_expires_at < ?",
        )
        .bind(cutoff)
        .bind(cutoff)
        .bind(cutoff)
        .execute(self.pool())
        .await?;
        let deleted = res.rows_affected();
        if deleted > 0 {
            info!(
                target = "mealwise",
                event = "expired_oauth2_tokens_deleted",
                count = deleted
            );
        }
        Ok(deleted)
    }
}

fn decode_token(encryptor: &TokenEncryptor, row: SqliteRow) -> CoreResult<OAuth2ClientToken> {
    let code_created_at: i64 = row.try_get("code_created_at")?;
    let access_created_at: i64 = row.try_get("access_created_at")?;
    let refresh_created_at: i64 = row.try_get("refresh_created_at")?;
    let code_expires_at: i64 = row.try_get("code_expires_at")?;
    let access_expires_at: i64 = row.try_get("access_expires_at")?;
    let refresh_expires_at: i64 = row.try_get("refresh_expires_at")?;

    Ok(OAuth2ClientToken {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        belongs_to_user: row.try_get("belongs_to_user")?,
        scope: row.try_get("scope")?,
        code: encryptor.decrypt(&row.try_get::<String, _>("code")?)?,
        access: encryptor.decrypt(&row.try_get::<String, _>("access")?)?,
        refresh: encryptor.decrypt(&row.try_get::<String, _>("refresh")?)?,
        redirect_uri: row.try_get("redirect_uri")?,
        code_challenge: row.try_get("code_challenge")?,
        code_challenge_method: row.try_get("code_challenge_method")?,
        code_created_at,
        access_created_at,
        refresh_created_at,
        code_expires_at,
        access_expires_at,
        refresh_expires_at,
        code_expires_in: code_expires_at - code_created_at,
        access_expires_in: access_expires_at - access_created_at,
        refresh_expires_in: refresh_expires_at - refresh_created_at,
        created_at: row.try_get("created_at")?,
    })
}

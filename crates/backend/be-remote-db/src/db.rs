use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    migrate::MigrateDatabase,
    postgres::{PgPool, PgPoolOptions},
};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{DbError, DbResult},
    repository::{
        ClientRepository, DeploymentRepository, DeviceRepository, ReleaseRepository, Repository,
        UpdateRepository,
    },
    types::{Client, Deployment, DeploymentStatus, Device, Release, Update},
};

const UPDATE_COLUMNS: &str = "id, version, title, description, changelog, security_fixes, \
     file_path, file_hash, digital_signature, file_size, update_type, severity, \
     is_security_update, target_device_types, is_active, created_at, updated_at";

const RELEASE_COLUMNS: &str = "id, update_id, release_date, is_active, is_mandatory, \
     minimum_version, max_postpone_days, release_notes, created_at";

const DEVICE_COLUMNS: &str = "id, device_identifier, device_name, device_type, tenant_id, \
     current_version, registered_at, last_seen_at, last_update_check, is_active, \
     automatic_updates, update_schedule, maintenance_window_start, maintenance_window_end, \
     skip_non_security_updates, postpone_security_updates";

const DEPLOYMENT_COLUMNS: &str = "id, release_id, device_id, status, scheduled_at, started_at, \
     completed_at, error_message, retry_count, last_retry_at, postpone_reason, postpone_count, \
     last_postponed_at, download_progress, install_progress, created_at";

const CLIENT_COLUMNS: &str = "id, name, description, webhook_url, webhook_secret, is_active, \
     last_webhook_success, last_webhook_failure, consecutive_failures, contact_email, created_at";

#[derive(Debug)]
pub struct DatabaseManager {
    pub pool: PgPool,
}

impl DatabaseManager {
    pub async fn new(database_url: &str) -> DbResult<Self> {
        if !sqlx::Postgres::database_exists(database_url).await? {
            info!("Database does not exist, creating it");
            sqlx::Postgres::create_database(database_url).await?;
        }

        let pool = PgPoolOptions::new()
            .max_connections(50)
            .min_connections(3)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        let db_manager = DatabaseManager { pool };

        Self::run_migrations(&db_manager.pool).await?;

        Ok(db_manager)
    }

    async fn run_migrations(pool: &PgPool) -> DbResult<()> {
        let migrator = sqlx::migrate!("./src/migrations");
        migrator.run(pool).await?;
        debug!("Database migrations applied");
        Ok(())
    }

    async fn delete_row(&self, table: &str, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// updates
// ---------------------------------------------------------------------------

#[async_trait]
impl Repository<Update> for DatabaseManager {
    async fn get(&self, id: Uuid) -> DbResult<Option<Update>> {
        let update = sqlx::query_as::<_, Update>(&format!(
            "SELECT {UPDATE_COLUMNS} FROM updates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(update)
    }

    async fn list(&self) -> DbResult<Vec<Update>> {
        let updates = sqlx::query_as::<_, Update>(&format!(
            "SELECT {UPDATE_COLUMNS} FROM updates ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(updates)
    }

    async fn create(&self, update: Update) -> DbResult<Update> {
        let update = sqlx::query_as::<_, Update>(&format!(
            r#"
            INSERT INTO updates ({UPDATE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {UPDATE_COLUMNS}
            "#
        ))
        .bind(update.id)
        .bind(&update.version)
        .bind(&update.title)
        .bind(&update.description)
        .bind(&update.changelog)
        .bind(&update.security_fixes)
        .bind(&update.file_path)
        .bind(&update.file_hash)
        .bind(&update.digital_signature)
        .bind(update.file_size)
        .bind(update.update_type)
        .bind(update.severity)
        .bind(update.is_security_update)
        .bind(&update.target_device_types)
        .bind(update.is_active)
        .bind(update.created_at)
        .bind(update.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(update)
    }

    async fn update(&self, update: Update) -> DbResult<Update> {
        let id = update.id;
        sqlx::query_as::<_, Update>(&format!(
            r#"
            UPDATE updates
            SET title = $2, description = $3, changelog = $4, security_fixes = $5,
                update_type = $6, severity = $7, is_security_update = $8,
                target_device_types = $9, is_active = $10, updated_at = $11, version = $12
            WHERE id = $1
            RETURNING {UPDATE_COLUMNS}
            "#
        ))
        .bind(update.id)
        .bind(&update.title)
        .bind(&update.description)
        .bind(&update.changelog)
        .bind(&update.security_fixes)
        .bind(update.update_type)
        .bind(update.severity)
        .bind(update.is_security_update)
        .bind(&update.target_device_types)
        .bind(update.is_active)
        .bind(update.updated_at)
        .bind(&update.version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found_with_id("update", id.to_string()))
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        self.delete_row("updates", id).await
    }
}

#[async_trait]
impl UpdateRepository for DatabaseManager {
    async fn get_by_version(&self, version: &str) -> DbResult<Option<Update>> {
        let update = sqlx::query_as::<_, Update>(&format!(
            "SELECT {UPDATE_COLUMNS} FROM updates WHERE version = $1"
        ))
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(update)
    }

    async fn list_active(&self) -> DbResult<Vec<Update>> {
        let updates = sqlx::query_as::<_, Update>(&format!(
            "SELECT {UPDATE_COLUMNS} FROM updates WHERE is_active ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(updates)
    }
}

// ---------------------------------------------------------------------------
// releases
// ---------------------------------------------------------------------------

#[async_trait]
impl Repository<Release> for DatabaseManager {
    async fn get(&self, id: Uuid) -> DbResult<Option<Release>> {
        let release = sqlx::query_as::<_, Release>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(release)
    }

    async fn list(&self) -> DbResult<Vec<Release>> {
        let releases = sqlx::query_as::<_, Release>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(releases)
    }

    async fn create(&self, release: Release) -> DbResult<Release> {
        let release = sqlx::query_as::<_, Release>(&format!(
            r#"
            INSERT INTO releases ({RELEASE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {RELEASE_COLUMNS}
            "#
        ))
        .bind(release.id)
        .bind(release.update_id)
        .bind(release.release_date)
        .bind(release.is_active)
        .bind(release.is_mandatory)
        .bind(&release.minimum_version)
        .bind(release.max_postpone_days)
        .bind(&release.release_notes)
        .bind(release.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(release)
    }

    async fn update(&self, release: Release) -> DbResult<Release> {
        let id = release.id;
        sqlx::query_as::<_, Release>(&format!(
            r#"
            UPDATE releases
            SET release_date = $2, is_active = $3, is_mandatory = $4, minimum_version = $5,
                max_postpone_days = $6, release_notes = $7
            WHERE id = $1
            RETURNING {RELEASE_COLUMNS}
            "#
        ))
        .bind(release.id)
        .bind(release.release_date)
        .bind(release.is_active)
        .bind(release.is_mandatory)
        .bind(&release.minimum_version)
        .bind(release.max_postpone_days)
        .bind(&release.release_notes)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found_with_id("release", id.to_string()))
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        self.delete_row("releases", id).await
    }
}

#[async_trait]
impl ReleaseRepository for DatabaseManager {
    async fn list_active(&self) -> DbResult<Vec<Release>> {
        let releases = sqlx::query_as::<_, Release>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE is_active ORDER BY release_date DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(releases)
    }

    async fn list_by_update(&self, update_id: Uuid) -> DbResult<Vec<Release>> {
        let releases = sqlx::query_as::<_, Release>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE update_id = $1 ORDER BY id"
        ))
        .bind(update_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(releases)
    }
}

// ---------------------------------------------------------------------------
// devices
// ---------------------------------------------------------------------------

#[async_trait]
impl Repository<Device> for DatabaseManager {
    async fn get(&self, id: Uuid) -> DbResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    async fn list(&self) -> DbResult<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(devices)
    }

    async fn create(&self, device: Device) -> DbResult<Device> {
        let device = sqlx::query_as::<_, Device>(&format!(
            r#"
            INSERT INTO devices ({DEVICE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(device.id)
        .bind(&device.device_identifier)
        .bind(&device.device_name)
        .bind(&device.device_type)
        .bind(&device.tenant_id)
        .bind(&device.current_version)
        .bind(device.registered_at)
        .bind(device.last_seen_at)
        .bind(device.last_update_check)
        .bind(device.is_active)
        .bind(device.automatic_updates)
        .bind(&device.update_schedule)
        .bind(&device.maintenance_window_start)
        .bind(&device.maintenance_window_end)
        .bind(device.skip_non_security_updates)
        .bind(device.postpone_security_updates)
        .fetch_one(&self.pool)
        .await?;

        Ok(device)
    }

    async fn update(&self, device: Device) -> DbResult<Device> {
        let id = device.id;
        sqlx::query_as::<_, Device>(&format!(
            r#"
            UPDATE devices
            SET device_identifier = $2, device_name = $3, device_type = $4, tenant_id = $5,
                current_version = $6, last_seen_at = $7, last_update_check = $8,
                is_active = $9, automatic_updates = $10, update_schedule = $11,
                maintenance_window_start = $12, maintenance_window_end = $13,
                skip_non_security_updates = $14, postpone_security_updates = $15
            WHERE id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(device.id)
        .bind(&device.device_identifier)
        .bind(&device.device_name)
        .bind(&device.device_type)
        .bind(&device.tenant_id)
        .bind(&device.current_version)
        .bind(device.last_seen_at)
        .bind(device.last_update_check)
        .bind(device.is_active)
        .bind(device.automatic_updates)
        .bind(&device.update_schedule)
        .bind(&device.maintenance_window_start)
        .bind(&device.maintenance_window_end)
        .bind(device.skip_non_security_updates)
        .bind(device.postpone_security_updates)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found_with_id("device", id.to_string()))
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        self.delete_row("devices", id).await
    }
}

#[async_trait]
impl DeviceRepository for DatabaseManager {
    async fn get_by_identifier(&self, device_identifier: &str) -> DbResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE device_identifier = $1"
        ))
        .bind(device_identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> DbResult<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE tenant_id = $1 ORDER BY id"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(devices)
    }
}

// ---------------------------------------------------------------------------
// deployments
// ---------------------------------------------------------------------------

impl DatabaseManager {
    async fn list_deployments_by(&self, column: &str, id: Uuid) -> DbResult<Vec<Deployment>> {
        let deployments = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE {column} = $1 ORDER BY id"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(deployments)
    }
}

#[async_trait]
impl Repository<Deployment> for DatabaseManager {
    async fn get(&self, id: Uuid) -> DbResult<Option<Deployment>> {
        let deployment = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deployment)
    }

    async fn list(&self) -> DbResult<Vec<Deployment>> {
        let deployments = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(deployments)
    }

    async fn create(&self, deployment: Deployment) -> DbResult<Deployment> {
        let deployment = sqlx::query_as::<_, Deployment>(&format!(
            r#"
            INSERT INTO deployments ({DEPLOYMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {DEPLOYMENT_COLUMNS}
            "#
        ))
        .bind(deployment.id)
        .bind(deployment.release_id)
        .bind(deployment.device_id)
        .bind(deployment.status)
        .bind(deployment.scheduled_at)
        .bind(deployment.started_at)
        .bind(deployment.completed_at)
        .bind(&deployment.error_message)
        .bind(deployment.retry_count)
        .bind(deployment.last_retry_at)
        .bind(&deployment.postpone_reason)
        .bind(deployment.postpone_count)
        .bind(deployment.last_postponed_at)
        .bind(deployment.download_progress)
        .bind(deployment.install_progress)
        .bind(deployment.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(deployment)
    }

    async fn update(&self, deployment: Deployment) -> DbResult<Deployment> {
        let id = deployment.id;
        sqlx::query_as::<_, Deployment>(&format!(
            r#"
            UPDATE deployments
            SET status = $2, scheduled_at = $3, started_at = $4, completed_at = $5,
                error_message = $6, retry_count = $7, last_retry_at = $8,
                postpone_reason = $9, postpone_count = $10, last_postponed_at = $11,
                download_progress = $12, install_progress = $13
            WHERE id = $1
            RETURNING {DEPLOYMENT_COLUMNS}
            "#
        ))
        .bind(deployment.id)
        .bind(deployment.status)
        .bind(deployment.scheduled_at)
        .bind(deployment.started_at)
        .bind(deployment.completed_at)
        .bind(&deployment.error_message)
        .bind(deployment.retry_count)
        .bind(deployment.last_retry_at)
        .bind(&deployment.postpone_reason)
        .bind(deployment.postpone_count)
        .bind(deployment.last_postponed_at)
        .bind(deployment.download_progress)
        .bind(deployment.install_progress)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found_with_id("deployment", id.to_string()))
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        self.delete_row("deployments", id).await
    }
}

#[async_trait]
impl DeploymentRepository for DatabaseManager {
    async fn list_by_device(&self, device_id: Uuid) -> DbResult<Vec<Deployment>> {
        self.list_deployments_by("device_id", device_id).await
    }

    async fn list_by_release(&self, release_id: Uuid) -> DbResult<Vec<Deployment>> {
        self.list_deployments_by("release_id", release_id).await
    }

    async fn list_by_status(&self, status: DeploymentStatus) -> DbResult<Vec<Deployment>> {
        let deployments = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE status = $1 ORDER BY id"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(deployments)
    }

    async fn find_active(
        &self,
        release_id: Uuid,
        device_id: Uuid,
    ) -> DbResult<Option<Deployment>> {
        let deployment = sqlx::query_as::<_, Deployment>(&format!(
            r#"
            SELECT {DEPLOYMENT_COLUMNS} FROM deployments
            WHERE release_id = $1 AND device_id = $2
              AND status IN ('pending', 'downloading', 'installing')
            "#
        ))
        .bind(release_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deployment)
    }

    async fn create_if_idle(&self, deployment: Deployment) -> DbResult<Option<Deployment>> {
        // Backed by the deployments_active_release_device partial unique index.
        let created = sqlx::query_as::<_, Deployment>(&format!(
            r#"
            INSERT INTO deployments ({DEPLOYMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (release_id, device_id)
                WHERE status IN ('pending', 'downloading', 'installing')
                DO NOTHING
            RETURNING {DEPLOYMENT_COLUMNS}
            "#
        ))
        .bind(deployment.id)
        .bind(deployment.release_id)
        .bind(deployment.device_id)
        .bind(deployment.status)
        .bind(deployment.scheduled_at)
        .bind(deployment.started_at)
        .bind(deployment.completed_at)
        .bind(&deployment.error_message)
        .bind(deployment.retry_count)
        .bind(deployment.last_retry_at)
        .bind(&deployment.postpone_reason)
        .bind(deployment.postpone_count)
        .bind(deployment.last_postponed_at)
        .bind(deployment.download_progress)
        .bind(deployment.install_progress)
        .bind(deployment.created_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(created)
    }

    async fn update_if_unchanged(
        &self,
        previous: &Deployment,
        next: Deployment,
    ) -> DbResult<Option<Deployment>> {
        let id = next.id;
        let saved = sqlx::query_as::<_, Deployment>(&format!(
            r#"
            UPDATE deployments
            SET status = $2, scheduled_at = $3, started_at = $4, completed_at = $5,
                error_message = $6, retry_count = $7, last_retry_at = $8,
                postpone_reason = $9, postpone_count = $10, last_postponed_at = $11,
                download_progress = $12, install_progress = $13
            WHERE id = $1 AND status = $14 AND retry_count = $15 AND postpone_count = $16
            RETURNING {DEPLOYMENT_COLUMNS}
            "#
        ))
        .bind(next.id)
        .bind(next.status)
        .bind(next.scheduled_at)
        .bind(next.started_at)
        .bind(next.completed_at)
        .bind(&next.error_message)
        .bind(next.retry_count)
        .bind(next.last_retry_at)
        .bind(&next.postpone_reason)
        .bind(next.postpone_count)
        .bind(next.last_postponed_at)
        .bind(next.download_progress)
        .bind(next.install_progress)
        .bind(previous.status)
        .bind(previous.retry_count)
        .bind(previous.postpone_count)
        .fetch_optional(&self.pool)
        .await?;

        match saved {
            Some(saved) => Ok(Some(saved)),
            None if <Self as Repository<Deployment>>::get(self, id).await?.is_some() => Ok(None),
            None => Err(DbError::not_found_with_id("deployment", id.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// clients
// ---------------------------------------------------------------------------

#[async_trait]
impl Repository<Client> for DatabaseManager {
    async fn get(&self, id: Uuid) -> DbResult<Option<Client>> {
        let client = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }

    async fn list(&self) -> DbResult<Vec<Client>> {
        let clients = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(clients)
    }

    async fn create(&self, client: Client) -> DbResult<Client> {
        let client = sqlx::query_as::<_, Client>(&format!(
            r#"
            INSERT INTO clients ({CLIENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {CLIENT_COLUMNS}
            "#
        ))
        .bind(client.id)
        .bind(&client.name)
        .bind(&client.description)
        .bind(&client.webhook_url)
        .bind(&client.webhook_secret)
        .bind(client.is_active)
        .bind(client.last_webhook_success)
        .bind(client.last_webhook_failure)
        .bind(client.consecutive_failures)
        .bind(&client.contact_email)
        .bind(client.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(client)
    }

    async fn update(&self, client: Client) -> DbResult<Client> {
        let id = client.id;
        sqlx::query_as::<_, Client>(&format!(
            r#"
            UPDATE clients
            SET name = $2, description = $3, webhook_url = $4, webhook_secret = $5,
                is_active = $6, last_webhook_success = $7, last_webhook_failure = $8,
                consecutive_failures = $9, contact_email = $10
            WHERE id = $1
            RETURNING {CLIENT_COLUMNS}
            "#
        ))
        .bind(client.id)
        .bind(&client.name)
        .bind(&client.description)
        .bind(&client.webhook_url)
        .bind(&client.webhook_secret)
        .bind(client.is_active)
        .bind(client.last_webhook_success)
        .bind(client.last_webhook_failure)
        .bind(client.consecutive_failures)
        .bind(&client.contact_email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found_with_id("client", id.to_string()))
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        self.delete_row("clients", id).await
    }
}

#[async_trait]
impl ClientRepository for DatabaseManager {
    async fn list_active(&self) -> DbResult<Vec<Client>> {
        let clients = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE is_active ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(clients)
    }

    async fn record_webhook_result(
        &self,
        id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let query = if success {
            r#"
            UPDATE clients
            SET last_webhook_success = $2, consecutive_failures = 0
            WHERE id = $1
            "#
        } else {
            r#"
            UPDATE clients
            SET last_webhook_failure = $2, consecutive_failures = consecutive_failures + 1
            WHERE id = $1
            "#
        };

        let result = sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found_with_id("client", id.to_string()));
        }
        Ok(())
    }
}

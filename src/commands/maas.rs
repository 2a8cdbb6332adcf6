use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostprep::Settings;
use hostprep::actions::{service, user};
use hostprep::actions::user::UserIdentity;
use hostprep::db;
use hostprep::error::ProvisionError;
use hostprep::exec::Cmd;
use hostprep::facts::{self, HostFacts, PackageManager};
use hostprep::fs_util;
use hostprep::runner::Step;
use hostprep::secret::{DEFAULT_SECRET_BYTES, Secret};
use hostprep::sink::{CREDENTIALS_MODE, CredentialRecord};

use crate::cli::args::MaasArgs;
use crate::cli::output::{self, OutputOptions};
use crate::commands::steps::{EnsurePackagesStep, owned_by, run_flow};

const POSTGRES_UNIT: &str = "postgresql";
const MAAS_SNAP: &str = "maas";
const REGIOND_CONF: &str = "/var/snap/maas/current/regiond.conf";

pub(crate) struct MaasSummary {
    pub(crate) maas_url: String,
    pub(crate) channel: String,
    pub(crate) admin_username: String,
    pub(crate) admin_email: String,
    pub(crate) admin_password: Secret,
    pub(crate) admin_password_generated: bool,
    pub(crate) db_name: String,
    pub(crate) db_user: String,
    pub(crate) db_password: Secret,
    pub(crate) db_password_generated: bool,
    pub(crate) credentials_path: PathBuf,
}

/// Everything the MAAS steps share: immutable configuration, discovered
/// facts, and the secrets resolved once at flow construction.
struct MaasData {
    settings: Settings,
    facts: HostFacts,
    db_password: Secret,
    db_password_generated: bool,
    admin_password: Secret,
    admin_password_generated: bool,
    owner: UserIdentity,
    credentials_path: PathBuf,
    command_timeout: Duration,
}

impl MaasData {
    fn database_uri(&self) -> String {
        db::build_db_dsn(
            &self.settings.db.user,
            self.db_password.expose(),
            &self.settings.db.host,
            self.settings.db.port,
            &self.settings.db.name,
        )
    }

    fn record(&self) -> CredentialRecord {
        let mut record =
            CredentialRecord::new(self.credentials_path.clone(), Some(self.owner.clone()));
        record.push("MAAS_URL", &self.settings.maas.url);
        record.push("MAAS_ADMIN_USERNAME", &self.settings.maas.admin_username);
        record.push_secret("MAAS_ADMIN_PASSWORD", &self.admin_password);
        record.push("MAAS_ADMIN_EMAIL", &self.settings.maas.admin_email);
        record.push("MAAS_DB_NAME", &self.settings.db.name);
        record.push("MAAS_DB_USER", &self.settings.db.user);
        record.push_secret("MAAS_DB_PASSWORD", &self.db_password);
        record
    }

    /// Can the application role authenticate over TCP with the resolved
    /// password? This is the real "database is provisioned" condition: it
    /// catches both a missing role and a stale password from an earlier run.
    async fn db_auth_ok(&self) -> Result<bool, ProvisionError> {
        let settings = &self.settings;
        let output = Cmd::new("psql")
            .args(db::auth_check_args(
                &settings.db.host,
                settings.db.port,
                &settings.db.user,
                &settings.db.name,
            ))
            .env("PGPASSWORD", self.db_password.expose())
            .label("psql (auth probe)")
            .output()
            .await?;
        Ok(output.success && output.stdout_trimmed() == "1")
    }
}

pub(crate) async fn run(
    _args: &MaasArgs,
    settings: &Settings,
    options: OutputOptions,
) -> anyhow::Result<()> {
    let facts = facts::discover().await?;
    if !facts.has_systemctl {
        return Err(
            ProvisionError::validation("systemctl is required to manage PostgreSQL").into(),
        );
    }

    let owner_name = match &settings.credentials.owner {
        Some(owner) => owner.clone(),
        None => facts::invoking_user()?,
    };
    if owner_name == "root" {
        return Err(ProvisionError::validation(
            "credentials must be owned by a non-root user",
        )
        .into());
    }
    let owner = user::lookup_user(&owner_name).await?;
    let credentials_path = owner
        .home
        .join(&settings.credentials.app_dir)
        .join(&settings.credentials.file_name);

    let (db_password, db_password_generated) = resolve_password(settings.db.password.as_deref())?;
    let (admin_password, admin_password_generated) =
        resolve_password(settings.maas.admin_password.as_deref())?;

    let data = Arc::new(MaasData {
        settings: settings.clone(),
        facts,
        db_password,
        db_password_generated,
        admin_password,
        admin_password_generated,
        owner,
        credentials_path,
        command_timeout: settings.command_timeout()?,
    });

    let steps: Vec<Box<dyn Step>> = vec![
        Box::new(EnsurePackagesStep {
            name: "packages-installed",
            manager: data.facts.package_manager,
            packages: database_packages(data.facts.package_manager),
            timeout: data.command_timeout,
        }),
        Box::new(DatabaseProvisionedStep { data: Arc::clone(&data) }),
        Box::new(DatabaseHardenedStep { data: Arc::clone(&data) }),
        Box::new(ServiceInstalledStep { data: Arc::clone(&data) }),
        Box::new(ServiceInitializedStep { data: Arc::clone(&data) }),
        Box::new(AdminCreatedStep { data: Arc::clone(&data) }),
        Box::new(CredentialsPersistedStep { data: Arc::clone(&data) }),
    ];

    let report = run_flow(&steps).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_report(&report);
        output::print_maas_summary(
            &MaasSummary {
                maas_url: data.settings.maas.url.clone(),
                channel: data.settings.maas.channel.clone(),
                admin_username: data.settings.maas.admin_username.clone(),
                admin_email: data.settings.maas.admin_email.clone(),
                admin_password: data.admin_password.clone(),
                admin_password_generated: data.admin_password_generated,
                db_name: data.settings.db.name.clone(),
                db_user: data.settings.db.user.clone(),
                db_password: data.db_password.clone(),
                db_password_generated: data.db_password_generated,
                credentials_path: data.credentials_path.clone(),
            },
            options.show_secrets,
        );
    }
    Ok(())
}

/// One consistent secret-acquisition strategy per field: an explicit value
/// wins, otherwise the value is generated. Never interactive.
fn resolve_password(configured: Option<&str>) -> Result<(Secret, bool), ProvisionError> {
    match configured {
        Some(value) if !value.trim().is_empty() => {
            Ok((Secret::provided_password(value.to_string()), false))
        }
        Some(_) => Err(ProvisionError::validation(
            "configured password must not be empty",
        )),
        None => Ok((Secret::generate_password(DEFAULT_SECRET_BYTES)?, true)),
    }
}

fn database_packages(manager: PackageManager) -> Vec<String> {
    match manager {
        PackageManager::Apt => vec!["postgresql".to_string()],
        PackageManager::Dnf => vec!["postgresql-server".to_string()],
    }
}

async fn admin_sql(sql: &str, label: &str) -> Result<String, ProvisionError> {
    let output = Cmd::new("sudo")
        .args(db::admin_psql_args())
        .stdin(sql.as_bytes().to_vec())
        .label(format!("sudo -u postgres psql ({label})"))
        .run()
        .await?;
    Ok(output.stdout)
}

async fn admin_sql_probe(sql: &str, label: &str) -> Result<bool, ProvisionError> {
    let stdout = admin_sql(sql, label).await?;
    Ok(stdout.trim() == "1")
}

/// `Start -> PackagesInstalled -> DatabaseProvisioned`: application role and
/// database exist and the role authenticates with the resolved password.
struct DatabaseProvisionedStep {
    data: Arc<MaasData>,
}

#[async_trait]
impl Step for DatabaseProvisionedStep {
    fn name(&self) -> &'static str {
        "database-provisioned"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        self.data.db_auth_ok().await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        let settings = &self.data.settings;
        service::ensure_enabled_and_running(
            POSTGRES_UNIT,
            settings.service.poll_attempts,
            settings.poll_interval(),
        )
        .await?;

        let role_exists =
            admin_sql_probe(&db::role_exists_sql(&settings.db.user), "role exists").await?;
        if role_exists {
            // Realign the password: the role may carry one from a previous
            // partial run.
            admin_sql(
                &db::alter_role_password_sql(&settings.db.user, self.data.db_password.expose()),
                "alter role",
            )
            .await?;
        } else {
            admin_sql(
                &db::create_role_sql(&settings.db.user, self.data.db_password.expose()),
                "create role",
            )
            .await?;
        }

        let db_exists =
            admin_sql_probe(&db::database_exists_sql(&settings.db.name), "database exists")
                .await?;
        if !db_exists {
            admin_sql(
                &db::create_database_sql(&settings.db.name, &settings.db.user),
                "create database",
            )
            .await?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        self.data.db_auth_ok().await
    }
}

/// `DatabaseProvisioned -> DatabaseHardened`: the pg_hba rule for the
/// application role is present and `PostgreSQL` picked it up.
struct DatabaseHardenedStep {
    data: Arc<MaasData>,
}

impl DatabaseHardenedStep {
    fn rule(&self) -> String {
        db::pg_hba_rule(&self.data.settings.db.name, &self.data.settings.db.user)
    }

    async fn hba_path(&self) -> Result<PathBuf, ProvisionError> {
        let major = facts::detect_postgres_major().await?;
        facts::pg_hba_path(self.data.facts.package_manager, major)
    }
}

#[async_trait]
impl Step for DatabaseHardenedStep {
    fn name(&self) -> &'static str {
        "database-hardened"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        let path = self.hba_path().await?;
        Ok(fs_util::contains_line(&path, &self.rule()).await?
            && service::is_active(POSTGRES_UNIT).await?)
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        let path = self.hba_path().await?;
        fs_util::append_line_if_absent(&path, &self.rule()).await?;
        let settings = &self.data.settings;
        service::ensure_enabled_and_running(
            POSTGRES_UNIT,
            settings.service.poll_attempts,
            settings.poll_interval(),
        )
        .await
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        let path = self.hba_path().await?;
        Ok(fs_util::contains_line(&path, &self.rule()).await?
            && service::is_active(POSTGRES_UNIT).await?)
    }
}

/// `DatabaseHardened -> ServiceInstalled`: the MAAS snap is present at the
/// configured channel.
struct ServiceInstalledStep {
    data: Arc<MaasData>,
}

async fn snap_installed() -> Result<bool, ProvisionError> {
    let output = Cmd::new("snap").args(["list", MAAS_SNAP]).output().await?;
    Ok(output.success)
}

#[async_trait]
impl Step for ServiceInstalledStep {
    fn name(&self) -> &'static str {
        "service-installed"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        snap_installed().await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        let channel_arg = format!("--channel={}", self.data.settings.maas.channel);
        Cmd::new("snap")
            .args(["install", MAAS_SNAP, channel_arg.as_str()])
            .timeout(self.data.command_timeout)
            .run()
            .await?;
        Ok(())
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        snap_installed().await
    }
}

/// `ServiceInstalled -> ServiceInitialized`: region+rack initialized against
/// the provisioned database.
struct ServiceInitializedStep {
    data: Arc<MaasData>,
}

#[async_trait]
impl Step for ServiceInitializedStep {
    fn name(&self) -> &'static str {
        "service-initialized"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        Ok(tokio::fs::try_exists(Path::new(REGIOND_CONF))
            .await
            .unwrap_or(false))
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        let database_uri = self.data.database_uri();
        Cmd::new("maas")
            .args([
                "init",
                "region+rack",
                "--database-uri",
                database_uri.as_str(),
                "--maas-url",
                self.data.settings.maas.url.as_str(),
            ])
            .label(format!(
                "maas init region+rack --database-uri <redacted> --maas-url {}",
                self.data.settings.maas.url
            ))
            .timeout(self.data.command_timeout)
            .run()
            .await?;
        Ok(())
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        Ok(tokio::fs::try_exists(Path::new(REGIOND_CONF))
            .await
            .unwrap_or(false))
    }
}

/// `ServiceInitialized -> AdminCreated`.
struct AdminCreatedStep {
    data: Arc<MaasData>,
}

impl AdminCreatedStep {
    async fn admin_exists(&self) -> Result<bool, ProvisionError> {
        let output = Cmd::new("maas")
            .args([
                "apikey",
                "--username",
                self.data.settings.maas.admin_username.as_str(),
            ])
            .output()
            .await?;
        Ok(output.success)
    }
}

#[async_trait]
impl Step for AdminCreatedStep {
    fn name(&self) -> &'static str {
        "admin-created"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        self.admin_exists().await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        let settings = &self.data.settings;
        Cmd::new("maas")
            .args([
                "createadmin",
                "--username",
                settings.maas.admin_username.as_str(),
                "--password",
                self.data.admin_password.expose(),
                "--email",
                settings.maas.admin_email.as_str(),
            ])
            .label(format!(
                "maas createadmin --username {} --password <redacted> --email {}",
                settings.maas.admin_username, settings.maas.admin_email
            ))
            .run()
            .await?;
        Ok(())
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        self.admin_exists().await
    }
}

/// `AdminCreated -> CredentialsPersisted -> Done`.
struct CredentialsPersistedStep {
    data: Arc<MaasData>,
}

impl CredentialsPersistedStep {
    async fn satisfied(&self) -> Result<bool, ProvisionError> {
        let record = self.data.record();
        let path = record.path();
        if !fs_util::has_mode(path, CREDENTIALS_MODE).await? {
            return Ok(false);
        }
        if !owned_by(path, self.data.owner.uid)? {
            return Ok(false);
        }
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProvisionError::io(format!("failed to read {}", path.display()), e))?;
        Ok(record.matches_contents(&contents))
    }
}

#[async_trait]
impl Step for CredentialsPersistedStep {
    fn name(&self) -> &'static str {
        "credentials-persisted"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        self.satisfied().await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        self.data.record().persist().await?;
        Ok(())
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        self.satisfied().await
    }
}

use std::sync::Arc;
use watchdog_auth::{
    ApiKeyRepository, ApiKeyService, AuthService, LockoutService, LoginAttemptRepository,
    MfaRepository, PasswordResetService, ResetTokenRepository, TokenFamilyStore, UserRepository,
};
use watchdog_core::{
    audit::{AuditLogger, AuditRepository},
    config::Config,
    connect_redis,
    error::Result,
    jobs::queue::queues,
    rate_limit::RateLimiter,
    security::{CsrfService, FieldEncryption, JwtService, PasswordHasher, TotpService},
    session::{SessionConfig, SessionManager},
    DatabasePool, Error, RedisJobQueue,
};
use watchdog_pipeline::{
    alerts::{EmailSender, WebhookSender},
    AggregationService, AlertDispatchService, AlertRepository, AnomalyDetectionService,
    AnomalyRepository, CostRecordRepository, DocumentRepository, FilesystemStorage,
    IngestionService, MemoryStorage, ObjectStorage, OutboxRepository, RetentionRunner,
    master_data::{LocationRepository, OrganizationRepository, SupplierRepository},
};

/// Fully wired application state: every service the request handlers and
/// background workers need, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: DatabasePool,
    pub redis: redis::aio::ConnectionManager,

    pub audit: AuditLogger,
    pub rate_limiter: Arc<RateLimiter>,
    pub csrf: CsrfService,

    pub auth: Arc<AuthService>,
    pub api_keys: Arc<ApiKeyService>,
    pub password_reset: Arc<PasswordResetService>,
    pub lockout: Arc<LockoutService>,

    pub storage: Arc<dyn ObjectStorage>,
    pub ingestion: Arc<IngestionService>,
    pub anomaly_detection: Arc<AnomalyDetectionService>,
    pub aggregation: Arc<AggregationService>,
    pub alert_dispatch: Arc<AlertDispatchService>,
    pub retention_runner: Arc<RetentionRunner>,

    pub outbox: OutboxRepository,
    pub organizations: OrganizationRepository,
    pub queues: QueueSet,
}

/// The named queue handles.
#[derive(Clone)]
pub struct QueueSet {
    pub extraction: Arc<RedisJobQueue>,
    pub anomaly: Arc<RedisJobQueue>,
    pub aggregation: Arc<RedisJobQueue>,
    pub alerts: Arc<RedisJobQueue>,
    pub retention: Arc<RedisJobQueue>,
}

impl AppState {
    /// Connect to the stores and wire every service. Configuration has
    /// already passed its fatal-validation gate.
    pub async fn build(config: Config) -> Result<Self> {
        let db = DatabasePool::connect(&config.database).await?;
        let redis = connect_redis(&config.redis).await?;

        // Security primitives
        let jwt = JwtService::new(&config.jwt)?;
        let hasher = PasswordHasher::new(&config.security)?;
        let totp = TotpService::new("cost-watchdog", config.security.backup_code_pepper.clone());
        let csrf = CsrfService::new(config.cookie_secret());

        let encryption_key = if config.security.field_encryption_key.is_empty() {
            // Development fallback; production validation already required
            // a real key
            "development-only-key-32-bytes!!!".to_string()
        } else {
            config.security.field_encryption_key.clone()
        };
        let encryption = Arc::new(FieldEncryption::new(&encryption_key)?);

        // Audit
        let audit_repository = AuditRepository::new(db.clone());
        let audit = AuditLogger::new(audit_repository.clone());

        // Session and token state
        let sessions = Arc::new(SessionManager::new(
            redis.clone(),
            SessionConfig {
                session_ttl: chrono::Duration::seconds(config.jwt.refresh_token_expiry),
            },
        ));
        let families = Arc::new(TokenFamilyStore::new(
            redis.clone(),
            config.jwt.refresh_token_expiry as u64,
        ));
        let lockout = Arc::new(LockoutService::new(redis.clone(), &config.security));

        let rate_limiter = Arc::new(RateLimiter::new(
            redis.clone(),
            config.rate_limit.clone(),
            config.app.is_production(),
        ));

        // Auth services
        let users = UserRepository::new(db.clone());
        let attempts = LoginAttemptRepository::new(db.clone());
        let mfa = MfaRepository::new(db.clone());
        let reset_tokens = ResetTokenRepository::new(db.clone());

        let auth = Arc::new(AuthService::new(
            users.clone(),
            attempts.clone(),
            mfa,
            jwt,
            hasher.clone(),
            totp,
            Arc::clone(&encryption),
            Arc::clone(&sessions),
            Arc::clone(&families),
            Arc::clone(&lockout),
            audit.clone(),
        )?);

        let api_keys = Arc::new(ApiKeyService::new(
            ApiKeyRepository::new(db.clone()),
            audit.clone(),
        ));

        let password_reset = Arc::new(PasswordResetService::new(
            users,
            reset_tokens.clone(),
            hasher,
            Arc::clone(&sessions),
            Arc::clone(&families),
            Arc::clone(&rate_limiter),
            audit.clone(),
        ));

        // Object storage
        let storage: Arc<dyn ObjectStorage> = match config.storage.backend.as_str() {
            "memory" => Arc::new(MemoryStorage::new()),
            "filesystem" => Arc::new(FilesystemStorage::new(config.storage.root.clone())),
            other => {
                return Err(Error::configuration(format!(
                    "Unknown storage backend: {}",
                    other
                )))
            }
        };

        // Pipeline repositories and services
        let documents = DocumentRepository::new(db.clone());
        let records = CostRecordRepository::new(db.clone(), Arc::clone(&encryption));
        let locations = LocationRepository::new(db.clone());
        let suppliers = SupplierRepository::new(db.clone());
        let anomalies = AnomalyRepository::new(db.clone());
        let alerts = AlertRepository::new(db.clone());
        let outbox = OutboxRepository::new(db.clone());
        let organizations = OrganizationRepository::new(db.clone());

        let ingestion = Arc::new(IngestionService::new(
            db.clone(),
            documents.clone(),
            records.clone(),
            locations.clone(),
            suppliers.clone(),
            outbox.clone(),
            Arc::clone(&storage),
            audit.clone(),
        ));

        let anomaly_detection = Arc::new(AnomalyDetectionService::new(
            db.clone(),
            records.clone(),
            locations,
            suppliers,
            anomalies.clone(),
            outbox.clone(),
        ));

        let aggregation = Arc::new(AggregationService::new(db.clone(), records));

        let alert_dispatch = Arc::new(AlertDispatchService::new(
            db.clone(),
            alerts,
            anomalies,
            EmailSender::new(config.email.clone())?,
            WebhookSender::new(config.alerts.webhook_timeout_seconds)?,
            config.alerts.clone(),
            audit.clone(),
        ));

        let retention_runner = Arc::new(RetentionRunner::new(
            redis.clone(),
            outbox.clone(),
            attempts,
            reset_tokens,
            audit_repository,
            Arc::clone(&storage),
            audit.clone(),
            config.retention.clone(),
        ));

        let queues = QueueSet {
            extraction: Arc::new(RedisJobQueue::new(redis.clone(), queues::EXTRACTION)),
            anomaly: Arc::new(RedisJobQueue::new(redis.clone(), queues::ANOMALY)),
            aggregation: Arc::new(RedisJobQueue::new(redis.clone(), queues::AGGREGATION)),
            alerts: Arc::new(RedisJobQueue::new(redis.clone(), queues::ALERTS)),
            retention: Arc::new(RedisJobQueue::new(redis.clone(), queues::RETENTION)),
        };

        Ok(Self {
            config,
            db,
            redis,
            audit,
            rate_limiter,
            csrf,
            auth,
            api_keys,
            password_reset,
            lockout,
            storage,
            ingestion,
            anomaly_detection,
            aggregation,
            alert_dispatch,
            retention_runner,
            outbox,
            organizations,
            queues,
        })
    }
}

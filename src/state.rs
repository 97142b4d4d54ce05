use deadpool_postgres::Pool;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore, SemaphorePermit};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::progress::ProgressUpdate;
use crate::services::payments::{EdgeFunctionProcessor, PaymentProcessor};
use crate::services::progress::ProgressTelemetry;
use crate::services::storage::ObjectStorage;

/// The number of concurrent payment proof uploads.
pub const PROOF_UPLOAD_SLOTS: usize = 32;
/// The number of progress reports buffered before new ones are dropped.
pub const PROGRESS_QUEUE_CAPACITY: usize = 4096;

/// Bounds the number of proof uploads held in memory at once.
#[derive(Clone)]
pub struct UploadLimiter {
    semaphore: Arc<Semaphore>,
}

impl UploadLimiter {
    /// Creates a new `UploadLimiter`.
    pub fn new(slots: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(slots)),
        }
    }

    /// Acquires a permit from the semaphore.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| AppError::Internal("Upload limiter closed".to_string()))
    }

    /// Returns the number of available permits.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: Pool,
    /// The Redis connection manager.
    pub redis: ConnectionManager,
    /// The Redis client, used to open pub/sub connections.
    pub redis_client: redis::Client,
    /// The application's configuration.
    pub config: Config,
    /// The payment provider.
    pub payments: Arc<dyn PaymentProcessor>,
    /// The object storage for payment proofs.
    pub storage: ObjectStorage,
    /// The progress telemetry queue.
    pub telemetry: ProgressTelemetry,
    /// The proof upload limiter.
    pub upload_limiter: UploadLimiter,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// The `AppState` and the receiving end of the progress queue, which the
    /// caller hands to the telemetry worker.
    pub async fn new(config: &Config) -> Result<(Self, mpsc::Receiver<ProgressUpdate>)> {
        let db = crate::db::create_pool(&config.database_url, config.db_pool_max_size)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client.clone()).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        let payments: Arc<dyn PaymentProcessor> = Arc::new(EdgeFunctionProcessor::new(
            config.edge_functions_url.clone(),
            config.edge_functions_key.clone(),
        )?);
        tracing::info!("✅ Payment processor initialized: {}", config.edge_functions_url);

        let storage = ObjectStorage::new(&config.storage_dir, &config.storage_public_url);
        tracing::info!("✅ Object storage rooted at {}", config.storage_dir);

        let (telemetry, progress_rx) = ProgressTelemetry::new(PROGRESS_QUEUE_CAPACITY);
        tracing::info!("✅ Progress telemetry queue initialized");

        let upload_limiter = UploadLimiter::new(PROOF_UPLOAD_SLOTS);

        Ok((
            AppState {
                db,
                redis,
                redis_client,
                config: config.clone(),
                payments,
                storage,
                telemetry,
                upload_limiter,
            },
            progress_rx,
        ))
    }
}

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::FmtSubscriber;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use wallet_ledger::{
    api::http_routes::{routes, AppState},
    config::Config,
    infrastructure::{
        persistence::ledger_repository::PostgresLedgerRepository,
        redis::{idempotency_cache::RedisIdempotencyCache, lock_client::RedisLockClient},
    },
    use_cases::{
        execute_mutation::ExecuteMutationUseCase, get_balance::GetBalanceUseCase,
        get_transaction_history::GetTransactionHistoryUseCase, wallet_lock::WalletLockManager,
    },
};

#[derive(OpenApi)]
#[openapi(
    paths(
        wallet_ledger::api::http_routes::topup,
        wallet_ledger::api::http_routes::bonus,
        wallet_ledger::api::http_routes::spend,
        wallet_ledger::api::http_routes::get_balance,
        wallet_ledger::api::http_routes::get_transaction_history
    ),
    components(schemas(
        wallet_ledger::api::http_routes::MutationRequestDto,
        wallet_ledger::api::response::BalanceResponse,
        wallet_ledger::api::response::AssetBalanceDto,
        wallet_ledger::api::response::TransactionHistoryResponse,
        wallet_ledger::api::response::TransactionDto,
        wallet_ledger::api::response::ErrorResponseDto
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Cargar variables de entorno
    dotenv().ok();

    // 2. Configurar Logging/Tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting Wallet Ledger Service...");

    let config = Config::from_env()?;

    // 3. Configurar Conexión a Base de Datos
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;

    info!("Connected to Database");

    // 4. Configurar cliente Redis (cache de idempotencia + locks)
    let redis_client = redis::Client::open(config.redis_url.clone())?;
    let redis_conn = redis_client.get_connection_manager().await?;

    info!("Connected to Redis");

    // 5. Instanciar Dependencias (Infraestructura)
    let ledger_repo = Arc::new(PostgresLedgerRepository::new(pool.clone()));
    let lock_client = Arc::new(RedisLockClient::new(redis_conn.clone()));
    let idempotency_cache = Arc::new(RedisIdempotencyCache::new(
        redis_conn,
        config.idempotency_cache_ttl_seconds,
    ));
    let lock_manager = WalletLockManager::new(lock_client, config.wallet_lock_config());

    // 6. Instanciar Casos de Uso
    let execute_mutation_use_case =
        ExecuteMutationUseCase::new(ledger_repo.clone(), idempotency_cache, lock_manager);
    let get_balance_use_case = GetBalanceUseCase::new(ledger_repo.clone());
    let get_transaction_history_use_case = GetTransactionHistoryUseCase::new(ledger_repo.clone());

    // 7. Configurar Estado de la App Axum
    let app_state = Arc::new(AppState {
        execute_mutation_use_case,
        get_balance_use_case,
        get_transaction_history_use_case,
    });

    // 8. Configurar Rutas y Servidor HTTP
    let app = routes(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let addr = format!("0.0.0.0:{}", config.port);
    info!("HTTP Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

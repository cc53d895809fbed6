// Módulos de la aplicación
mod agent;
mod api;
mod app_state;
mod config;
mod guardrails;
mod ingest;
mod llm;
mod models;
mod tools;
mod vector_store;

use std::sync::{Arc, Mutex};

use axum::Router;
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::llm::TextEmbedder;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Inicializar gestor de LLMs
    let llm_manager = llm::LlmManager::from_config(&cfg).expect("Error inicializando LLM Manager");

    // 4. Construir o cargar el índice vectorial ANTES de aceptar tráfico.
    //    No es seguro responder consultas contra un índice a medio construir;
    //    si la construcción falla, el proceso termina aquí.
    let embedder: Arc<dyn TextEmbedder> = Arc::new(llm_manager.clone());
    let index_cfg = vector_store::IndexConfig::from_app_config(&cfg);
    let index = vector_store::DocumentIndex::open_or_build(&index_cfg, embedder)
        .await
        .expect("Error construyendo el índice de documentos");
    info!(
        "Índice listo: {} chunks de {} documentos.",
        index.len(),
        index.sources().len()
    );

    // 5. Inicializar guardarraíles
    let guardrails = guardrails::GuardrailStage::from_config_path(
        cfg.guardrail_config_path.as_deref(),
    )
    .expect("Error inicializando los guardarraíles");

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 6. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        llm_manager,
        index: Arc::new(index),
        guardrails: Arc::new(guardrails),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 7. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 8. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .unwrap();
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if webbrowser::open(&server_url).is_err() {
        info!(
            "No se pudo abrir el navegador. Por favor, accede a {} manualmente.",
            server_url
        );
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .unwrap();

    info!("✅ Servidor cerrado correctamente.");
}

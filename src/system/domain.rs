use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};


/// Errores operativos del gateway.
///
/// Cubre las fallas locales de cada componente; la política de propagación
/// es local salvo para las variantes de base de datos, que pueden escalar
/// a un evento fatal hacia el orquestador.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("argumento inválido: {0}")]
    InvalidArgument(String),

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("violación de protocolo: {0}")]
    ProtocolViolation(String),

    #[error("buffer de staging en cierre")]
    BufferShutdown,

    #[error("no se pudo conectar a la base de datos: {0}")]
    DbConnect(#[source] sqlx::Error),

    #[error("no se pudo insertar en la base de datos: {0}")]
    DbInsert(#[source] sqlx::Error),

    #[error("recurso agotado: {0}")]
    ResourceExhausted(String),
}


/// Eventos internos que los workers escalan al orquestador.
#[derive(Debug)]
pub enum InternalEvent {
    /// La base de datos quedó inalcanzable tras agotar los reintentos.
    FatalStorage,
}


pub fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("info".parse().unwrap());

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

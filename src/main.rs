//! Punto de entrada del gateway de sensores.
//!
//! El orquestador arma el pipeline completo y es dueño de su ciclo de vida:
//!
//! 1. Inicializa el logging estructurado y parsea el puerto de escucha.
//! 2. Carga el mapa sala-sensor (opcional) y crea el cableado de buffers y
//!    canales de control (`Channels`).
//! 3. Abre el socket de escucha (un fallo acá es fatal) y lanza las tareas:
//!    gestor de conexiones, analítica, persistencia e interfaz de comandos.
//! 4. Queda bloqueado esperando la terminación: SIGINT, SIGTERM o el evento
//!    fatal del storage worker.
//! 5. Cierre ordenado: primero deja de aceptar conexiones (el watch de
//!    cierre también apaga los clientes y la interfaz de comandos), después
//!    señala el cierre de ambos buffers para que los consumidores drenen lo
//!    pendiente, y por último espera a cada tarea.
//!
//! Código de salida: 0 tras un cierre por señal; distinto de 0 ante un fallo
//! de inicialización o una base de datos definitivamente inalcanzable. Una
//! segunda señal durante el cierre no corrompe el estado: los manejadores ya
//! instalados la absorben.

use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use sensor_gateway_service::analytics::logic::start_analytics;
use sensor_gateway_service::channels::domain::Channels;
use sensor_gateway_service::config;
use sensor_gateway_service::config::analytics::MAP_FILE_NAME;
use sensor_gateway_service::config::control::CMD_SOCKET_PATH;
use sensor_gateway_service::connection::domain::{ClientRegistry, ConnectionSettings};
use sensor_gateway_service::connection::logic::{bind_listener, start_connection_manager};
use sensor_gateway_service::control::logic::start_control_interface;
use sensor_gateway_service::roommap::domain::RoomSensorMap;
use sensor_gateway_service::storage::domain::StorageSettings;
use sensor_gateway_service::storage::logic::start_storage;
use sensor_gateway_service::system::domain::{init_tracing, GatewayError, InternalEvent};


#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let port = match parse_port(&args) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage(args.first().map(String::as_str).unwrap_or("gateway"));
            return ExitCode::FAILURE;
        }
    };

    let map = RoomSensorMap::load(MAP_FILE_NAME);
    if let Some(loaded) = &map {
        if loaded.is_empty() {
            warn!("Warning: el mapa sala-sensor está vacío, las alertas reportarán el id de sensor");
        }
    }
    let mut channels = Channels::new();
    let registry = Arc::new(ClientRegistry::new(
        config::network::MAX_CONNECTIONS,
        config::network::MAX_CONNECTIONS_PER_IP,
    ));

    let listener = match bind_listener(port) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Fatal: no se pudo abrir el puerto {}: {}", port, e);
            return ExitCode::FAILURE;
        }
    };
    info!("Info: gateway iniciado en el puerto {}", port);

    let conmgt = start_connection_manager(
        listener,
        channels.analytics_buffer.clone(),
        channels.storage_buffer.clone(),
        registry.clone(),
        ConnectionSettings::default(),
        channels.shutdown_rx(),
    );
    let analytics = start_analytics(
        channels.analytics_buffer.clone(),
        map,
    );
    let storage = start_storage(
        channels.storage_buffer.clone(),
        channels.fatal_tx.clone(),
        channels.shutdown_rx(),
        StorageSettings::default(),
    );
    let control = start_control_interface(
        CMD_SOCKET_PATH.to_string(),
        registry.clone(),
        channels.shutdown_rx(),
    );

    let fatal = wait_for_termination(&mut channels).await;

    // Cierre ordenado: cortar la entrada, drenar los buffers, esperar a
    // cada tarea.
    info!("Info: iniciando la secuencia de cierre");
    let _ = channels.shutdown_tx.send(true);
    channels.analytics_buffer.signal_shutdown();
    channels.storage_buffer.signal_shutdown();

    join_task("analítica", analytics).await;
    join_task("persistencia", storage).await;
    join_task("gestor de conexiones", conmgt).await;
    join_task("interfaz de comandos", control).await;

    info!("Info: gateway finalizado");
    if fatal {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}


/// Espera el motivo de terminación. Devuelve `true` si fue un evento fatal.
async fn wait_for_termination(channels: &mut Channels) -> bool {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("Fatal: no se pudo instalar el manejador de SIGTERM: {}", e);
            return true;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Error: fallo la espera de SIGINT: {}", e);
            }
            info!("Info: señal de interrupción recibida, se inicia el cierre");
            false
        }
        _ = sigterm.recv() => {
            info!("Info: SIGTERM recibida, se inicia el cierre");
            false
        }
        event = channels.fatal_rx.recv() => {
            match event {
                Some(InternalEvent::FatalStorage) => {
                    error!("Fatal: la persistencia quedó inoperante, se inicia el cierre");
                }
                None => error!("Error: el canal de eventos fatales se cerró inesperadamente"),
            }
            true
        }
    }
}


async fn join_task(name: &str, handle: JoinHandle<()>) {
    match handle.await {
        Ok(()) => info!("Info: tarea de {} esperada correctamente", name),
        Err(e) => error!("Error: no se pudo esperar la tarea de {}: {}", name, e),
    }
}


fn parse_port(args: &[String]) -> Result<u16, GatewayError> {
    if args.len() != 2 {
        return Err(GatewayError::InvalidArgument(
            "se espera exactamente un argumento".to_string(),
        ));
    }
    match args[1].parse::<u16>() {
        Ok(0) | Err(_) => Err(GatewayError::InvalidArgument(format!(
            "puerto inválido '{}', debe estar entre 1 y 65535",
            args[1]
        ))),
        Ok(port) => Ok(port),
    }
}


fn print_usage(prog_name: &str) {
    eprintln!("Uso: {} <puerto>", prog_name);
    eprintln!("  <puerto>: puerto TCP de escucha de sensores (1-65535)");
}


#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn acepta_puertos_validos() {
        assert_eq!(parse_port(&args(&["gateway", "1"])).unwrap(), 1);
        assert_eq!(parse_port(&args(&["gateway", "1234"])).unwrap(), 1234);
        assert_eq!(parse_port(&args(&["gateway", "65535"])).unwrap(), 65535);
    }

    #[test]
    fn rechaza_puertos_invalidos() {
        assert!(parse_port(&args(&["gateway"])).is_err());
        assert!(parse_port(&args(&["gateway", "0"])).is_err());
        assert!(parse_port(&args(&["gateway", "65536"])).is_err());
        assert!(parse_port(&args(&["gateway", "abc"])).is_err());
        assert!(parse_port(&args(&["gateway", "12", "34"])).is_err());
    }
}

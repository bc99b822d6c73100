//! Interfaz de comandos operativos sobre un socket UNIX local.
//!
//! Acepta conexiones de a una y atiende comandos de una sola línea:
//!
//! * `status`: conexiones activas y uso de CPU y memoria del proceso.
//! * `stats`: instantánea formateada de las conexiones de sensores.
//!
//! Las respuestas se arman con las operaciones de solo lectura del
//! `ClientRegistry`, que toman el mismo mutex que el gestor de conexiones.
//! Si el socket no se puede crear, el gateway continúa sin plano de control.


use std::sync::Arc;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use crate::connection::domain::ClientRegistry;
use crate::sysmon::logic::SysMonitor;


const COMMAND_BUFFER_SIZE: usize = 128;


/// Bucle principal de la interfaz de comandos.
///
/// # Argumentos
/// * `socket_path`: ruta del socket UNIX a crear.
/// * `registry`: registro compartido de clientes, fuente de `status`/`stats`.
/// * `shutdown`: canal watch de cierre.
pub async fn run_control_interface(socket_path: String,
                                   registry: Arc<ClientRegistry>,
                                   mut shutdown: watch::Receiver<bool>) {

    // Un socket viejo de una corrida anterior impediría el bind.
    let _ = std::fs::remove_file(&socket_path);

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            error!(
                "Error: no se pudo crear el socket de comandos '{}': {}. Se continúa sin plano de control",
                socket_path, e
            );
            return;
        }
    };
    info!("Info: interfaz de comandos escuchando en {}", socket_path);

    let mut monitor = SysMonitor::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Info: señal de cierre recibida, la interfaz de comandos termina");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => handle_client(stream, &registry, &mut monitor).await,
                    Err(e) => error!("Error: fallo el accept del socket de comandos: {}", e),
                }
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    info!("Info: interfaz de comandos finalizada");
}


/// Atiende una conexión: lee un comando, responde y cierra.
async fn handle_client(mut stream: UnixStream,
                       registry: &Arc<ClientRegistry>,
                       monitor: &mut SysMonitor) {

    let mut raw = [0u8; COMMAND_BUFFER_SIZE];
    let read = match stream.read(&mut raw).await {
        Ok(0) => {
            debug!("Debug: cliente de comandos desconectado sin enviar nada");
            return;
        }
        Ok(n) => n,
        Err(e) => {
            error!("Error: fallo la lectura del socket de comandos: {}", e);
            return;
        }
    };

    let command = String::from_utf8_lossy(&raw[..read]).trim().to_string();
    debug!("Debug: comando recibido: '{}'", command);

    let response = match command.as_str() {
        "stats" => {
            if registry.active_connection_count() == 0 {
                "No hay conexiones activas.\n".to_string()
            } else {
                registry.format_connection_snapshot(Utc::now().timestamp())
            }
        }
        "status" => format_status(registry, monitor),
        other => format!(
            "ERROR: comando desconocido '{}'. Use 'stats' o 'status'.\n",
            other
        ),
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Warning: no se pudo responder al cliente de comandos: {}", e);
    }
}


fn format_status(registry: &Arc<ClientRegistry>, monitor: &mut SysMonitor) -> String {
    let active = registry.active_connection_count();
    match monitor.sample() {
        Ok(stats) => format!(
            "--- Estado del sistema ---\n\
             Conexiones activas: {}\n\
             Uso de CPU: {:.2} %\n\
             Uso de RAM: {:.2} % ({} / {} kB)\n",
            active,
            stats.cpu_usage_percent,
            stats.ram_usage_percent,
            stats.ram_used_kb,
            stats.ram_total_kb,
        ),
        Err(e) => format!(
            "--- Estado del sistema ---\n\
             Conexiones activas: {}\n\
             ERROR: no se pudieron obtener las métricas del sistema: {}\n",
            active, e,
        ),
    }
}


/// Inicializa y ejecuta la interfaz de comandos en segundo plano.
pub fn start_control_interface(socket_path: String,
                               registry: Arc<ClientRegistry>,
                               shutdown: watch::Receiver<bool>) -> JoinHandle<()> {

    info!("Info: iniciando tarea de la interfaz de comandos");
    tokio::spawn(async move {
        run_control_interface(
            socket_path,
            registry,
            shutdown,
        ).await;
    })
}

//! Lógica del storage worker: persistencia con reintento acotado.
//!
//! Consumidor único de su buffer de staging y dueño de la cola local de
//! reintentos. Funciona como una máquina de estados de dos fases:
//!
//! * **Conexión:** hasta `connect_attempts` intentos con una espera
//!   interrumpible entre ellos. Si se agotan, el worker emite un log fatal y
//!   escala `InternalEvent::FatalStorage` al orquestador, que inicia el
//!   cierre ordenado.
//! * **Trabajo:** en cada iteración la cabeza de la cola de reintentos tiene
//!   prioridad sobre el buffer. Un insert exitoso desencola el elemento
//!   reintentado; un insert fallido marca la conexión como perdida, encola
//!   los elementos nuevos (descartando el más viejo si no hay lugar) y deja
//!   en la cabeza los ya reintentados.
//!
//! La tarea termina al recibir el cierre del buffer (drenando lo pendiente)
//! o al quedar la base definitivamente inalcanzable.


use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use crate::buffer::domain::StagingBuffer;
use crate::storage::domain::{RetryQueue, StorageSettings};
use crate::storage::repository::Repository;
use crate::system::domain::InternalEvent;


/// Motivo por el que no se consiguió una conexión.
enum ConnectFailure {
    /// El cierre del gateway interrumpió la espera.
    Interrupted,
    /// Se agotaron los intentos configurados.
    Exhausted,
}


/// Intenta conectar con la base, con espera interrumpible entre intentos.
async fn connect_with_retry(settings: &StorageSettings,
                            shutdown: &mut watch::Receiver<bool>) -> Result<Repository, ConnectFailure> {

    for attempt in 1..=settings.connect_attempts {
        if *shutdown.borrow() {
            info!("Info: cierre del gateway durante la conexión con la base");
            return Err(ConnectFailure::Interrupted);
        }

        match Repository::connect(&settings.db_path).await {
            Ok(repo) => return Ok(repo),
            Err(e) => {
                warn!(
                    "Warning: no se pudo conectar con la base (intento {}/{}): {}",
                    attempt, settings.connect_attempts, e
                );
                if attempt < settings.connect_attempts {
                    tokio::select! {
                        _ = sleep(settings.connect_retry_delay) => {}
                        _ = shutdown.changed() => {
                            info!("Info: cierre del gateway durante la espera de reconexión");
                            return Err(ConnectFailure::Interrupted);
                        }
                    }
                }
            }
        }
    }
    Err(ConnectFailure::Exhausted)
}


/// Bucle principal del storage worker.
///
/// # Argumentos
/// * `buffer`: buffer de staging dedicado (extremo consumidor).
/// * `fatal_tx`: canal de escalamiento hacia el orquestador.
/// * `shutdown`: canal watch de cierre, interrumpe las esperas de reconexión.
/// * `settings`: ruta de la base, política de reintentos y capacidad de la
///   cola local.
pub async fn run_storage(buffer: Arc<StagingBuffer>,
                         fatal_tx: mpsc::Sender<InternalEvent>,
                         mut shutdown: watch::Receiver<bool>,
                         settings: StorageSettings) {

    info!("Info: tarea de persistencia creada");
    let mut retry_queue = RetryQueue::new(settings.retry_queue_capacity);

    let mut repo = match connect_with_retry(&settings, &mut shutdown).await {
        Ok(repo) => Some(repo),
        Err(ConnectFailure::Interrupted) => return,
        Err(ConnectFailure::Exhausted) => {
            error!(
                "Fatal: base '{}' inalcanzable tras {} intentos, se solicita el cierre del gateway",
                settings.db_path.display(),
                settings.connect_attempts
            );
            let _ = fatal_tx.send(InternalEvent::FatalStorage).await;
            return;
        }
    };

    loop {
        // Reconexión tras una pérdida detectada en un insert.
        if repo.is_none() {
            info!("Info: conexión con la base perdida, se intenta reconectar");
            match connect_with_retry(&settings, &mut shutdown).await {
                Ok(new_repo) => repo = Some(new_repo),
                Err(ConnectFailure::Interrupted) => break,
                Err(ConnectFailure::Exhausted) => {
                    error!(
                        "Fatal: no se pudo restablecer la conexión con la base '{}', se solicita el cierre del gateway",
                        settings.db_path.display()
                    );
                    let _ = fatal_tx.send(InternalEvent::FatalStorage).await;
                    break;
                }
            }
        }
        let Some(db) = repo.as_ref() else { continue };

        // La cola de reintentos tiene prioridad sobre el buffer.
        let (current, from_retry) = match retry_queue.peek() {
            Some(pending) => {
                debug!("Debug: reintentando el insert del sensor {}", pending.id);
                (pending.clone(), true)
            }
            None => match buffer.remove().await {
                Ok(reading) => (reading, false),
                Err(_) => {
                    info!("Info: buffer en cierre, la persistencia termina");
                    break;
                }
            },
        };

        match db.insert_reading(&current).await {
            Ok(()) => {
                if from_retry {
                    retry_queue.dequeue();
                    debug!(
                        "Debug: sensor {} persistido desde la cola de reintentos ({} pendientes)",
                        current.id,
                        retry_queue.len()
                    );
                } else {
                    debug!("Debug: sensor {} persistido", current.id);
                }
            }
            Err(e) => {
                error!("Error: fallo el insert del sensor {}: {}", current.id, e);
                warn!("Warning: se asume conexión con la base perdida");
                if from_retry {
                    warn!(
                        "Warning: el reintento del sensor {} volvió a fallar, queda en la cola",
                        current.id
                    );
                } else if let Some(dropped) = retry_queue.enqueue(current) {
                    warn!(
                        "Warning: cola de reintentos llena, se descarta la lectura más vieja (sensor {}, ts {})",
                        dropped.id, dropped.timestamp
                    );
                }
                if let Some(lost) = repo.take() {
                    lost.close().await;
                }
            }
        }
    }

    if let Some(db) = repo.take() {
        db.close().await;
    }
    info!("Info: tarea de persistencia finalizada");
}


/// Inicializa y ejecuta el storage worker en segundo plano.
pub fn start_storage(buffer: Arc<StagingBuffer>,
                     fatal_tx: mpsc::Sender<InternalEvent>,
                     shutdown: watch::Receiver<bool>,
                     settings: StorageSettings) -> JoinHandle<()> {

    info!("Info: iniciando tarea de persistencia");
    tokio::spawn(async move {
        run_storage(
            buffer,
            fatal_tx,
            shutdown,
            settings,
        ).await;
    })
}
